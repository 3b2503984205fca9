//! Canned `/chat/completions` payloads for wiremock-backed tests.

use chatlog_common::ChatCompletionResponse;
use serde_json::{json, Value};

pub struct MockCompletion;

impl MockCompletion {
    /// A well-formed completion whose first choice says `content`.
    pub fn text(content: &str) -> Value {
        let response =
            ChatCompletionResponse::new("gpt-4o-mini".to_string(), content, Some("stop".to_string()))
                .with_usage(12, 3);
        serde_json::to_value(response).expect("Failed to serialize completion")
    }

    /// A 200 response carrying an empty `choices` array.
    pub fn no_choices() -> Value {
        json!({
            "id": "chatcmpl-empty",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": []
        })
    }

    /// A 200 response whose first choice has `"content": null`.
    pub fn null_content() -> Value {
        json!({
            "id": "chatcmpl-null",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null},
                "finish_reason": "length"
            }]
        })
    }

    /// The error envelope OpenAI-compatible services return on failure.
    pub fn error_json(message: &str) -> Value {
        json!({
            "error": {
                "message": message,
                "type": "invalid_request_error",
                "code": null
            }
        })
    }
}
