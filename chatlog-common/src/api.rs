//! JSON bodies exchanged with API clients.

use serde::{Deserialize, Serialize};

use crate::history::ChatMessage;

/// Body of `POST /chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Body returned by `GET /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: String,
    pub chat_history: Vec<ChatMessage>,
}

/// Body returned by `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    pub user_id: String,
    pub chatbot_reply: String,
}

/// Error body. `code` is set for authentication failures only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
