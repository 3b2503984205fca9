//! Completion service clients.

mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use chatlog_common::PromptMessage;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Completion request timed out")]
    Timeout,
    #[error("Completion service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Whether a second attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::RequestFailed(_) | CompletionError::Timeout => true,
            CompletionError::Status { status, .. } => *status == 429 || *status >= 500,
            CompletionError::InvalidResponse(_) => false,
        }
    }
}

/// A remote service that continues a conversation.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply to `messages`, producing at most `max_tokens` tokens.
    ///
    /// Never returns empty text: a reply without content is an error.
    async fn complete(
        &self,
        messages: &[PromptMessage],
        max_tokens: u32,
    ) -> Result<String, CompletionError>;
}
