//! chatlog common types
//!
//! Shared types used by the backend and its tests: the stored conversation
//! record, the OpenAI-compatible completion wire format, and the JSON bodies
//! returned by the HTTP API.

pub mod api;
pub mod chat;
pub mod history;

pub use api::{ErrorBody, HistoryResponse, PostMessageRequest, PostMessageResponse};
pub use chat::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, ChoiceMessage, PromptMessage,
    PromptRole, Usage,
};
pub use history::{ChatMessage, Role};
