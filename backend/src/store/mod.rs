//! Append-only per-user conversation log.
//!
//! Records are keyed by `(user_id, timestamp)`. Reads return the newest
//! records first; callers re-sort into chronological order before use.

mod memory;
mod sqlite;

pub use memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;

use chatlog_common::ChatMessage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Message already exists for {user_id} at {timestamp}")]
    Duplicate { user_id: String, timestamp: String },
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Storage contract the request handlers rely on.
pub trait ConversationStore: Send + Sync {
    /// Durably write one message. An existing `(user_id, timestamp)` key is
    /// an error, never an overwrite.
    fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Up to `limit` messages for `user_id`, newest first. `None` returns the
    /// whole log.
    fn recent_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Open the store selected by a `database.url` value.
pub fn open(database_url: &str) -> Result<Box<dyn ConversationStore>, StoreError> {
    if database_url == "memory" {
        tracing::info!("Using in-memory conversation store");
        return Ok(Box::new(InMemoryConversationStore::new()));
    }
    Ok(Box::new(SqliteConversationStore::new(database_url)?))
}
