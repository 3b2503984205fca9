use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chatlog_common::ChatMessage;
use chrono::{DateTime, Utc};

use super::{ConversationStore, StoreError};

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    logs: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, ChatMessage>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut logs = self
            .logs
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let log = logs.entry(message.user_id.clone()).or_default();
        if log.contains_key(&message.timestamp) {
            return Err(StoreError::Duplicate {
                user_id: message.user_id.clone(),
                timestamp: message.timestamp.to_rfc3339(),
            });
        }
        log.insert(message.timestamp, message.clone());
        Ok(())
    }

    fn recent_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let logs = self
            .logs
            .read()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let Some(log) = logs.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .values()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
