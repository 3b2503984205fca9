use std::path::Path;
use std::sync::Mutex;

use chatlog_common::{ChatMessage, Role};
use rusqlite::{params, Connection, ErrorCode};

use super::{ConversationStore, StoreError};
use crate::clock::micros_to_datetime;

/// SQLite-backed conversation log.
///
/// One row per message, primary key `(user_id, ts_micros)`; the key index
/// serves the newest-first range read.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_logs (
                user_id TEXT NOT NULL,
                ts_micros INTEGER NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'bot')),
                message TEXT NOT NULL,
                PRIMARY KEY (user_id, ts_micros)
            )",
            [],
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::info!("Conversation store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.execute(
            "INSERT INTO chat_logs (user_id, ts_micros, role, message) VALUES (?1, ?2, ?3, ?4)",
            params![
                message.user_id,
                message.timestamp.timestamp_micros(),
                message.role.as_str(),
                message.text,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Duplicate {
                    user_id: message.user_id.clone(),
                    timestamp: message.timestamp.to_rfc3339(),
                }
            }
            other => StoreError::DatabaseError(other.to_string()),
        })?;

        tracing::debug!("Appended {} message for {}", message.role, message.user_id);
        Ok(())
    }

    fn recent_history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        // A negative LIMIT means no limit in SQLite.
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut stmt = conn
            .prepare(
                "SELECT user_id, ts_micros, role, message FROM chat_logs
                 WHERE user_id = ?1
                 ORDER BY ts_micros DESC
                 LIMIT ?2",
            )
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let rows = stmt
            .query_map(params![user_id, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let mut messages = Vec::new();
        for row in rows {
            let (user_id, ts_micros, role, text) =
                row.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let role: Role = role.parse().map_err(StoreError::Corrupt)?;
            messages.push(ChatMessage {
                user_id,
                timestamp: micros_to_datetime(ts_micros),
                role,
                text,
            });
        }

        Ok(messages)
    }
}
