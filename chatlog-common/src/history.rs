//! Stored conversation records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::PromptMessage;

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "bot" => Ok(Role::Bot),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One turn of a user's conversation, keyed by `(user_id, timestamp)`.
///
/// Timestamps carry microsecond precision and are strictly increasing within
/// a user's log. Records are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    #[serde(rename = "message")]
    pub text: String,
}

impl ChatMessage {
    pub fn new(user_id: &str, timestamp: DateTime<Utc>, role: Role, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            timestamp,
            role,
            text: text.to_string(),
        }
    }

    /// Completion-service form of this record. Bot turns become assistant turns.
    pub fn to_prompt(&self) -> PromptMessage {
        match self.role {
            Role::User => PromptMessage::user(self.text.clone()),
            Role::Bot => PromptMessage::assistant(self.text.clone()),
        }
    }
}

/// Sort messages oldest first.
pub fn sort_chronological(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}
