//! Per-session conversation log
//!
//! Each connected client owns one ordered, append-only message log. The log
//! is replayed verbatim to the completion engine on every turn, so insertion
//! order matters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier minted when a socket is accepted; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mint a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn in the conversation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// In-memory store of every live session's log
///
/// The keyspace is shared across sessions, but each key is written only by
/// the relay task that owns that session. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    logs: Arc<RwLock<HashMap<SessionId, Vec<ChatMessage>>>>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session's log with the system directive
    ///
    /// The directive is only inserted when the log is empty, so the system
    /// message is always first and present exactly once.
    pub async fn open(&self, session_id: SessionId, directive: &str) {
        let mut logs = self.logs.write().await;
        let log = logs.entry(session_id).or_default();
        if log.is_empty() {
            log.push(ChatMessage::system(directive));
        }
    }

    /// Append one message, creating the log if absent
    pub async fn append(&self, session_id: SessionId, message: ChatMessage) {
        self.logs
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push(message);
    }

    /// Full ordered log; empty when the session is unknown
    pub async fn read(&self, session_id: SessionId) -> Vec<ChatMessage> {
        self.logs
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a session's log entirely
    pub async fn clear(&self, session_id: SessionId) {
        self.logs.write().await.remove(&session_id);
    }

    /// Number of sessions with a live log
    pub async fn session_count(&self) -> usize {
        self.logs.read().await.len()
    }

    /// Ids of every session with a live log
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.logs.read().await.keys().copied().collect()
    }
}
