use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageType {
    Message,
    Join,
    Leave,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub stream_id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: ChatMessageType,
}

/// Append-only chat history for one stream, ascending by timestamp and
/// bounded to `limit` entries (oldest evicted first).
#[derive(Debug, Clone)]
pub struct ChatFeed {
    entries: VecDeque<ChatMessage>,
    limit: usize,
}

impl ChatFeed {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Appends `message`. A late entry lands after every entry with an equal or
    /// earlier timestamp so the order stays ascending.
    pub fn push(&mut self, message: ChatMessage) {
        let idx = self
            .entries
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.entries.insert(idx, message);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }
}
