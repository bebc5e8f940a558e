use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::db::models::{ChatMessage, ChatMessageType, UserSummary};
use crate::db::repository::{ChatRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::services::hub::Hub;

const SYSTEM_USER: &str = "system";

/// Per-stream chat: bounded, timestamp-ordered history plus live fan-out.
pub struct ChatService {
    messages: Arc<dyn ChatRepository>,
    events: Arc<dyn EventRepository>,
    hub: Hub<ChatMessage>,
    max_message_length: usize,
}

impl ChatService {
    pub fn new(
        messages: Arc<dyn ChatRepository>,
        events: Arc<dyn EventRepository>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            messages,
            events,
            hub: Hub::new(config.broadcast_capacity),
            max_message_length: config.max_message_length,
        }
    }

    async fn ensure_stream(&self, stream_id: &str) -> AppResult<()> {
        self.events
            .find_stream(stream_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Stream {} not found", stream_id)))
    }

    pub async fn history(&self, stream_id: &str) -> AppResult<Vec<ChatMessage>> {
        self.ensure_stream(stream_id).await?;
        self.messages.list(stream_id).await
    }

    /// Posts a viewer message. Text is stored trimmed; blank or oversized
    /// text is rejected without touching the history.
    pub async fn submit(
        &self,
        stream_id: &str,
        author: &UserSummary,
        text: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }
        if text.chars().count() > self.max_message_length {
            return Err(AppError::Validation(format!(
                "Message exceeds {} characters",
                self.max_message_length
            )));
        }
        self.ensure_stream(stream_id).await?;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            user_id: author.id.clone(),
            username: author.username.clone(),
            display_name: author.display_name.clone(),
            message: text.to_string(),
            timestamp: now,
            message_type: ChatMessageType::Message,
        };
        self.record(message).await
    }

    /// Appends a join/leave/system entry authored by the system user.
    pub async fn notice(
        &self,
        stream_id: &str,
        kind: ChatMessageType,
        text: String,
        now: DateTime<Utc>,
    ) -> AppResult<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            user_id: SYSTEM_USER.to_string(),
            username: SYSTEM_USER.to_string(),
            display_name: "System".to_string(),
            message: text,
            timestamp: now,
            message_type: kind,
        };
        self.record(message).await
    }

    async fn record(&self, message: ChatMessage) -> AppResult<ChatMessage> {
        self.messages.append(message.clone()).await?;
        let delivered = self.hub.publish(&message.stream_id, message.clone()).await;
        tracing::debug!(
            "Chat {} on stream {} delivered to {} subscribers",
            message.id,
            message.stream_id,
            delivered
        );
        Ok(message)
    }

    pub async fn subscribe(&self, stream_id: &str) -> AppResult<broadcast::Receiver<ChatMessage>> {
        self.ensure_stream(stream_id).await?;
        Ok(self.hub.subscribe(stream_id).await)
    }

    pub async fn prune_idle_channels(&self) -> usize {
        self.hub.prune().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::MemoryStore;
    use crate::db::seed::seeded_store;

    async fn service(limit: usize) -> ChatService {
        let store = Arc::new(seeded_store(limit, Utc::now()).await.unwrap());
        let config = ChatConfig {
            max_message_length: 20,
            history_limit: limit,
            broadcast_capacity: 16,
        };
        ChatService::new(store.clone(), store, &config)
    }

    fn viewer() -> UserSummary {
        UserSummary {
            id: "u1".into(),
            username: "fan".into(),
            display_name: "Fan".into(),
        }
    }

    #[tokio::test]
    async fn blank_messages_are_rejected_and_history_unchanged() {
        let chat = service(50).await;
        let before = chat.history("stream1").await.unwrap().len();

        for text in ["", "   ", "\n\t"] {
            let err = chat.submit("stream1", &viewer(), text, Utc::now()).await;
            assert!(matches!(err, Err(AppError::Validation(_))));
        }
        assert_eq!(chat.history("stream1").await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn messages_are_trimmed_and_length_checked() {
        let chat = service(50).await;
        let msg = chat
            .submit("stream1", &viewer(), "  hello  ", Utc::now())
            .await
            .unwrap();
        assert_eq!(msg.message, "hello");

        let long = "x".repeat(21);
        assert!(matches!(
            chat.submit("stream1", &viewer(), &long, Utc::now()).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let chat = service(50).await;
        assert!(matches!(
            chat.history("nope").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_new_entries() {
        let chat = service(50).await;
        let mut rx = chat.subscribe("stream1").await.unwrap();
        chat.submit("stream1", &viewer(), "gg", Utc::now()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "gg");
        assert_eq!(received.message_type, ChatMessageType::Message);
    }

    #[tokio::test]
    async fn history_limit_evicts_oldest() {
        let store = Arc::new(MemoryStore::new(2));
        store.insert_event(crate::db::seed::demo_event()).await;
        let config = ChatConfig {
            max_message_length: 500,
            history_limit: 2,
            broadcast_capacity: 4,
        };
        let chat = ChatService::new(store.clone(), store, &config);
        let start = Utc::now();
        for (i, text) in ["a", "b", "c"].iter().enumerate() {
            chat.submit(
                "stream1",
                &viewer(),
                text,
                start + chrono::Duration::seconds(i as i64),
            )
            .await
            .unwrap();
        }
        let texts: Vec<String> = chat
            .history("stream1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(texts, ["b", "c"]);
    }
}
