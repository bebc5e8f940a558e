use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    CapsuleRepository, ChatRepository, DiscussionRepository, EventRepository,
    WatchPartyRepository,
};
use crate::db::models::{
    CapsuleHighlight, ChatFeed, ChatMessage, DiscussionPost, EventCapsule, EventDetail, Platform,
    Stream, UserSummary, WatchParty,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct DiscussionTables {
    posts: HashMap<String, DiscussionPost>,
    /// Top-level post ids per event, newest first.
    by_event: HashMap<String, Vec<String>>,
    /// Reply ids per parent, oldest first.
    replies: HashMap<String, Vec<String>>,
}

/// In-process store implementing every repository trait.
pub struct MemoryStore {
    events: RwLock<HashMap<String, EventDetail>>,
    parties: RwLock<HashMap<String, WatchParty>>,
    chat: RwLock<HashMap<String, ChatFeed>>,
    discussion: RwLock<DiscussionTables>,
    capsules: RwLock<HashMap<String, EventCapsule>>,
    chat_history_limit: usize,
}

impl MemoryStore {
    pub fn new(chat_history_limit: usize) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            parties: RwLock::new(HashMap::new()),
            chat: RwLock::new(HashMap::new()),
            discussion: RwLock::new(DiscussionTables::default()),
            capsules: RwLock::new(HashMap::new()),
            chat_history_limit,
        }
    }

    pub async fn insert_event(&self, event: EventDetail) {
        self.events
            .write()
            .await
            .insert(event.event.id.clone(), event);
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn find_by_id(&self, event_id: &str) -> AppResult<Option<EventDetail>> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn find_stream(&self, stream_id: &str) -> AppResult<Option<Stream>> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .flat_map(|e| e.event.streams.iter())
            .find(|s| s.id == stream_id)
            .cloned())
    }

    async fn find_streams_by_external_id(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> AppResult<Vec<Stream>> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .flat_map(|e| e.event.streams.iter())
            .filter(|s| s.platform == platform && s.external_id.eq_ignore_ascii_case(external_id))
            .cloned()
            .collect())
    }

    async fn update_stream(&self, stream: Stream) -> AppResult<Stream> {
        let mut events = self.events.write().await;
        let slot = events
            .values_mut()
            .flat_map(|e| e.event.streams.iter_mut())
            .find(|s| s.id == stream.id)
            .ok_or_else(|| AppError::NotFound(format!("Stream {} not found", stream.id)))?;
        *slot = stream.clone();
        Ok(stream)
    }

    async fn toggle_rsvp(&self, event_id: &str, user: UserSummary) -> AppResult<(bool, usize)> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

        let rsvped = match event.attendees.iter().position(|a| a.id == user.id) {
            Some(idx) => {
                event.attendees.remove(idx);
                false
            }
            None => {
                event.attendees.push(user);
                true
            }
        };
        Ok((rsvped, event.attendees.len()))
    }
}

#[async_trait]
impl WatchPartyRepository for MemoryStore {
    async fn find_by_id(&self, party_id: &str) -> AppResult<Option<WatchParty>> {
        Ok(self.parties.read().await.get(party_id).cloned())
    }

    async fn find_active_by_stream(&self, stream_id: &str) -> AppResult<Option<WatchParty>> {
        Ok(self
            .parties
            .read()
            .await
            .values()
            .find(|p| p.stream_id == stream_id && p.is_active)
            .cloned())
    }

    async fn save(&self, party: WatchParty) -> AppResult<()> {
        self.parties.write().await.insert(party.id.clone(), party);
        Ok(())
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn list(&self, stream_id: &str) -> AppResult<Vec<ChatMessage>> {
        Ok(self
            .chat
            .read()
            .await
            .get(stream_id)
            .map(ChatFeed::to_vec)
            .unwrap_or_default())
    }

    async fn append(&self, message: ChatMessage) -> AppResult<()> {
        let mut chat = self.chat.write().await;
        chat.entry(message.stream_id.clone())
            .or_insert_with(|| ChatFeed::with_limit(self.chat_history_limit))
            .push(message);
        Ok(())
    }
}

#[async_trait]
impl DiscussionRepository for MemoryStore {
    async fn list(&self, event_id: &str) -> AppResult<Vec<DiscussionPost>> {
        let tables = self.discussion.read().await;
        Ok(tables
            .by_event
            .get(event_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.posts.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find(&self, post_id: &str) -> AppResult<Option<DiscussionPost>> {
        Ok(self.discussion.read().await.posts.get(post_id).cloned())
    }

    async fn insert(&self, post: DiscussionPost) -> AppResult<()> {
        let mut tables = self.discussion.write().await;
        tables
            .by_event
            .entry(post.event_id.clone())
            .or_default()
            .insert(0, post.id.clone());
        tables.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn toggle_like(
        &self,
        post_id: &str,
        user_id: &str,
    ) -> AppResult<Option<DiscussionPost>> {
        let mut tables = self.discussion.write().await;
        Ok(tables.posts.get_mut(post_id).map(|post| {
            post.toggle_like(user_id);
            post.clone()
        }))
    }

    async fn add_reply(&self, reply: DiscussionPost) -> AppResult<Option<DiscussionPost>> {
        let parent_id = reply
            .parent_id
            .clone()
            .ok_or_else(|| AppError::BadRequest("Reply is missing its parent".to_string()))?;

        let mut tables = self.discussion.write().await;
        let parent = match tables.posts.get_mut(&parent_id) {
            Some(parent) => {
                parent.replies += 1;
                parent.clone()
            }
            None => return Ok(None),
        };

        tables
            .replies
            .entry(parent_id)
            .or_default()
            .push(reply.id.clone());
        tables.posts.insert(reply.id.clone(), reply);
        Ok(Some(parent))
    }

    async fn replies(&self, post_id: &str) -> AppResult<Vec<DiscussionPost>> {
        let tables = self.discussion.read().await;
        Ok(tables
            .replies
            .get(post_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.posts.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CapsuleRepository for MemoryStore {
    async fn find_by_event(&self, event_id: &str) -> AppResult<Option<EventCapsule>> {
        Ok(self.capsules.read().await.get(event_id).cloned())
    }

    async fn insert(&self, capsule: EventCapsule) -> AppResult<()> {
        let mut capsules = self.capsules.write().await;
        if capsules.contains_key(&capsule.event_id) {
            return Err(AppError::Conflict(format!(
                "Event {} already has a capsule",
                capsule.event_id
            )));
        }
        capsules.insert(capsule.event_id.clone(), capsule);
        Ok(())
    }

    async fn add_highlight(
        &self,
        event_id: &str,
        highlight: CapsuleHighlight,
    ) -> AppResult<Option<EventCapsule>> {
        let mut capsules = self.capsules.write().await;
        Ok(capsules.get_mut(event_id).map(|capsule| {
            capsule.insert_highlight(highlight);
            capsule.clone()
        }))
    }
}
