//! Fetch/submit boundary. Services and routes depend on these traits only;
//! `MemoryStore` backs them with seeded in-process data.

use async_trait::async_trait;

use crate::db::models::{
    CapsuleHighlight, ChatMessage, DiscussionPost, EventCapsule, EventDetail, Platform, Stream,
    UserSummary, WatchParty,
};
use crate::error::AppResult;

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait EventRepository: Send + Sync + 'static {
    async fn find_by_id(&self, event_id: &str) -> AppResult<Option<EventDetail>>;

    async fn find_stream(&self, stream_id: &str) -> AppResult<Option<Stream>>;

    async fn find_streams_by_external_id(
        &self,
        platform: Platform,
        external_id: &str,
    ) -> AppResult<Vec<Stream>>;

    /// Replaces the stored stream with the same id.
    async fn update_stream(&self, stream: Stream) -> AppResult<Stream>;

    /// Flips the viewer's RSVP. Returns `(is_rsvped, attendee_count)`.
    async fn toggle_rsvp(&self, event_id: &str, user: UserSummary) -> AppResult<(bool, usize)>;
}

#[async_trait]
pub trait WatchPartyRepository: Send + Sync + 'static {
    async fn find_by_id(&self, party_id: &str) -> AppResult<Option<WatchParty>>;

    async fn find_active_by_stream(&self, stream_id: &str) -> AppResult<Option<WatchParty>>;

    /// Insert or replace by id.
    async fn save(&self, party: WatchParty) -> AppResult<()>;
}

#[async_trait]
pub trait ChatRepository: Send + Sync + 'static {
    async fn list(&self, stream_id: &str) -> AppResult<Vec<ChatMessage>>;

    async fn append(&self, message: ChatMessage) -> AppResult<()>;
}

#[async_trait]
pub trait DiscussionRepository: Send + Sync + 'static {
    /// Top-level posts for the event, newest first.
    async fn list(&self, event_id: &str) -> AppResult<Vec<DiscussionPost>>;

    async fn find(&self, post_id: &str) -> AppResult<Option<DiscussionPost>>;

    /// Stores a new top-level post at the front of the event's list.
    async fn insert(&self, post: DiscussionPost) -> AppResult<()>;

    /// Flips the viewer's like atomically. `None` when the post is unknown.
    async fn toggle_like(&self, post_id: &str, user_id: &str)
        -> AppResult<Option<DiscussionPost>>;

    /// Stores `reply` and bumps the parent's reply count. Returns the updated
    /// parent, or `None` when the parent is unknown.
    async fn add_reply(&self, reply: DiscussionPost) -> AppResult<Option<DiscussionPost>>;

    /// Replies to a post, oldest first.
    async fn replies(&self, post_id: &str) -> AppResult<Vec<DiscussionPost>>;
}

#[async_trait]
pub trait CapsuleRepository: Send + Sync + 'static {
    async fn find_by_event(&self, event_id: &str) -> AppResult<Option<EventCapsule>>;

    /// Fails with `Conflict` when the event already has a capsule.
    async fn insert(&self, capsule: EventCapsule) -> AppResult<()>;

    async fn add_highlight(
        &self,
        event_id: &str,
        highlight: CapsuleHighlight,
    ) -> AppResult<Option<EventCapsule>>;
}
