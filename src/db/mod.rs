pub mod models;
pub mod repository;
pub mod seed;

pub use models::*;
pub use repository::{
    CapsuleRepository, ChatRepository, DiscussionRepository, EventRepository, MemoryStore,
    WatchPartyRepository,
};
