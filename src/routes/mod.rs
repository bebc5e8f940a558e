pub mod capsule;
pub mod discussion;
pub mod events;
pub mod health;
pub mod streams;
pub mod viewer;
pub mod watch_parties;
pub mod webhooks;
pub mod ws;
