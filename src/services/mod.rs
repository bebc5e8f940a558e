pub mod capsule;
pub mod chat;
pub mod discussion;
pub mod embed;
pub mod format;
pub mod hub;
pub mod init;
pub mod live_status;
pub mod sync;
pub mod watch_party;
pub mod webhooks;
