//! Client side of a watch party: REST calls, the reconnecting socket session
//! and the transport state shown to the viewer.

pub mod api;
pub mod backoff;
pub mod connection;
pub mod watch_party;

pub use api::ApiClient;
pub use backoff::ReconnectPolicy;
pub use connection::ConnectionState;
pub use watch_party::{ClientConfig, WatchPartyClient};
