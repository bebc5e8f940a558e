//! Domain records held by the store.
//! Re-exported at `crate::db::models` so callers can `use crate::db::models::*;`.

pub mod capsule;
pub mod chat;
pub mod discussion;
pub mod event;
pub mod stream;
pub mod watch_party;

pub use self::capsule::*;
pub use self::chat::*;
pub use self::discussion::*;
pub use self::event::*;
pub use self::stream::*;
pub use self::watch_party::*;
