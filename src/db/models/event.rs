use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stream::Stream;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub organizer_id: String,
    pub community_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub streams: Vec<Stream>,
}

impl Event {
    pub fn has_valid_window(&self) -> bool {
        self.ends_at >= self.starts_at
    }

    pub fn stream(&self, stream_id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == stream_id)
    }

    /// Length of the event in whole seconds.
    pub fn duration_seconds(&self) -> u64 {
        (self.ends_at - self.starts_at).num_seconds().max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySummary {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Event joined with the collaborators the detail page shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: Event,
    pub attendees: Vec<UserSummary>,
    pub community: Option<CommunitySummary>,
}
