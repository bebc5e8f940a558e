use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightType {
    Moment,
    Clip,
    Screenshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleHighlight {
    pub id: String,
    /// Seconds since the event started.
    pub timestamp: u64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(rename = "type")]
    pub highlight_type: HighlightType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCapsule {
    pub id: String,
    pub event_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub cover_url: Option<String>,
    pub highlights: Vec<CapsuleHighlight>,
    pub created_at: DateTime<Utc>,
}

impl EventCapsule {
    /// Inserts keeping highlights ordered by timestamp (stable for equal timestamps).
    pub fn insert_highlight(&mut self, highlight: CapsuleHighlight) {
        let idx = self
            .highlights
            .partition_point(|h| h.timestamp <= highlight.timestamp);
        self.highlights.insert(idx, highlight);
    }
}
