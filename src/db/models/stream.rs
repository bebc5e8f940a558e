use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Twitch,
    Youtube,
}

impl Platform {
    /// Whether the platform's embed exposes a playback position query.
    /// Only such streams can act as a watch party time source.
    pub fn supports_playback_query(self) -> bool {
        matches!(self, Platform::Youtube)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: String,
    pub platform: Platform,
    pub external_id: String,
    pub title: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub event_id: Option<String>,
    pub community_id: Option<String>,
}

impl Stream {
    /// `ended_at`, when present, must not precede `started_at`, and a stream
    /// cannot end without having started.
    pub fn has_valid_timestamps(&self) -> bool {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end >= start,
            (None, Some(_)) => false,
            _ => true,
        }
    }

    /// Marks the stream as started. A restart clears a previous end.
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.ended_at = None;
    }

    /// Marks the stream as ended. Returns false when the stream never started.
    pub fn mark_ended(&mut self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(start) => {
                self.ended_at = Some(now.max(start));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 19, 0, 0).unwrap() + chrono::Duration::minutes(minute as i64)
    }

    pub fn stream(id: &str, started: Option<u32>, ended: Option<u32>) -> Stream {
        Stream {
            id: id.to_string(),
            platform: Platform::Youtube,
            external_id: format!("ext-{}", id),
            title: format!("Stream {}", id),
            scheduled_start: Some(at(0)),
            started_at: started.map(at),
            ended_at: ended.map(at),
            url: format!("https://youtube.com/watch?v={}", id),
            created_at: at(0),
            event_id: Some("1".to_string()),
            community_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn platform_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Platform::Youtube).unwrap(),
            "\"YOUTUBE\""
        );
    }

    #[test]
    fn ending_requires_a_start() {
        let mut s = stream("a", None, None);
        assert!(!s.mark_ended(at(10)));
        assert!(s.ended_at.is_none());

        s.mark_started(at(5));
        assert!(s.mark_ended(at(10)));
        assert!(s.has_valid_timestamps());
    }

    #[test]
    fn end_is_clamped_to_start() {
        let mut s = stream("a", Some(30), None);
        s.mark_ended(at(10));
        assert_eq!(s.ended_at, Some(at(30)));
    }

    #[test]
    fn restart_clears_end() {
        let mut s = stream("a", Some(0), Some(10));
        s.mark_started(at(20));
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn end_before_start_is_invalid() {
        let mut s = stream("a", Some(10), None);
        s.ended_at = Some(at(5));
        assert!(!s.has_valid_timestamps());
        assert!(!stream("b", None, Some(5)).has_valid_timestamps());
    }
}
