//! Live / upcoming / past classification for events and streams.
//!
//! "Live" means started and not ended. It does not depend on the scheduled
//! window, so a stream past its `scheduled_start` that never started is not
//! live, and an event can be both past and live at once. Callers must not
//! treat the three flags as mutually exclusive.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{Event, Stream};

pub fn is_stream_live(stream: &Stream, _now: DateTime<Utc>) -> bool {
    stream.started_at.is_some() && stream.ended_at.is_none()
}

pub fn is_event_live(event: &Event, now: DateTime<Utc>) -> bool {
    event.streams.iter().any(|s| is_stream_live(s, now))
}

pub fn is_event_upcoming(event: &Event, now: DateTime<Utc>) -> bool {
    now < event.starts_at
}

pub fn is_event_past(event: &Event, now: DateTime<Utc>) -> bool {
    now > event.ends_at
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStatus {
    pub is_live: bool,
    pub is_upcoming: bool,
    pub is_past: bool,
}

impl EventStatus {
    pub fn evaluate(event: &Event, now: DateTime<Utc>) -> Self {
        Self {
            is_live: is_event_live(event, now),
            is_upcoming: is_event_upcoming(event, now),
            is_past: is_event_past(event, now),
        }
    }
}

/// The stream a viewer lands on: the first live one, else the first listed.
pub fn select_active_stream(streams: &[Stream], now: DateTime<Utc>) -> Option<&Stream> {
    streams
        .iter()
        .find(|s| is_stream_live(s, now))
        .or_else(|| streams.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::stream::fixtures::{at, stream};

    fn event(streams: Vec<Stream>) -> Event {
        Event {
            id: "1".into(),
            title: "Finals".into(),
            description: String::new(),
            starts_at: at(0),
            ends_at: at(240),
            location: None,
            organizer_id: "org1".into(),
            community_id: None,
            created_at: at(0),
            updated_at: at(0),
            streams,
        }
    }

    #[test]
    fn stream_live_ignores_schedule_and_clock() {
        let never_started = stream("a", None, None);
        let running = stream("b", Some(5), None);
        let ended = stream("c", Some(5), Some(60));

        for now in [at(0), at(120), at(100_000)] {
            assert!(!is_stream_live(&never_started, now));
            assert!(is_stream_live(&running, now));
            assert!(!is_stream_live(&ended, now));
        }
    }

    #[test]
    fn event_live_when_any_stream_live() {
        let e = event(vec![stream("a", Some(5), None), stream("b", Some(5), Some(30))]);
        assert!(is_event_live(&e, at(10)));

        let e = event(vec![stream("b", Some(5), Some(30))]);
        assert!(!is_event_live(&e, at(10)));
        assert!(!is_event_live(&event(vec![]), at(10)));
    }

    #[test]
    fn upcoming_and_past_follow_the_window() {
        let e = event(vec![]);
        assert!(is_event_upcoming(&e, at(0) - chrono::Duration::minutes(1)));
        assert!(!is_event_upcoming(&e, at(0)));
        assert!(!is_event_past(&e, at(240)));
        assert!(is_event_past(&e, at(241)));
    }

    #[test]
    fn past_and_live_can_coexist() {
        let e = event(vec![stream("a", Some(5), None)]);
        let status = EventStatus::evaluate(&e, at(1000));
        assert!(status.is_live);
        assert!(status.is_past);
        assert!(!status.is_upcoming);
    }

    #[test]
    fn active_stream_prefers_live() {
        let streams = vec![stream("a", None, None), stream("b", Some(1), None)];
        assert_eq!(select_active_stream(&streams, at(2)).unwrap().id, "b");

        let streams = vec![stream("a", None, None), stream("b", None, None)];
        assert_eq!(select_active_stream(&streams, at(2)).unwrap().id, "a");

        assert!(select_active_stream(&[], at(2)).is_none());
    }
}
