use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{CapsuleHighlight, EventCapsule, EventDetail, HighlightType};
use crate::db::repository::{CapsuleRepository, EventRepository};
use crate::error::{AppError, AppResult};
use crate::services::format::format_duration;
use crate::services::live_status::is_event_past;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCapsule {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHighlight {
    pub timestamp: u64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(rename = "type")]
    pub highlight_type: HighlightType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightView {
    #[serde(flatten)]
    pub highlight: CapsuleHighlight,
    /// `H:MM:SS` / `M:SS` offset into the event.
    pub time_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleView {
    pub id: String,
    pub event_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub cover_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub highlights: Vec<HighlightView>,
}

impl From<EventCapsule> for CapsuleView {
    fn from(capsule: EventCapsule) -> Self {
        Self {
            id: capsule.id,
            event_id: capsule.event_id,
            title: capsule.title,
            summary: capsule.summary,
            cover_url: capsule.cover_url,
            created_at: capsule.created_at,
            highlights: capsule
                .highlights
                .into_iter()
                .map(|h| HighlightView {
                    time_label: format_duration(h.timestamp),
                    highlight: h,
                })
                .collect(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct CapsuleService {
    capsules: Arc<dyn CapsuleRepository>,
    events: Arc<dyn EventRepository>,
}

impl CapsuleService {
    pub fn new(capsules: Arc<dyn CapsuleRepository>, events: Arc<dyn EventRepository>) -> Self {
        Self { capsules, events }
    }

    async fn event(&self, event_id: &str) -> AppResult<EventDetail> {
        self.events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))
    }

    pub async fn get(&self, event_id: &str) -> AppResult<Option<EventCapsule>> {
        self.event(event_id).await?;
        self.capsules.find_by_event(event_id).await
    }

    /// Only past events get a capsule, and only one each.
    pub async fn create(
        &self,
        event_id: &str,
        input: NewCapsule,
        now: DateTime<Utc>,
    ) -> AppResult<EventCapsule> {
        let detail = self.event(event_id).await?;
        if !is_event_past(&detail.event, now) {
            return Err(AppError::Conflict(format!(
                "Event {} has not ended yet",
                event_id
            )));
        }

        let capsule = EventCapsule {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            title: non_blank(input.title)
                .unwrap_or_else(|| format!("{} Capsule", detail.event.title)),
            summary: non_blank(input.summary),
            cover_url: non_blank(input.cover_url),
            highlights: Vec::new(),
            created_at: now,
        };
        self.capsules.insert(capsule.clone()).await?;
        tracing::info!("Capsule {} created for event {}", capsule.id, event_id);
        Ok(capsule)
    }

    pub async fn add_highlight(
        &self,
        event_id: &str,
        input: NewHighlight,
    ) -> AppResult<EventCapsule> {
        let detail = self.event(event_id).await?;
        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation(
                "Highlight title cannot be empty".to_string(),
            ));
        }
        let duration = detail.event.duration_seconds();
        if input.timestamp > duration {
            return Err(AppError::Validation(format!(
                "Highlight at {} is past the end of the event ({})",
                format_duration(input.timestamp),
                format_duration(duration)
            )));
        }

        let highlight = CapsuleHighlight {
            id: Uuid::new_v4().to_string(),
            timestamp: input.timestamp,
            title: title.to_string(),
            description: non_blank(input.description),
            thumbnail_url: non_blank(input.thumbnail_url),
            highlight_type: input.highlight_type,
        };
        self.capsules
            .add_highlight(event_id, highlight)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} has no capsule", event_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::seed::{seeded_store, DEMO_EVENT_ID};
    use chrono::TimeZone;

    async fn service() -> CapsuleService {
        let store = Arc::new(seeded_store(50, Utc::now()).await.unwrap());
        CapsuleService::new(store.clone(), store)
    }

    fn during_event() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 20, 0, 0).unwrap()
    }

    fn highlight(timestamp: u64, title: &str) -> NewHighlight {
        NewHighlight {
            timestamp,
            title: title.into(),
            description: None,
            thumbnail_url: None,
            highlight_type: HighlightType::Moment,
        }
    }

    #[tokio::test]
    async fn capsule_requires_a_past_event() {
        let svc = service().await;
        let err = svc
            .create(DEMO_EVENT_ID, NewCapsule::default(), during_event())
            .await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        assert!(svc.get(DEMO_EVENT_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_capsule_per_event_with_default_title() {
        let svc = service().await;
        let capsule = svc
            .create(DEMO_EVENT_ID, NewCapsule::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(capsule.title, "Epic Gaming Tournament Finals Capsule");

        let again = svc
            .create(DEMO_EVENT_ID, NewCapsule::default(), Utc::now())
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn highlights_stay_sorted_and_within_duration() {
        let svc = service().await;
        svc.create(DEMO_EVENT_ID, NewCapsule::default(), Utc::now())
            .await
            .unwrap();

        svc.add_highlight(DEMO_EVENT_ID, highlight(5400, "Comeback"))
            .await
            .unwrap();
        let capsule = svc
            .add_highlight(DEMO_EVENT_ID, highlight(600, "Opening"))
            .await
            .unwrap();
        let titles: Vec<&str> = capsule.highlights.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, ["Opening", "Comeback"]);

        // The demo event runs four hours.
        let err = svc
            .add_highlight(DEMO_EVENT_ID, highlight(4 * 3600 + 1, "Afterparty"))
            .await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let view = CapsuleView::from(capsule);
        assert_eq!(view.highlights[1].time_label, "1:30:00");
    }

    #[tokio::test]
    async fn highlight_needs_a_capsule() {
        let svc = service().await;
        assert!(matches!(
            svc.add_highlight(DEMO_EVENT_ID, highlight(10, "Early")).await,
            Err(AppError::NotFound(_))
        ));
    }
}
