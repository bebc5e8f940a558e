use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{CommunitySummary, EventDetail, Stream, UserSummary};
use crate::error::{AppError, AppResult};
use crate::routes::viewer::{MaybeViewer, Viewer};
use crate::services::live_status::{is_stream_live, select_active_stream, EventStatus};
use crate::AppState;

const SITE_NAME: &str = "Fandom Social Platform";

pub fn router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_event))
        .route("/:id/metadata", get(get_metadata))
        .route("/:id/rsvp", write(post(toggle_rsvp)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamView {
    #[serde(flatten)]
    pub stream: Stream,
    pub is_live: bool,
    pub supports_playback_query: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
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
    pub streams: Vec<StreamView>,
    /// First live stream, else the first stream.
    pub active_stream_id: Option<String>,
    #[serde(flatten)]
    pub status: EventStatus,
    pub attendees: Vec<UserSummary>,
    pub attendee_count: usize,
    pub community: Option<CommunitySummary>,
    pub is_rsvped: bool,
}

impl EventResponse {
    fn new(detail: EventDetail, viewer_id: Option<&str>, now: DateTime<Utc>) -> Self {
        let status = EventStatus::evaluate(&detail.event, now);
        let active_stream_id =
            select_active_stream(&detail.event.streams, now).map(|s| s.id.clone());
        let is_rsvped = viewer_id
            .map(|id| detail.attendees.iter().any(|a| a.id == id))
            .unwrap_or(false);

        let event = detail.event;
        let streams = event
            .streams
            .into_iter()
            .map(|stream| StreamView {
                is_live: is_stream_live(&stream, now),
                supports_playback_query: stream.platform.supports_playback_query(),
                stream,
            })
            .collect();

        Self {
            id: event.id,
            title: event.title,
            description: event.description,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            location: event.location,
            organizer_id: event.organizer_id,
            community_id: event.community_id,
            created_at: event.created_at,
            updated_at: event.updated_at,
            streams,
            active_stream_id,
            status,
            attendee_count: detail.attendees.len(),
            attendees: detail.attendees,
            community: detail.community,
            is_rsvped,
        }
    }
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    viewer: MaybeViewer,
    Path(id): Path<String>,
) -> AppResult<Json<EventResponse>> {
    let detail = state
        .events
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", id)))?;

    Ok(Json(EventResponse::new(detail, viewer.id(), Utc::now())))
}

#[derive(Debug, Serialize)]
pub struct EventMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Page metadata; unknown events get a "not found" title rather than an error.
async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<EventMetadata>> {
    let metadata = match state.events.find_by_id(&id).await? {
        Some(detail) => EventMetadata {
            title: format!("{} | {}", detail.event.title, SITE_NAME),
            description: Some(detail.event.description),
        },
        None => EventMetadata {
            title: format!("Event Not Found | {}", SITE_NAME),
            description: None,
        },
    };
    Ok(Json(metadata))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpResponse {
    pub is_rsvped: bool,
    pub attendee_count: usize,
}

async fn toggle_rsvp(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
) -> AppResult<Json<RsvpResponse>> {
    let user_id = viewer.id.clone();
    let (is_rsvped, attendee_count) = state.events.toggle_rsvp(&id, viewer).await?;
    tracing::debug!(
        "Viewer {} RSVP for event {} is now {}",
        user_id,
        id,
        is_rsvped
    );
    Ok(Json(RsvpResponse {
        is_rsvped,
        attendee_count,
    }))
}
