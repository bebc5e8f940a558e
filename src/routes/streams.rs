use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::db::models::{ChatMessage, Stream, WatchParty};
use crate::error::{AppError, AppResult};
use crate::routes::viewer::Viewer;
use crate::services::embed::{embed_url, EmbedInfo, EmbedOptions};
use crate::services::live_status::is_stream_live;
use crate::services::watch_party::JoinOutcome;
use crate::AppState;

pub fn router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/embed", get(get_embed))
        .route("/:id/chat", get(list_chat).merge(write(post(post_chat))))
        .route("/:id/watch-party", get(get_watch_party))
        .route("/:id/watch-party/join", write(post(join_watch_party)))
}

async fn find_stream(state: &AppState, id: &str) -> AppResult<Stream> {
    state
        .events
        .find_stream(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Stream {} not found", id)))
}

async fn get_embed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(options): Query<EmbedOptions>,
) -> AppResult<Json<EmbedInfo>> {
    let stream = find_stream(&state, &id).await?;
    let url = embed_url(&stream, &state.config.server.frontend_url, options)?;
    Ok(Json(EmbedInfo {
        is_live: is_stream_live(&stream, Utc::now()),
        supports_playback_query: stream.platform.supports_playback_query(),
        stream_id: stream.id,
        platform: stream.platform,
        embed_url: url,
    }))
}

async fn list_chat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    Ok(Json(state.chat.history(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PostChatRequest {
    pub message: String,
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
    Json(request): Json<PostChatRequest>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    let message = state
        .chat
        .submit(&id, &viewer, &request.message, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_watch_party(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Option<WatchParty>>> {
    find_stream(&state, &id).await?;
    Ok(Json(state.watch_parties.active_for_stream(&id).await?))
}

async fn join_watch_party(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
) -> AppResult<Json<JoinOutcome>> {
    let outcome = state
        .watch_parties
        .join(&id, viewer.into(), Utc::now())
        .await?;
    tracing::info!(
        "Participant {} joined watch party {} on stream {}",
        outcome.participant.id,
        outcome.party.id,
        id
    );
    Ok(Json(outcome))
}
