use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::Utc;

use crate::db::models::WatchParty;
use crate::error::{AppError, AppResult};
use crate::routes::viewer::Viewer;
use crate::AppState;

pub fn router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_watch_party))
        .route("/:id/leave", write(post(leave)))
        .route("/:id/toggle", write(post(toggle_play_pause)))
}

async fn get_watch_party(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<WatchParty>> {
    Ok(Json(state.watch_parties.get(&id).await?))
}

async fn leave(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
) -> AppResult<Json<WatchParty>> {
    let party = state.watch_parties.get(&id).await?;
    let participant = party.participant_for_user(&viewer.id).ok_or_else(|| {
        AppError::NotFound(format!("Viewer {} is not in this watch party", viewer.id))
    })?;
    let party = state
        .watch_parties
        .leave(&id, &participant.id, Utc::now())
        .await?;
    Ok(Json(party))
}

/// Only the host may toggle; everyone else, participant or not, gets 403.
async fn toggle_play_pause(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
) -> AppResult<Json<WatchParty>> {
    let party = state.watch_parties.get(&id).await?;
    let caller = party
        .participant_for_user(&viewer.id)
        .map(|p| p.id.clone())
        .ok_or(AppError::NotAuthorized)?;
    Ok(Json(state.watch_parties.toggle_play_pause(&id, &caller).await?))
}
