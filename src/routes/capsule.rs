use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::Utc;

use crate::error::{AppError, AppResult};
use crate::routes::viewer::Viewer;
use crate::services::capsule::{CapsuleView, NewCapsule, NewHighlight};
use crate::AppState;

/// Mounted under `/api/events`.
pub fn router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/:id/capsule",
            get(get_capsule).merge(write(post(create_capsule))),
        )
        .route("/:id/capsule/highlights", write(post(add_highlight)))
}

async fn get_capsule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<CapsuleView>> {
    let capsule = state
        .capsules
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} has no capsule", id)))?;
    Ok(Json(capsule.into()))
}

async fn create_capsule(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
    body: Option<Json<NewCapsule>>,
) -> AppResult<(StatusCode, Json<CapsuleView>)> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let capsule = state.capsules.create(&id, input, Utc::now()).await?;
    tracing::info!("Viewer {} created capsule for event {}", viewer.id, id);
    Ok((StatusCode::CREATED, Json(capsule.into())))
}

async fn add_highlight(
    State(state): State<Arc<AppState>>,
    Viewer(_viewer): Viewer,
    Path(id): Path<String>,
    Json(request): Json<NewHighlight>,
) -> AppResult<(StatusCode, Json<CapsuleView>)> {
    let capsule = state.capsules.add_highlight(&id, request).await?;
    Ok((StatusCode::CREATED, Json(capsule.into())))
}
