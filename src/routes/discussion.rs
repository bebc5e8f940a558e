use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::db::models::PostFilter;
use crate::error::AppResult;
use crate::routes::viewer::{MaybeViewer, Viewer};
use crate::services::discussion::{LikeOutcome, NewPost, PostView};
use crate::AppState;

/// Mounted under `/api/events`.
pub fn event_router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new().route(
        "/:id/discussion",
        get(list_posts).merge(write(post(create_post))),
    )
}

/// Mounted under `/api/discussion`.
pub fn post_router(
    write: impl Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
) -> Router<Arc<AppState>> {
    Router::new()
        .route("/:post_id/like", write(post(toggle_like)))
        .route(
            "/:post_id/replies",
            get(list_replies).merge(write(post(create_reply))),
        )
}

#[derive(Debug, Deserialize)]
pub struct DiscussionQuery {
    #[serde(default)]
    pub filter: PostFilter,
}

async fn list_posts(
    State(state): State<Arc<AppState>>,
    viewer: MaybeViewer,
    Path(id): Path<String>,
    Query(query): Query<DiscussionQuery>,
) -> AppResult<Json<Vec<PostView>>> {
    let posts = state
        .discussion
        .list(&id, query.filter, viewer.id(), Utc::now())
        .await?;
    Ok(Json(posts))
}

async fn create_post(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
    Json(request): Json<NewPost>,
) -> AppResult<(StatusCode, Json<PostView>)> {
    let post = state
        .discussion
        .submit(&id, &viewer, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn toggle_like(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(post_id): Path<String>,
) -> AppResult<Json<LikeOutcome>> {
    Ok(Json(state.discussion.toggle_like(&post_id, &viewer.id).await?))
}

async fn list_replies(
    State(state): State<Arc<AppState>>,
    viewer: MaybeViewer,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<PostView>>> {
    let replies = state
        .discussion
        .replies(&post_id, viewer.id(), Utc::now())
        .await?;
    Ok(Json(replies))
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

async fn create_reply(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(post_id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> AppResult<(StatusCode, Json<PostView>)> {
    let reply = state
        .discussion
        .reply(&post_id, &viewer, &request.content, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}
