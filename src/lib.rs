use std::sync::Arc;

use axum::{routing::get, routing::MethodRouter, Router};
use tower_http::trace::TraceLayer;

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod protocol;
pub mod routes;
pub mod services;

use config::Config;
use db::repository::EventRepository;
use services::{
    capsule::CapsuleService, chat::ChatService, discussion::DiscussionService,
    watch_party::WatchPartyService,
};

pub struct AppState {
    pub config: Config,
    pub events: Arc<dyn EventRepository>,
    pub chat: Arc<ChatService>,
    pub watch_parties: WatchPartyService,
    pub discussion: DiscussionService,
    pub capsules: CapsuleService,
}

/// Builds the full application router.
///
/// `write` wraps every state-changing REST route (rate limiting in
/// production), and `webhooks` wraps the webhook router as a whole.
pub fn build_router<W, H>(state: Arc<AppState>, write: W, webhooks: H) -> Router
where
    W: Fn(MethodRouter<Arc<AppState>>) -> MethodRouter<Arc<AppState>>,
    H: FnOnce(Router<Arc<AppState>>) -> Router<Arc<AppState>>,
{
    let events = routes::events::router(&write)
        .merge(routes::discussion::event_router(&write))
        .merge(routes::capsule::router(&write));

    Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))
        // Event detail, RSVP, discussion feed and capsule
        .nest("/api/events", events)
        // Discussion post likes and replies
        .nest("/api/discussion", routes::discussion::post_router(&write))
        // Embeds, chat and watch party entry per stream
        .nest("/api/streams", routes::streams::router(&write))
        .nest("/api/watch-parties", routes::watch_parties::router(&write))
        // Watch party sync and live chat sockets
        .nest("/ws", routes::ws::router())
        // Twitch EventSub webhooks
        .nest("/webhooks", webhooks(routes::webhooks::router()))
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::csp::csp_middleware))
        .layer(TraceLayer::new_for_http())
}
