//! Initialization helpers for the application:
//! - seeded store + service wiring
//! - background worker spawn helpers

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::db::seed::seeded_store;
use crate::services::{
    capsule::CapsuleService, chat::ChatService, discussion::DiscussionService,
    watch_party::WatchPartyService,
};
use crate::AppState;

const CHANNEL_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the shared state on top of a store seeded with the demo event.
pub async fn build_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(seeded_store(config.chat.history_limit, Utc::now()).await?);
    tracing::info!("In-memory store ready");

    let chat = Arc::new(ChatService::new(store.clone(), store.clone(), &config.chat));
    let watch_parties =
        WatchPartyService::new(store.clone(), store.clone(), chat.clone(), &config.watch_party);
    let discussion = DiscussionService::new(
        store.clone(),
        store.clone(),
        config.discussion.max_post_length,
    );
    let capsules = CapsuleService::new(store.clone(), store.clone());

    Ok(Arc::new(AppState {
        config,
        events: store,
        chat,
        watch_parties,
        discussion,
        capsules,
    }))
}

/// Spawn background workers:
/// - periodic pruning of broadcast channels nobody listens on
///
/// Returns the `JoinHandle`s so callers can await task shutdown. Each worker
/// exits when `shutdown` fires.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Channel pruning worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(CHANNEL_PRUNE_INTERVAL) => {}
                }

                let parties = state.watch_parties.prune_idle_channels().await;
                let chats = state.chat.prune_idle_channels().await;
                if parties + chats > 0 {
                    tracing::debug!(
                        "Pruned {} idle watch party and {} idle chat channels",
                        parties,
                        chats
                    );
                }
            }
        }));
    }

    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_serves_the_demo_event() {
        let state = build_state(Config::default()).await.unwrap();
        let event = state.events.find_by_id("1").await.unwrap();
        assert!(event.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn workers_stop_on_shutdown() {
        let state = build_state(Config::default()).await.unwrap();
        let (tx, _rx) = tokio::sync::broadcast::channel(1);
        let handles = spawn_background_workers(state, tx.clone());

        tokio::time::sleep(CHANNEL_PRUNE_INTERVAL * 2).await;
        tx.send(()).unwrap();
        for h in handles {
            tokio::time::timeout(Duration::from_secs(1), h)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
