//! Embedded player URLs and playback polling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::db::models::{Platform, Stream};
use crate::error::{AppError, AppResult};

const TWITCH_PLAYER_URL: &str = "https://player.twitch.tv/";
const YOUTUBE_EMBED_URL: &str = "https://www.youtube.com/embed";

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EmbedOptions {
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub muted: bool,
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Player URL for `stream`, embedded in a page served from `frontend_url`.
pub fn embed_url(stream: &Stream, frontend_url: &str, options: EmbedOptions) -> AppResult<String> {
    let frontend = Url::parse(frontend_url)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid frontend URL: {}", e)))?;

    let url = match stream.platform {
        Platform::Twitch => {
            // Twitch refuses to render unless `parent` names the embedding host.
            let parent = frontend.host_str().unwrap_or("localhost");
            Url::parse_with_params(
                TWITCH_PLAYER_URL,
                &[
                    ("channel", stream.external_id.as_str()),
                    ("parent", parent),
                    ("autoplay", if options.autoplay { "true" } else { "false" }),
                    ("muted", if options.muted { "true" } else { "false" }),
                ],
            )
            .map_err(|e| AppError::Internal(e.into()))?
        }
        Platform::Youtube => {
            let mut url =
                Url::parse(YOUTUBE_EMBED_URL).map_err(|e| AppError::Internal(e.into()))?;
            url.path_segments_mut()
                .map_err(|_| AppError::Internal(anyhow::anyhow!("YouTube URL has no path")))?
                .push(&stream.external_id);
            url.query_pairs_mut()
                .append_pair("autoplay", flag(options.autoplay))
                .append_pair("mute", flag(options.muted))
                .append_pair("enablejsapi", "1")
                .append_pair("origin", &frontend.origin().ascii_serialization());
            url
        }
    };

    Ok(url.into())
}

/// What the embed endpoint returns for a stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedInfo {
    pub stream_id: String,
    pub platform: Platform,
    pub embed_url: String,
    pub is_live: bool,
    /// Only these players can drive a watch party's time source.
    pub supports_playback_query: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub current_time: f64,
    pub is_playing: bool,
}

/// A player whose position can be queried.
#[async_trait]
pub trait PlaybackSource: Send + Sync + 'static {
    /// `None` while the player is not ready.
    async fn snapshot(&self) -> Option<PlaybackSnapshot>;
}

/// Polls a `PlaybackSource` on a fixed interval until stopped or dropped.
pub struct PlaybackPoller {
    handle: Option<JoinHandle<()>>,
}

impl PlaybackPoller {
    pub fn spawn<S, F>(source: Arc<S>, interval: Duration, mut sink: F) -> Self
    where
        S: PlaybackSource + ?Sized,
        F: FnMut(PlaybackSnapshot) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some(snapshot) = source.snapshot().await {
                    sink(snapshot);
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for PlaybackPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
