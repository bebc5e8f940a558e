use std::env;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub watch_party: WatchPartyConfig,
    pub chat: ChatConfig,
    pub discussion: DiscussionConfig,
    pub rate_limit: RateLimitConfig,
    pub webhook: WebhookConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin of the web frontend. Used for CORS and as the embed `parent`/`origin`.
    pub frontend_url: String,
    /// `LOG_FORMAT=json` switches the subscriber to JSON lines.
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchPartyConfig {
    /// Drift (seconds) between a replica and the host before it counts as out of sync.
    pub sync_tolerance_seconds: f64,
    /// How long a replica stays in `syncing` after a sync request.
    pub settle_delay_ms: u64,
    /// Interval for polling the embedded player's playback position.
    pub poll_interval_ms: u64,
    /// Capacity of each party's broadcast channel.
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    pub max_message_length: usize,
    /// Number of chat entries kept per stream; older entries are evicted.
    pub history_limit: usize,
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionConfig {
    pub max_post_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for write endpoints (chat, discussion, rsvp)
    pub write_per_second: u32,
    /// Burst size for write endpoints
    pub write_burst: u32,
    /// Allowed requests per second (per IP) for webhook endpoints (e.g. /webhooks/twitch)
    pub webhook_per_second: u32,
    /// Burst size for webhook endpoints
    pub webhook_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared EventSub secret. Without it the webhook endpoint answers 503.
    pub twitch_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env_or("PORT", defaults.server.port)?,
                frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.server.frontend_url),
                log_json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(defaults.server.log_json),
            },
            watch_party: WatchPartyConfig {
                sync_tolerance_seconds: env_or(
                    "WATCH_PARTY_SYNC_TOLERANCE_SECONDS",
                    defaults.watch_party.sync_tolerance_seconds,
                )?,
                settle_delay_ms: env_or(
                    "WATCH_PARTY_SETTLE_DELAY_MS",
                    defaults.watch_party.settle_delay_ms,
                )?,
                poll_interval_ms: env_or(
                    "WATCH_PARTY_POLL_INTERVAL_MS",
                    defaults.watch_party.poll_interval_ms,
                )?,
                broadcast_capacity: env_or(
                    "WATCH_PARTY_BROADCAST_CAPACITY",
                    defaults.watch_party.broadcast_capacity,
                )?,
            },
            chat: ChatConfig {
                max_message_length: env_or(
                    "CHAT_MAX_MESSAGE_LENGTH",
                    defaults.chat.max_message_length,
                )?,
                history_limit: env_or("CHAT_HISTORY_LIMIT", defaults.chat.history_limit)?,
                broadcast_capacity: env_or(
                    "CHAT_BROADCAST_CAPACITY",
                    defaults.chat.broadcast_capacity,
                )?,
            },
            discussion: DiscussionConfig {
                max_post_length: env_or(
                    "DISCUSSION_MAX_POST_LENGTH",
                    defaults.discussion.max_post_length,
                )?,
            },
            rate_limit: RateLimitConfig {
                write_per_second: env_or(
                    "RATE_LIMIT_WRITE_PER_SECOND",
                    defaults.rate_limit.write_per_second,
                )?,
                write_burst: env_or("RATE_LIMIT_WRITE_BURST", defaults.rate_limit.write_burst)?,
                webhook_per_second: env_or(
                    "RATE_LIMIT_WEBHOOKS_PER_SECOND",
                    defaults.rate_limit.webhook_per_second,
                )?,
                webhook_burst: env_or(
                    "RATE_LIMIT_WEBHOOKS_BURST",
                    defaults.rate_limit.webhook_burst,
                )?,
            },
            webhook: WebhookConfig {
                twitch_secret: env::var("TWITCH_EVENTSUB_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty()),
            },
            reconnect: ReconnectConfig {
                initial_backoff_ms: env_or(
                    "RECONNECT_INITIAL_BACKOFF_MS",
                    defaults.reconnect.initial_backoff_ms,
                )?,
                max_backoff_ms: env_or(
                    "RECONNECT_MAX_BACKOFF_MS",
                    defaults.reconnect.max_backoff_ms,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.watch_party.sync_tolerance_seconds;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::InvalidValue(
                "WATCH_PARTY_SYNC_TOLERANCE_SECONDS".to_string(),
            ));
        }
        if self.watch_party.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "WATCH_PARTY_POLL_INTERVAL_MS".to_string(),
            ));
        }
        if self.watch_party.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "WATCH_PARTY_BROADCAST_CAPACITY".to_string(),
            ));
        }
        if self.chat.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "CHAT_BROADCAST_CAPACITY".to_string(),
            ));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_INITIAL_BACKOFF_MS".to_string(),
            ));
        }
        if self.rate_limit.write_per_second == 0 || self.rate_limit.write_burst == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_WRITE_PER_SECOND".to_string(),
            ));
        }
        if self.rate_limit.webhook_per_second == 0 || self.rate_limit.webhook_burst == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_WEBHOOKS_PER_SECOND".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
                log_json: false,
            },
            watch_party: WatchPartyConfig {
                sync_tolerance_seconds: 2.0,
                settle_delay_ms: 1000,
                poll_interval_ms: 1000,
                broadcast_capacity: 64,
            },
            chat: ChatConfig {
                max_message_length: 500,
                history_limit: 200,
                broadcast_capacity: 128,
            },
            discussion: DiscussionConfig {
                max_post_length: 500,
            },
            rate_limit: RateLimitConfig {
                write_per_second: 2,
                write_burst: 10,
                webhook_per_second: 10,
                webhook_burst: 50,
            },
            webhook: WebhookConfig {
                twitch_secret: None,
            },
            reconnect: ReconnectConfig {
                initial_backoff_ms: 500,
                max_backoff_ms: 30_000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let mut config = Config::default();
        config.watch_party.sync_tolerance_seconds = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(key)) if key == "WATCH_PARTY_SYNC_TOLERANCE_SECONDS"
        ));
    }

    #[test]
    fn backoff_bounds_must_be_ordered() {
        let mut config = Config::default();
        config.reconnect.initial_backoff_ms = 60_000;
        assert!(config.validate().is_err());
    }
}
