use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::db::models::Platform;
use crate::error::{AppError, AppResult};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

const TWITCH_MESSAGE_ID_HEADER: &str = "twitch-eventsub-message-id";
const TWITCH_MESSAGE_TIMESTAMP_HEADER: &str = "twitch-eventsub-message-timestamp";
const TWITCH_MESSAGE_SIGNATURE_HEADER: &str = "twitch-eventsub-message-signature";
const TWITCH_MESSAGE_TYPE_HEADER: &str = "twitch-eventsub-message-type";

const SUB_TYPE_STREAM_ONLINE: &str = "stream.online";
const SUB_TYPE_STREAM_OFFLINE: &str = "stream.offline";

/// Messages older than this are rejected as possible replays.
const MAX_MESSAGE_AGE_MINUTES: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct EventSubSubscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct EventSubPayload {
    pub subscription: EventSubSubscription,
    pub challenge: Option<String>,
    pub event: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct StreamOnlineEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StreamOfflineEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
}

#[derive(Debug)]
pub struct EventSubHeaders {
    pub message_id: String,
    pub timestamp: String,
    pub signature: String,
    pub message_type: String,
}

pub struct WebhookService;

impl WebhookService {
    pub fn extract_headers(headers: &HeaderMap) -> AppResult<EventSubHeaders> {
        Ok(EventSubHeaders {
            message_id: Self::get_header(headers, TWITCH_MESSAGE_ID_HEADER)?,
            timestamp: Self::get_header(headers, TWITCH_MESSAGE_TIMESTAMP_HEADER)?,
            signature: Self::get_header(headers, TWITCH_MESSAGE_SIGNATURE_HEADER)?,
            message_type: Self::get_header(headers, TWITCH_MESSAGE_TYPE_HEADER)?,
        })
    }

    fn get_header(headers: &HeaderMap, name: &str) -> AppResult<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest(format!("Missing header: {}", name)))
    }

    /// `sha256=<hex>` HMAC over message id, timestamp and body.
    pub fn sign(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> AppResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(message_id.as_bytes());
        mac.update(timestamp.as_bytes());
        mac.update(body);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    pub fn verify_signature(
        secret: &str,
        headers: &EventSubHeaders,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let expected_sig = headers
            .signature
            .strip_prefix("sha256=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or_else(|| AppError::BadRequest("Invalid signature format".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
        mac.update(headers.message_id.as_bytes());
        mac.update(headers.timestamp.as_bytes());
        mac.update(body);
        mac.verify_slice(&expected_sig)
            .map_err(|_| AppError::Unauthorized)?;

        let sent_at = DateTime::parse_from_rfc3339(&headers.timestamp)
            .map_err(|_| AppError::BadRequest("Invalid message timestamp".to_string()))?;
        let age = now.signed_duration_since(sent_at);
        if age.num_minutes().abs() > MAX_MESSAGE_AGE_MINUTES {
            return Err(AppError::BadRequest("Message too old".to_string()));
        }

        Ok(())
    }

    pub fn secret(state: &AppState) -> AppResult<&str> {
        state
            .config
            .webhook
            .twitch_secret
            .as_deref()
            .ok_or_else(|| {
                AppError::ServiceUnavailable("Twitch webhooks are not configured".to_string())
            })
    }

    pub fn handle_verification(payload: &EventSubPayload) -> AppResult<String> {
        tracing::info!(
            "Verifying EventSub subscription {} ({})",
            payload.subscription.id,
            payload.subscription.subscription_type
        );
        payload
            .challenge
            .clone()
            .ok_or_else(|| AppError::BadRequest("Missing challenge".to_string()))
    }

    pub async fn handle_notification(
        state: &Arc<AppState>,
        payload: &EventSubPayload,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let event = payload
            .event
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("Missing event data".to_string()))?;

        match payload.subscription.subscription_type.as_str() {
            SUB_TYPE_STREAM_ONLINE => {
                let event: StreamOnlineEvent = serde_json::from_value(event.clone())
                    .map_err(|e| AppError::BadRequest(format!("Invalid event data: {}", e)))?;
                Self::handle_stream_online(state, event, now).await?;
            }
            SUB_TYPE_STREAM_OFFLINE => {
                let event: StreamOfflineEvent = serde_json::from_value(event.clone())
                    .map_err(|e| AppError::BadRequest(format!("Invalid event data: {}", e)))?;
                Self::handle_stream_offline(state, event, now).await?;
            }
            _ => {
                tracing::debug!(
                    "Unhandled subscription type: {}",
                    payload.subscription.subscription_type
                );
            }
        }

        Ok(())
    }

    async fn handle_stream_online(
        state: &Arc<AppState>,
        event: StreamOnlineEvent,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let streams = state
            .events
            .find_streams_by_external_id(Platform::Twitch, &event.broadcaster_user_login)
            .await?;
        if streams.is_empty() {
            tracing::debug!(
                "No streams tracked for broadcaster {} ({})",
                event.broadcaster_user_login,
                event.broadcaster_user_id
            );
        }

        let started_at = event
            .started_at
            .filter(|t| *t <= now + Duration::minutes(MAX_MESSAGE_AGE_MINUTES))
            .unwrap_or(now);
        for mut stream in streams {
            stream.mark_started(started_at);
            let stream = state.events.update_stream(stream).await?;
            tracing::info!(
                "Stream {} is live ({})",
                stream.id,
                event.broadcaster_user_login
            );
        }
        Ok(())
    }

    async fn handle_stream_offline(
        state: &Arc<AppState>,
        event: StreamOfflineEvent,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let streams = state
            .events
            .find_streams_by_external_id(Platform::Twitch, &event.broadcaster_user_login)
            .await?;

        for mut stream in streams {
            if !stream.mark_ended(now) {
                tracing::warn!(
                    "Offline notification for stream {} that never started",
                    stream.id
                );
                continue;
            }
            let stream = state.events.update_stream(stream).await?;
            tracing::info!(
                "Stream {} went offline ({})",
                stream.id,
                event.broadcaster_user_id
            );
            state.watch_parties.end_for_stream(&stream.id, now).await?;
        }
        Ok(())
    }
}
