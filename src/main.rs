use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::routing::MethodRouter;
use http::{HeaderName, HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fandom_events::config::Config;
use fandom_events::routes::viewer::{DISPLAY_NAME_HEADER, USERNAME_HEADER, USER_ID_HEADER};
use fandom_events::services::init;
use fandom_events::{build_router, AppState};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

fn json_response(status: StatusCode, body: serde_json::Value) -> http::Response<Body> {
    let mut resp = http::Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

/// Governor rejections in the same `{"error": {...}}` shape as `AppError`.
fn rate_limit_error(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut resp = json_response(
                StatusCode::TOO_MANY_REQUESTS,
                serde_json::json!({
                    "error": {
                        "code": "RATE_LIMITED",
                        "message": "Rate limit exceeded",
                        "details": { "retry_after_seconds": wait_time }
                    }
                }),
            );

            // Include any headers provided by the governor (e.g., X-RateLimit-* if enabled)
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(wait_time));
            resp
        }
        GovernorError::UnableToExtractKey => json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "code": "BAD_REQUEST",
                    "message": "Unable to determine client IP for rate limiting"
                }
            }),
        ),
        GovernorError::Other { code, msg, headers } => {
            let status =
                StatusCode::from_u16(code.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut resp = json_response(
                status,
                serde_json::json!({
                    "error": {
                        "code": "INTERNAL_ERROR",
                        "message": msg.unwrap_or_else(|| "Rate limiting error".to_string())
                    }
                }),
            );
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp
        }
    }
}

/// Periodically drops stale limiter entries on a plain thread until `flag` is set.
fn spawn_limiter_cleanup<F>(
    name: &'static str,
    flag: Arc<AtomicBool>,
    retain: F,
) -> std::thread::JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    std::thread::spawn(move || {
        // Use smaller sleep granularity to allow quick shutdown.
        let tick = Duration::from_secs(1);
        loop {
            for _ in 0..LIMITER_CLEANUP_INTERVAL.as_secs() {
                if flag.load(Ordering::SeqCst) {
                    tracing::info!("{} rate limiter cleanup thread exiting", name);
                    return;
                }
                std::thread::sleep(tick);
            }
            let size = retain();
            tracing::debug!("{} rate limiter size: {}", name, size);
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let log_json = config.server.log_json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fandom_events=debug,tower_http=debug".into()),
        )
        .with(log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!log_json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting Fandom Events Service");
    if config.webhook.twitch_secret.is_none() {
        tracing::warn!("TWITCH_WEBHOOK_SECRET is not set; Twitch webhooks will be refused");
    }

    let app_state = init::build_state(config.clone()).await?;

    // Create shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Spawn background workers (returns JoinHandles so we can await shutdown)
    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Rate limiter for state-changing endpoints (chat, discussion, RSVP, party control)
    let mut write_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    write_builder
        .per_second(config.rate_limit.write_per_second.into())
        .burst_size(config.rate_limit.write_burst)
        .error_handler(rate_limit_error);
    let write_gov_conf = Arc::new(
        write_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build write governor config"))?,
    );
    let write_cleaner = {
        let limiter = write_gov_conf.limiter().clone();
        spawn_limiter_cleanup("Write", thread_shutdown.clone(), move || {
            limiter.retain_recent();
            limiter.len()
        })
    };
    let write_rate_layer = GovernorLayer {
        config: write_gov_conf.clone(),
    };

    // Webhooks limiter
    let mut webhooks_builder =
        GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    webhooks_builder
        .per_second(config.rate_limit.webhook_per_second.into())
        .burst_size(config.rate_limit.webhook_burst)
        .error_handler(rate_limit_error);
    let webhooks_gov_conf = Arc::new(
        webhooks_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build webhooks governor config"))?,
    );
    let webhooks_cleaner = {
        let limiter = webhooks_gov_conf.limiter().clone();
        spawn_limiter_cleanup("Webhooks", thread_shutdown.clone(), move || {
            limiter.retain_recent();
            limiter.len()
        })
    };
    let webhooks_rate_layer = GovernorLayer {
        config: webhooks_gov_conf.clone(),
    };

    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    // Build router
    let app = build_router(
        app_state.clone(),
        move |route: MethodRouter<Arc<AppState>>| route.layer(write_rate_layer.clone()),
        move |router| router.layer(webhooks_rate_layer),
    )
    .layer(
        CorsLayer::new()
            .allow_origin(frontend_origin)
            .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                HeaderName::from_static(USER_ID_HEADER),
                HeaderName::from_static(USERNAME_HEADER),
                HeaderName::from_static(DISPLAY_NAME_HEADER),
            ])
            .allow_credentials(true),
    );

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    // The server future is dropped once a shutdown signal arrives, which stops
    // accepting new connections; workers and threads are notified first.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM, waiting for Ctrl+C only: {}", e);
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::error!("Failed to bind Ctrl+C: {}", e);
            }
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server future dropped to stop accepting new connections");
        }
    }

    // Give background workers some time to finish their work.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    // Join std threads; they check `thread_shutdown` and should exit quickly.
    if let Err(e) = write_cleaner.join() {
        tracing::warn!("Write cleanup thread join failed: {:?}", e);
    }
    if let Err(e) = webhooks_cleaner.join() {
        tracing::warn!("Webhooks cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
