//! Viewer-side watch party session over the party WebSocket.
//!
//! The client keeps one socket open, reconnecting with backoff when it drops,
//! and mirrors the server's party state into a local replica. It stops for
//! good on shutdown, once the party is over, or when the server refuses the
//! socket because the viewer is no longer in the party. The socket upgrade
//! carries the same viewer headers as the REST calls.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request,
    http::{HeaderMap, HeaderValue},
    protocol::Message,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::api::{viewer_headers, ApiClient};
use super::backoff::ReconnectPolicy;
use super::connection::ConnectionState;
use crate::config::Config;
use crate::db::models::{UserSummary, WatchParty};
use crate::error::{AppError, AppResult};
use crate::protocol::{ClientCommand, ServerMessage};
use crate::services::embed::{PlaybackPoller, PlaybackSource};
use crate::services::sync::{ReplicaSnapshot, SyncController, SyncStatus};
use crate::services::watch_party::JoinOutcome;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `http(s)://host:port` of the API server.
    pub server_url: String,
    pub party_id: String,
    /// Used to recognise this viewer in party frames.
    pub participant_id: String,
    pub viewer: UserSummary,
    pub tolerance_seconds: f64,
    pub settle_delay: Duration,
    /// How often an attached player is polled.
    pub poll_interval: Duration,
    pub policy: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(
        server_url: &str,
        party_id: &str,
        participant_id: &str,
        viewer: UserSummary,
        config: &Config,
    ) -> Self {
        Self {
            server_url: server_url.to_string(),
            party_id: party_id.to_string(),
            participant_id: participant_id.to_string(),
            viewer,
            tolerance_seconds: config.watch_party.sync_tolerance_seconds,
            settle_delay: Duration::from_millis(config.watch_party.settle_delay_ms),
            poll_interval: Duration::from_millis(config.watch_party.poll_interval_ms),
            policy: ReconnectPolicy::from_config(&config.reconnect),
        }
    }

    /// Settings for the party `api`'s viewer just joined.
    pub fn for_join(api: &ApiClient, joined: &JoinOutcome, config: &Config) -> Self {
        Self::new(
            api.server_url().as_str(),
            &joined.party.id,
            &joined.participant.id,
            api.viewer().clone(),
            config,
        )
    }

    /// `ws(s)://.../ws/watch-parties/{id}`
    pub fn socket_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&self.server_url)
            .map_err(|e| AppError::BadRequest(format!("Invalid server URL: {}", e)))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unsupported server URL scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| AppError::BadRequest("Cannot switch to a WebSocket scheme".into()))?;

        url.join(&format!(
            "/ws/watch-parties/{}",
            urlencoding::encode(&self.party_id)
        ))
        .map_err(|e| AppError::BadRequest(format!("Invalid party id: {}", e)))
    }

    fn socket_headers(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in viewer_headers(&self.viewer) {
            let value = HeaderValue::from_str(&value)
                .map_err(|_| AppError::BadRequest(format!("Invalid {} header value", name)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Upgrade requests cannot be cloned, so each attempt builds its own.
fn socket_request(url: &Url, headers: &HeaderMap) -> Result<Request, tungstenite::Error> {
    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().extend(headers.clone());
    Ok(request)
}

/// Local view of the party shared between the socket task and the handle.
struct Replica {
    participant_id: String,
    party: watch::Sender<Option<WatchParty>>,
    sync: SyncController,
}

impl Replica {
    /// Applies a server frame. Returns `true` once the party is over for us.
    fn apply(&self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::State { party } => {
                self.sync.remote_tick(party.current_time, party.is_playing);
                let over = !party.is_active || party.participant(&self.participant_id).is_none();
                self.party.send_replace(Some(party));
                over
            }
            ServerMessage::Tick {
                current_time,
                is_playing,
            } => {
                self.sync.remote_tick(current_time, is_playing);
                self.party.send_modify(|party| {
                    if let Some(party) = party {
                        party.current_time = current_time;
                        party.is_playing = is_playing;
                    }
                });
                false
            }
            ServerMessage::ParticipantJoined { participant } => {
                self.party.send_modify(|party| {
                    if let Some(party) = party {
                        if party.participant(&participant.id).is_none() {
                            party.participants.push(participant);
                        }
                    }
                });
                false
            }
            ServerMessage::ParticipantLeft { participant_id } => {
                self.party.send_modify(|party| {
                    if let Some(party) = party {
                        party.participants.retain(|p| p.id != participant_id);
                    }
                });
                participant_id == self.participant_id
            }
            ServerMessage::HostChanged { host_id } => {
                self.party.send_modify(|party| {
                    if let Some(party) = party {
                        for p in party.participants.iter_mut() {
                            p.is_host = p.id == host_id;
                        }
                        party.host_id = host_id;
                    }
                });
                false
            }
            ServerMessage::Ended => {
                self.party.send_modify(|party| {
                    if let Some(party) = party {
                        party.is_active = false;
                        party.is_playing = false;
                    }
                });
                true
            }
            ServerMessage::Error { code, message } => {
                tracing::warn!("Watch party server error {}: {}", code, message);
                false
            }
            ServerMessage::Pong => false,
        }
    }

    fn is_host(&self) -> bool {
        self.party
            .borrow()
            .as_ref()
            .map(|p| p.is_active && p.host_id == self.participant_id)
            .unwrap_or(false)
    }
}

enum SessionEnd {
    Shutdown,
    PartyOver,
    Dropped,
}

pub struct WatchPartyClient {
    replica: Arc<Replica>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    connection: watch::Receiver<ConnectionState>,
    poll_interval: Duration,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchPartyClient {
    /// Starts connecting in the background. Dropping the client shuts it down.
    pub fn spawn(config: ClientConfig) -> AppResult<Self> {
        let url = config.socket_url()?;
        let headers = config.socket_headers()?;
        socket_request(&url, &headers)
            .map_err(|e| AppError::BadRequest(format!("Invalid socket request: {}", e)))?;
        let replica = Arc::new(Replica {
            participant_id: config.participant_id.clone(),
            party: watch::channel(None).0,
            sync: SyncController::new(config.tolerance_seconds, config.settle_delay),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection) = watch::channel(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            url,
            headers,
            config.policy,
            replica.clone(),
            command_rx,
            connection_tx,
            shutdown_rx,
        ));

        Ok(Self {
            replica,
            commands,
            connection,
            poll_interval: config.poll_interval,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Last known party state, `None` until the first snapshot arrives.
    pub fn party(&self) -> Option<WatchParty> {
        self.replica.party.borrow().clone()
    }

    pub fn subscribe_party(&self) -> watch::Receiver<Option<WatchParty>> {
        self.replica.party.subscribe()
    }

    pub fn is_host(&self) -> bool {
        self.replica.is_host()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.replica.sync.status()
    }

    pub fn subscribe_sync(&self) -> watch::Receiver<SyncStatus> {
        self.replica.sync.subscribe()
    }

    pub fn playback(&self) -> ReplicaSnapshot {
        self.replica.sync.snapshot()
    }

    /// Commands are refused unless the socket is connected.
    pub fn send(&self, command: ClientCommand) -> AppResult<()> {
        if !self.connection.borrow().input_enabled() {
            return Err(AppError::Transport("Not connected".into()));
        }
        self.commands
            .send(command)
            .map_err(|_| AppError::Transport("Connection task has stopped".into()))
    }

    pub fn toggle_play_pause(&self) -> AppResult<()> {
        self.send(ClientCommand::TogglePlayPause)
    }

    pub fn report_host_tick(&self, current_time: f64, is_playing: bool) -> AppResult<()> {
        self.send(ClientCommand::HostTick {
            current_time,
            is_playing,
        })
    }

    pub fn leave(&self) -> AppResult<()> {
        self.send(ClientCommand::Leave)
    }

    /// Jumps the local replica to the host's time. `None` while a sync is
    /// already settling.
    pub fn request_sync(&self) -> Option<f64> {
        self.replica.sync.request_sync()
    }

    /// Polls the local player. Every snapshot updates the replica, and while
    /// this client is the connected host it is also reported to the server.
    pub fn attach_player<S>(&self, source: Arc<S>) -> PlaybackPoller
    where
        S: PlaybackSource + ?Sized,
    {
        let replica = self.replica.clone();
        let commands = self.commands.clone();
        let connection = self.connection.clone();
        PlaybackPoller::spawn(source, self.poll_interval, move |snapshot| {
            replica
                .sync
                .local_tick(snapshot.current_time, snapshot.is_playing);
            if replica.is_host() && connection.borrow().input_enabled() {
                let tick = ClientCommand::HostTick {
                    current_time: snapshot.current_time,
                    is_playing: snapshot.is_playing,
                };
                if commands.send(tick).is_err() {
                    tracing::debug!("Dropped host tick; the connection task has stopped");
                }
            }
        })
    }

    /// Closes the socket and waits for the connection task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Watch party client task failed: {}", e);
            }
        }
    }
}

/// The server rejected the upgrade: the party is gone, the viewer is not in
/// it, or no viewer was presented.
fn is_terminal_rejection(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(response) => {
            matches!(response.status().as_u16(), 401 | 403 | 404 | 409)
        }
        _ => false,
    }
}

async fn run(
    url: Url,
    headers: HeaderMap,
    policy: ReconnectPolicy,
    replica: Arc<Replica>,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    connection: watch::Sender<ConnectionState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt: u32 = 0;

    loop {
        let request = match socket_request(&url, &headers) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Failed to build watch party socket request: {}", e);
                break;
            }
        };
        let connected = tokio::select! {
            _ = &mut shutdown => break,
            result = connect_async(request) => result,
        };

        match connected {
            Ok((socket, _)) => {
                tracing::info!("Connected to watch party socket {}", url.path());
                attempt = 0;
                // Commands queued against a previous socket are stale.
                while commands.try_recv().is_ok() {}
                connection.send_replace(ConnectionState::Connected);

                match session(socket, &replica, &mut commands, &mut shutdown).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::PartyOver => {
                        tracing::info!("Watch party is over; closing client");
                        break;
                    }
                    SessionEnd::Dropped => {
                        tracing::warn!("Watch party socket dropped");
                    }
                }
            }
            Err(e) if is_terminal_rejection(&e) => {
                tracing::warn!("Watch party socket refused: {}", e);
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to connect to watch party socket: {}", e);
            }
        }

        attempt = attempt.saturating_add(1);
        let retry_in = policy.delay(attempt);
        connection.send_replace(ConnectionState::Reconnecting { attempt, retry_in });
        tracing::debug!(
            "Reconnecting to watch party in {:?} (attempt {})",
            retry_in,
            attempt
        );

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(retry_in) => {}
        }
        connection.send_replace(ConnectionState::Connecting);
    }

    connection.send_replace(ConnectionState::Closed);
}

async fn session(
    socket: Socket,
    replica: &Replica,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                };
                let leaving = matches!(command, ClientCommand::Leave);
                let text = match serde_json::to_string(&command) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode command: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return SessionEnd::Dropped;
                }
                if leaving {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::PartyOver;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if replica.apply(message) {
                                let _ = sink.send(Message::Close(None)).await;
                                return SessionEnd::PartyOver;
                            }
                        }
                        Err(e) => tracing::warn!("Unrecognized server frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Watch party socket error: {}", e);
                    return SessionEnd::Dropped;
                }
            },
        }
    }
}
