//! WebSocket endpoints: the watch party sync channel and live chat.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::db::models::{ChatMessage, WatchParty};
use crate::error::{AppError, AppResult};
use crate::protocol::{ClientCommand, ServerMessage};
use crate::routes::viewer::Viewer;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/watch-parties/:id", get(watch_party_socket))
        .route("/streams/:id/chat", get(chat_socket))
}

/// The participant is resolved from the viewer headers before the upgrade,
/// so anonymous callers get 401 and outsiders get 403 as plain HTTP errors.
async fn watch_party_socket(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let (party, participant_id, rx) = state.watch_parties.connect(&id, &viewer.id).await?;
    tracing::debug!(
        "Participant {} ({}) connecting to watch party {}",
        participant_id,
        viewer.id,
        id
    );
    Ok(ws.on_upgrade(move |socket| run_party_socket(state, socket, party, participant_id, rx)))
}

async fn send_json<T: Serialize>(sink: &mut SplitSink<WebSocket, Message>, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode frame: {}", e);
            false
        }
    }
}

enum Flow {
    Continue,
    Close,
}

async fn run_party_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    party: WatchParty,
    participant_id: String,
    mut updates: broadcast::Receiver<ServerMessage>,
) {
    let party_id = party.id.clone();
    let (mut sink, mut stream) = socket.split();

    if !send_json(&mut sink, &ServerMessage::State { party }).await {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let flow = match update {
                    Ok(message) => {
                        let closes = match &message {
                            ServerMessage::Ended => true,
                            ServerMessage::ParticipantLeft { participant_id: left } => {
                                *left == participant_id
                            }
                            _ => false,
                        };
                        if !send_json(&mut sink, &message).await || closes {
                            Flow::Close
                        } else {
                            Flow::Continue
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed updates are replaced by a fresh snapshot.
                        tracing::warn!(
                            "Socket for {} in party {} lagged by {} updates",
                            participant_id,
                            party_id,
                            skipped
                        );
                        let resynced = match state.watch_parties.get(&party_id).await {
                            Ok(party) => send_json(&mut sink, &ServerMessage::State { party }).await,
                            Err(_) => false,
                        };
                        if resynced {
                            Flow::Continue
                        } else {
                            Flow::Close
                        }
                    }
                    Err(RecvError::Closed) => Flow::Close,
                };
                if let Flow::Close = flow {
                    break;
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!("Socket error for {}: {}", participant_id, e);
                        break;
                    }
                };

                let command = match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => command,
                    Err(e) => {
                        let err = AppError::BadRequest(format!("Unrecognized frame: {}", e));
                        if !send_json(&mut sink, &ServerMessage::error(&err)).await {
                            break;
                        }
                        continue;
                    }
                };

                match handle_command(&state, &party_id, &participant_id, command).await {
                    Ok((reply, flow)) => {
                        if let Some(reply) = reply {
                            if !send_json(&mut sink, &reply).await {
                                break;
                            }
                        }
                        if let Flow::Close = flow {
                            break;
                        }
                    }
                    Err(err) => {
                        if !send_json(&mut sink, &ServerMessage::error(&err)).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    // Dropping the socket is not a leave; the participant stays in the party.
    let _ = sink.close().await;
    tracing::debug!(
        "Socket for {} in party {} closed",
        participant_id,
        party_id
    );
}

/// Applies one client frame. Broadcast updates reach this socket through the
/// hub like any other, so only direct replies are returned here.
async fn handle_command(
    state: &AppState,
    party_id: &str,
    participant_id: &str,
    command: ClientCommand,
) -> AppResult<(Option<ServerMessage>, Flow)> {
    match command {
        ClientCommand::HostTick {
            current_time,
            is_playing,
        } => {
            state
                .watch_parties
                .host_tick(party_id, participant_id, current_time, is_playing)
                .await?;
            Ok((None, Flow::Continue))
        }
        ClientCommand::TogglePlayPause => {
            state
                .watch_parties
                .toggle_play_pause(party_id, participant_id)
                .await?;
            Ok((None, Flow::Continue))
        }
        ClientCommand::Leave => {
            state
                .watch_parties
                .leave(party_id, participant_id, chrono::Utc::now())
                .await?;
            Ok((None, Flow::Close))
        }
        ClientCommand::Ping => Ok((Some(ServerMessage::Pong), Flow::Continue)),
    }
}

async fn chat_socket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let rx = state.chat.subscribe(&id).await?;
    Ok(ws.on_upgrade(move |socket| run_chat_socket(socket, id, rx)))
}

/// Read-only feed; messages are posted over REST.
async fn run_chat_socket(
    socket: WebSocket,
    stream_id: String,
    mut messages: broadcast::Receiver<ChatMessage>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Ok(message) => {
                    if !send_json(&mut sink, &message).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Chat socket on {} skipped {} messages", stream_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = sink.close().await;
}
