//! JSON frames exchanged over the watch party WebSocket.
//!
//! Every frame is an object tagged by `type`, e.g.
//! `{"type":"host_tick","current_time":12.5,"is_playing":true}`.

use serde::{Deserialize, Serialize};

use crate::db::models::{Participant, WatchParty};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Playback report from the host's player.
    HostTick { current_time: f64, is_playing: bool },
    TogglePlayPause,
    Leave,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full party snapshot, sent on connect.
    State { party: WatchParty },
    /// Authoritative playback position.
    Tick { current_time: f64, is_playing: bool },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { participant_id: String },
    HostChanged { host_id: String },
    /// The party is over; the server closes the socket after sending this.
    Ended,
    Error { code: String, message: String },
    Pong,
}

impl ServerMessage {
    pub fn tick(party: &WatchParty) -> Self {
        ServerMessage::Tick {
            current_time: party.current_time,
            is_playing: party.is_playing,
        }
    }

    pub fn error(err: &AppError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_snake_case_tags() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"host_tick","current_time":3.5,"is_playing":false}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::HostTick {
                current_time: 3.5,
                is_playing: false
            }
        );

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"toggle_play_pause"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::TogglePlayPause);
    }

    #[test]
    fn unknown_frames_are_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"seek","to":3}"#).is_err());
    }

    #[test]
    fn error_frames_carry_the_app_error_code() {
        let frame = serde_json::to_value(ServerMessage::error(&AppError::NotAuthorized)).unwrap();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "NOT_AUTHORIZED");
    }

    #[test]
    fn unit_variants_serialize_to_bare_tags() {
        assert_eq!(
            serde_json::to_string(&ServerMessage::Ended).unwrap(),
            r#"{"type":"ended"}"#
        );
    }
}
