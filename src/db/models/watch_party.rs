use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::UserSummary;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PartyError {
    #[error("only the host can control playback")]
    NotAuthorized,

    #[error("participant {0} is not in this watch party")]
    NotParticipant(String),

    #[error("watch party is no longer active")]
    Inactive,

    #[error("invalid playback position: {0}")]
    InvalidTime(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub is_host: bool,
}

/// Who is joining; the participant id is assigned by the party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
}

impl From<UserSummary> for NewParticipant {
    fn from(user: UserSummary) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            display_name: user.display_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchParty {
    pub id: String,
    pub event_id: String,
    pub stream_id: String,
    pub host_id: String,
    pub is_active: bool,
    /// Seconds into the stream; never negative.
    pub current_time: f64,
    pub is_playing: bool,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub removed: Participant,
    /// Set when the leaving participant was the host and a successor was promoted.
    pub new_host_id: Option<String>,
    /// The party became inactive because nobody is left.
    pub deactivated: bool,
}

impl WatchParty {
    /// Starts a party with `host` as its first participant.
    pub fn start(
        event_id: &str,
        stream_id: &str,
        host: NewParticipant,
        now: DateTime<Utc>,
    ) -> Self {
        let host = Participant {
            id: Uuid::new_v4().to_string(),
            user_id: host.user_id,
            username: host.username,
            display_name: host.display_name,
            joined_at: now,
            is_host: true,
        };

        Self {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            stream_id: stream_id.to_string(),
            host_id: host.id.clone(),
            is_active: true,
            current_time: 0.0,
            is_playing: true,
            participants: vec![host],
            created_at: now,
        }
    }

    pub fn host(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == self.host_id)
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn participant_for_user(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Exactly one host flag, matching `host_id`, while active.
    pub fn host_invariant_holds(&self) -> bool {
        let hosts: Vec<&Participant> = self.participants.iter().filter(|p| p.is_host).collect();
        if !self.is_active && self.participants.is_empty() {
            return hosts.is_empty();
        }
        hosts.len() == 1 && hosts[0].id == self.host_id
    }

    /// Adds a participant. Joining twice as the same user returns the
    /// existing participant.
    pub fn join(
        &mut self,
        who: NewParticipant,
        now: DateTime<Utc>,
    ) -> Result<(Participant, bool), PartyError> {
        if !self.is_active {
            return Err(PartyError::Inactive);
        }
        if let Some(existing) = self.participant_for_user(&who.user_id) {
            return Ok((existing.clone(), false));
        }

        let participant = Participant {
            id: Uuid::new_v4().to_string(),
            user_id: who.user_id,
            username: who.username,
            display_name: who.display_name,
            joined_at: now,
            is_host: false,
        };
        self.participants.push(participant.clone());
        Ok((participant, true))
    }

    /// Removes a participant. A leaving host hands off to the earliest-joined
    /// remaining participant; ties keep join order. An empty party deactivates.
    pub fn leave(&mut self, participant_id: &str) -> Result<LeaveOutcome, PartyError> {
        if !self.is_active {
            return Err(PartyError::Inactive);
        }
        let idx = self
            .participants
            .iter()
            .position(|p| p.id == participant_id)
            .ok_or_else(|| PartyError::NotParticipant(participant_id.to_string()))?;

        let mut removed = self.participants.remove(idx);
        let was_host = removed.is_host;
        removed.is_host = false;

        let mut outcome = LeaveOutcome {
            removed,
            new_host_id: None,
            deactivated: false,
        };

        if self.participants.is_empty() {
            self.is_active = false;
            self.is_playing = false;
            outcome.deactivated = true;
            return Ok(outcome);
        }

        if was_host {
            // min_by_key returns the first minimum, so equal join times keep list order.
            if let Some(successor) = self.participants.iter_mut().min_by_key(|p| p.joined_at) {
                successor.is_host = true;
                self.host_id = successor.id.clone();
                outcome.new_host_id = Some(successor.id.clone());
            }
        }

        Ok(outcome)
    }

    /// Host-only play/pause flip. Returns the new `is_playing`.
    pub fn toggle_play_pause(&mut self, caller_id: &str) -> Result<bool, PartyError> {
        if !self.is_active {
            return Err(PartyError::Inactive);
        }
        if caller_id != self.host_id {
            return Err(PartyError::NotAuthorized);
        }
        self.is_playing = !self.is_playing;
        Ok(self.is_playing)
    }

    /// Host-only playback report from the host's player.
    pub fn apply_host_tick(
        &mut self,
        caller_id: &str,
        current_time: f64,
        is_playing: bool,
    ) -> Result<(), PartyError> {
        if !self.is_active {
            return Err(PartyError::Inactive);
        }
        if caller_id != self.host_id {
            return Err(PartyError::NotAuthorized);
        }
        if !current_time.is_finite() || current_time < 0.0 {
            return Err(PartyError::InvalidTime(current_time));
        }
        self.current_time = current_time;
        self.is_playing = is_playing;
        Ok(())
    }

    /// The underlying stream ended.
    pub fn end(&mut self) {
        self.is_active = false;
        self.is_playing = false;
    }
}
