//! Authoritative watch party state.
//!
//! Every mutation of a party runs under that party's lock, so transitions
//! such as host handoff and play/pause flips are applied one at a time.
//! Starting or joining a party on a stream locks the stream first, then the
//! party; nothing locks in the other order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

use crate::config::WatchPartyConfig;
use crate::db::models::{ChatMessageType, NewParticipant, Participant, WatchParty};
use crate::db::repository::{EventRepository, WatchPartyRepository};
use crate::error::{AppError, AppResult};
use crate::protocol::ServerMessage;
use crate::services::chat::ChatService;
use crate::services::hub::Hub;
use crate::services::live_status::is_stream_live;

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Locks keyed by party or stream id. An entry lives only while someone
/// holds or waits on it.
#[derive(Default)]
struct KeyedLocks {
    locks: LockMap,
}

struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the guard's own handle is not counted.
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl KeyedLocks {
    async fn acquire(&self, key: String) -> KeyedGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Drops entries left behind by waiters that were cancelled.
    fn prune(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub party: WatchParty,
    /// Pass its id as `participant_id` when opening the party socket.
    pub participant: Participant,
    /// The viewer started the party.
    pub created: bool,
}

pub struct WatchPartyService {
    parties: Arc<dyn WatchPartyRepository>,
    events: Arc<dyn EventRepository>,
    chat: Arc<ChatService>,
    hub: Hub<ServerMessage>,
    locks: KeyedLocks,
}

impl WatchPartyService {
    pub fn new(
        parties: Arc<dyn WatchPartyRepository>,
        events: Arc<dyn EventRepository>,
        chat: Arc<ChatService>,
        config: &WatchPartyConfig,
    ) -> Self {
        Self {
            parties,
            events,
            chat,
            hub: Hub::new(config.broadcast_capacity),
            locks: KeyedLocks::default(),
        }
    }

    pub async fn get(&self, party_id: &str) -> AppResult<WatchParty> {
        self.parties
            .find_by_id(party_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Watch party {} not found", party_id)))
    }

    pub async fn active_for_stream(&self, stream_id: &str) -> AppResult<Option<WatchParty>> {
        self.parties.find_active_by_stream(stream_id).await
    }

    /// Joins the stream's active party, starting one when there is none.
    /// Only live streams can host a party.
    pub async fn join(
        &self,
        stream_id: &str,
        who: NewParticipant,
        now: DateTime<Utc>,
    ) -> AppResult<JoinOutcome> {
        let _stream_guard = self.locks.acquire(format!("stream:{}", stream_id)).await;

        let stream = self
            .events
            .find_stream(stream_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Stream {} not found", stream_id)))?;

        if let Some(existing) = self.parties.find_active_by_stream(stream_id).await? {
            let _party_guard = self.locks.acquire(existing.id.clone()).await;
            // Re-read under the party lock.
            let mut party = self.get(&existing.id).await?;
            let (participant, added) = party.join(who, now)?;
            if added {
                self.parties.save(party.clone()).await?;
                self.announce(&party, ChatMessageType::Join, &participant, now)
                    .await;
                self.hub
                    .publish(
                        &party.id,
                        ServerMessage::ParticipantJoined {
                            participant: participant.clone(),
                        },
                    )
                    .await;
                tracing::info!(
                    "Participant {} joined watch party {}",
                    participant.id,
                    party.id
                );
            }
            return Ok(JoinOutcome {
                party,
                participant,
                created: false,
            });
        }

        if !is_stream_live(&stream, now) {
            return Err(AppError::Conflict(format!(
                "Stream {} is not live",
                stream_id
            )));
        }

        let event_id = stream.event_id.clone().unwrap_or_default();
        let party = WatchParty::start(&event_id, stream_id, who, now);
        let participant = party
            .host()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("new party has no host")))?;
        self.parties.save(party.clone()).await?;
        self.announce(&party, ChatMessageType::Join, &participant, now)
            .await;

        tracing::info!(
            "Watch party {} started on stream {} by {}",
            party.id,
            stream_id,
            participant.user_id
        );
        Ok(JoinOutcome {
            party,
            participant,
            created: true,
        })
    }

    pub async fn leave(
        &self,
        party_id: &str,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<WatchParty> {
        let _guard = self.locks.acquire(party_id.to_string()).await;
        let mut party = self.get(party_id).await?;
        let outcome = party.leave(participant_id)?;
        self.parties.save(party.clone()).await?;

        self.announce(&party, ChatMessageType::Leave, &outcome.removed, now)
            .await;
        self.hub
            .publish(
                party_id,
                ServerMessage::ParticipantLeft {
                    participant_id: outcome.removed.id.clone(),
                },
            )
            .await;

        if let Some(host_id) = outcome.new_host_id {
            tracing::info!("Watch party {} handed host to {}", party_id, host_id);
            self.hub
                .publish(party_id, ServerMessage::HostChanged { host_id })
                .await;
        }
        if outcome.deactivated {
            tracing::info!("Watch party {} is empty and now inactive", party_id);
            self.hub.publish(party_id, ServerMessage::Ended).await;
        }

        Ok(party)
    }

    /// Host-only. Broadcasts the flipped state to every participant.
    pub async fn toggle_play_pause(
        &self,
        party_id: &str,
        caller_id: &str,
    ) -> AppResult<WatchParty> {
        let _guard = self.locks.acquire(party_id.to_string()).await;
        let mut party = self.get(party_id).await?;
        party.toggle_play_pause(caller_id)?;
        self.parties.save(party.clone()).await?;
        self.hub.publish(party_id, ServerMessage::tick(&party)).await;
        Ok(party)
    }

    /// Host-only playback report, rebroadcast as the authoritative tick.
    pub async fn host_tick(
        &self,
        party_id: &str,
        caller_id: &str,
        current_time: f64,
        is_playing: bool,
    ) -> AppResult<WatchParty> {
        let _guard = self.locks.acquire(party_id.to_string()).await;
        let mut party = self.get(party_id).await?;
        party.apply_host_tick(caller_id, current_time, is_playing)?;
        self.parties.save(party.clone()).await?;
        self.hub.publish(party_id, ServerMessage::tick(&party)).await;
        Ok(party)
    }

    /// Ends the active party on a stream that went offline.
    pub async fn end_for_stream(
        &self,
        stream_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<WatchParty>> {
        let _stream_guard = self.locks.acquire(format!("stream:{}", stream_id)).await;
        let Some(active) = self.parties.find_active_by_stream(stream_id).await? else {
            return Ok(None);
        };

        let _guard = self.locks.acquire(active.id.clone()).await;
        let mut party = self.get(&active.id).await?;
        party.end();
        self.parties.save(party.clone()).await?;

        if let Err(e) = self
            .chat
            .notice(
                stream_id,
                ChatMessageType::System,
                "The stream ended and the watch party is over".to_string(),
                now,
            )
            .await
        {
            tracing::warn!("Failed to post end notice for stream {}: {:?}", stream_id, e);
        }
        self.hub.publish(&party.id, ServerMessage::Ended).await;
        tracing::info!("Watch party {} ended with stream {}", party.id, stream_id);
        Ok(Some(party))
    }

    /// Socket-side view of a party for the viewer `user_id`. Returns the
    /// viewer's participant id; viewers outside the party are refused.
    pub async fn connect(
        &self,
        party_id: &str,
        user_id: &str,
    ) -> AppResult<(WatchParty, String, broadcast::Receiver<ServerMessage>)> {
        // Subscribe before reading so no update falls between the snapshot and the stream.
        let rx = self.hub.subscribe(party_id).await;
        let party = self.get(party_id).await?;
        if !party.is_active {
            return Err(AppError::from(crate::db::models::PartyError::Inactive));
        }
        let participant_id = party
            .participant_for_user(user_id)
            .map(|p| p.id.clone())
            .ok_or_else(|| {
                tracing::debug!("Viewer {} is not in watch party {}", user_id, party_id);
                AppError::NotAuthorized
            })?;
        Ok((party, participant_id, rx))
    }

    pub async fn prune_idle_channels(&self) -> usize {
        let stale_locks = self.locks.prune();
        if stale_locks > 0 {
            tracing::debug!("Dropped {} stale watch party locks", stale_locks);
        }
        self.hub.prune().await
    }

    async fn announce(
        &self,
        party: &WatchParty,
        kind: ChatMessageType,
        who: &Participant,
        now: DateTime<Utc>,
    ) {
        let verb = match kind {
            ChatMessageType::Join => "joined",
            _ => "left",
        };
        let text = format!("{} {} the watch party", who.display_name, verb);
        if let Err(e) = self.chat.notice(&party.stream_id, kind, text, now).await {
            tracing::warn!(
                "Failed to post {} notice for party {}: {:?}",
                verb,
                party.id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::repository::ChatRepository;
    use crate::db::seed::seeded_store;
    use crate::db::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: Arc<WatchPartyService>,
    }

    async fn fixture() -> Fixture {
        let config = Config::default();
        let store = Arc::new(seeded_store(200, Utc::now()).await.unwrap());
        let chat = Arc::new(ChatService::new(store.clone(), store.clone(), &config.chat));
        let service = Arc::new(WatchPartyService::new(
            store.clone(),
            store.clone(),
            chat,
            &config.watch_party,
        ));
        Fixture { store, service }
    }

    fn who(name: &str) -> NewParticipant {
        NewParticipant {
            user_id: format!("user-{}", name),
            username: name.to_lowercase(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn first_join_starts_party_on_live_stream() {
        let f = fixture().await;
        let out = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        assert!(out.created);
        assert_eq!(out.party.host_id, out.participant.id);

        let again = f.service.join("stream1", who("Guest"), Utc::now()).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.party.id, out.party.id);
        assert_eq!(again.party.participants.len(), 2);
    }

    #[tokio::test]
    async fn stream_that_has_not_started_cannot_host_a_party() {
        let f = fixture().await;
        let err = f.service.join("stream2", who("Host"), Utc::now()).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn join_posts_chat_notice() {
        let f = fixture().await;
        f.service
            .join("stream1", who("ComicLover"), Utc::now())
            .await
            .unwrap();
        let history = ChatRepository::list(f.store.as_ref(), "stream1").await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.message_type, ChatMessageType::Join);
        assert_eq!(last.message, "ComicLover joined the watch party");
    }

    #[tokio::test]
    async fn non_host_toggle_is_forbidden() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        let guest = f.service.join("stream1", who("Guest"), Utc::now()).await.unwrap();

        let err = f
            .service
            .toggle_play_pause(&host.party.id, &guest.participant.id)
            .await;
        assert!(matches!(err, Err(AppError::NotAuthorized)));
        assert!(f.service.get(&host.party.id).await.unwrap().is_playing);

        let party = f
            .service
            .toggle_play_pause(&host.party.id, &host.participant.id)
            .await
            .unwrap();
        assert!(!party.is_playing);
    }

    #[tokio::test]
    async fn toggle_is_broadcast_to_subscribers() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        let (_, _, mut rx) = f
            .service
            .connect(&host.party.id, &host.participant.user_id)
            .await
            .unwrap();

        f.service
            .toggle_play_pause(&host.party.id, &host.participant.id)
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::Tick {
                current_time: 0.0,
                is_playing: false
            }
        );
    }

    #[tokio::test]
    async fn host_leaving_hands_off_and_broadcasts() {
        let f = fixture().await;
        let p1 = f.service.join("stream1", who("P1"), Utc::now()).await.unwrap();
        let p2 = f.service.join("stream1", who("P2"), Utc::now()).await.unwrap();
        let _p3 = f.service.join("stream1", who("P3"), Utc::now()).await.unwrap();
        let (_, _, mut rx) = f
            .service
            .connect(&p1.party.id, &p2.participant.user_id)
            .await
            .unwrap();

        let party = f
            .service
            .leave(&p1.party.id, &p1.participant.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(party.host_id, p2.participant.id);
        assert!(party.host_invariant_holds());

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::ParticipantLeft { .. }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::HostChanged {
                host_id: p2.participant.id.clone()
            }
        );
    }

    #[tokio::test]
    async fn empty_party_deactivates_and_a_new_one_can_start() {
        let f = fixture().await;
        let p1 = f.service.join("stream1", who("P1"), Utc::now()).await.unwrap();
        let party = f
            .service
            .leave(&p1.party.id, &p1.participant.id, Utc::now())
            .await
            .unwrap();
        assert!(!party.is_active);
        assert!(f.service.active_for_stream("stream1").await.unwrap().is_none());

        let next = f.service.join("stream1", who("P2"), Utc::now()).await.unwrap();
        assert!(next.created);
        assert_ne!(next.party.id, p1.party.id);
    }

    #[tokio::test]
    async fn concurrent_toggles_are_serialized() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = f.service.clone();
            let party_id = host.party.id.clone();
            let caller = host.participant.id.clone();
            handles.push(tokio::spawn(async move {
                service.toggle_play_pause(&party_id, &caller).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // Ten flips from playing land back on playing.
        assert!(f.service.get(&host.party.id).await.unwrap().is_playing);
    }

    #[tokio::test]
    async fn ending_the_stream_ends_the_party() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        let (_, _, mut rx) = f
            .service
            .connect(&host.party.id, &host.participant.user_id)
            .await
            .unwrap();

        let ended = f.service.end_for_stream("stream1", Utc::now()).await.unwrap();
        assert!(!ended.unwrap().is_active);
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::Ended);
        assert!(f
            .service
            .connect(&host.party.id, &host.participant.user_id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn locks_are_released_after_use() {
        let f = fixture().await;
        for i in 0..100 {
            let err = f.service.toggle_play_pause(&format!("bogus-{}", i), "x").await;
            assert!(matches!(err, Err(AppError::NotFound(_))));
        }
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        f.service
            .join("stream1", who("Guest"), Utc::now())
            .await
            .unwrap();
        f.service
            .toggle_play_pause(&host.party.id, &host.participant.id)
            .await
            .unwrap();
        assert_eq!(f.service.locks.len(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiters_are_pruned() {
        let f = fixture().await;
        let held = f.service.locks.acquire("party-a".to_string()).await;
        let waiter = {
            let service = f.service.clone();
            tokio::spawn(async move {
                let _guard = service.locks.acquire("party-a".to_string()).await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;
        drop(held);
        f.service.prune_idle_channels().await;
        assert_eq!(f.service.locks.len(), 0);
    }

    #[tokio::test]
    async fn socket_identity_comes_from_the_viewer() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        let (_, participant_id, _rx) = f
            .service
            .connect(&host.party.id, &host.participant.user_id)
            .await
            .unwrap();
        assert_eq!(participant_id, host.party.host_id);

        // Knowing the host's participant id is not enough.
        let err = f.service.connect(&host.party.id, &host.participant.id).await;
        assert!(matches!(err, Err(AppError::NotAuthorized)));
        let err = f.service.connect(&host.party.id, "user-Stranger").await;
        assert!(matches!(err, Err(AppError::NotAuthorized)));
    }

    #[tokio::test]
    async fn host_tick_rejects_negative_time() {
        let f = fixture().await;
        let host = f.service.join("stream1", who("Host"), Utc::now()).await.unwrap();
        let err = f
            .service
            .host_tick(&host.party.id, &host.participant.id, -3.0, true)
            .await;
        assert!(matches!(err, Err(AppError::Validation(_))));
    }
}
