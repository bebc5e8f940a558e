//! A viewer's replica of watch party playback and its sync status.
//!
//! `SyncReplica` holds the pure transitions. `SyncController` wraps it with the
//! settle timer: a `request_sync` moves to `Syncing` and settles to `Synced`
//! after a fixed delay, unless a newer request or authoritative update
//! supersedes it first.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    Syncing,
    OutOfSync,
}

/// Identifies one sync request. Only the latest ticket may settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    pub current_time: f64,
    pub is_playing: bool,
    pub sync_status: SyncStatus,
    pub host_time: f64,
}

#[derive(Debug, Clone)]
pub struct SyncReplica {
    current_time: f64,
    is_playing: bool,
    status: SyncStatus,
    host_time: f64,
    tolerance: f64,
    generation: u64,
}

fn clamp_time(t: f64) -> f64 {
    if t.is_finite() {
        t.max(0.0)
    } else {
        0.0
    }
}

impl SyncReplica {
    pub fn new(tolerance_seconds: f64) -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            status: SyncStatus::Synced,
            host_time: 0.0,
            tolerance: tolerance_seconds.max(0.0),
            generation: 0,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn snapshot(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            current_time: self.current_time,
            is_playing: self.is_playing,
            sync_status: self.status,
            host_time: self.host_time,
        }
    }

    fn drifted(&self) -> bool {
        (self.current_time - self.host_time).abs() > self.tolerance
    }

    /// Position reported by this viewer's own player. Does not change status.
    pub fn local_tick(&mut self, current_time: f64, is_playing: bool) {
        self.current_time = clamp_time(current_time);
        self.is_playing = is_playing;
    }

    /// Authoritative host playback. Adopts the host's play state and
    /// re-evaluates drift. Returns true when it superseded a pending settle.
    pub fn remote_tick(&mut self, host_time: f64, host_playing: bool) -> bool {
        let superseded = self.status == SyncStatus::Syncing;
        self.host_time = clamp_time(host_time);
        self.is_playing = host_playing;
        self.generation += 1;
        self.status = if self.drifted() {
            SyncStatus::OutOfSync
        } else {
            SyncStatus::Synced
        };
        superseded
    }

    /// Jumps to the host position. `None` while a sync is already in flight.
    pub fn request_sync(&mut self) -> Option<(SettleTicket, f64)> {
        if self.status == SyncStatus::Syncing {
            return None;
        }
        self.generation += 1;
        self.status = SyncStatus::Syncing;
        self.current_time = self.host_time;
        Some((
            SettleTicket {
                generation: self.generation,
            },
            self.host_time,
        ))
    }

    /// Completes the sync identified by `ticket` if nothing superseded it.
    pub fn settle(&mut self, ticket: SettleTicket) -> bool {
        if self.status == SyncStatus::Syncing && ticket.generation == self.generation {
            self.status = SyncStatus::Synced;
            true
        } else {
            false
        }
    }
}

struct Shared {
    replica: SyncReplica,
    pending: Option<JoinHandle<()>>,
    status_tx: watch::Sender<SyncStatus>,
}

impl Shared {
    fn publish(&self) {
        self.status_tx.send_replace(self.replica.status());
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Replica plus settle timer. Clones share one replica.
#[derive(Clone)]
pub struct SyncController {
    shared: Arc<Mutex<Shared>>,
    status_rx: watch::Receiver<SyncStatus>,
    settle_delay: Duration,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SyncController {
    pub fn new(tolerance_seconds: f64, settle_delay: Duration) -> Self {
        let (status_tx, status_rx) = watch::channel(SyncStatus::Synced);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                replica: SyncReplica::new(tolerance_seconds),
                pending: None,
                status_tx,
            })),
            status_rx,
            settle_delay,
        }
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.shared).replica.status()
    }

    pub fn snapshot(&self) -> ReplicaSnapshot {
        lock(&self.shared).replica.snapshot()
    }

    /// Status changes, for a UI indicator.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn local_tick(&self, current_time: f64, is_playing: bool) {
        lock(&self.shared)
            .replica
            .local_tick(current_time, is_playing);
    }

    pub fn remote_tick(&self, host_time: f64, host_playing: bool) {
        let mut shared = lock(&self.shared);
        if shared.replica.remote_tick(host_time, host_playing) {
            tracing::debug!("Authoritative update superseded a pending sync");
            shared.cancel_pending();
        }
        shared.publish();
    }

    /// Starts a sync and returns the position the player should seek to.
    /// Returns `None` without touching the timer while already syncing.
    /// Must be called from within a tokio runtime.
    pub fn request_sync(&self) -> Option<f64> {
        let mut shared = lock(&self.shared);
        let (ticket, target) = shared.replica.request_sync()?;
        shared.cancel_pending();
        shared.publish();

        let weak: Weak<Mutex<Shared>> = Arc::downgrade(&self.shared);
        let delay = self.settle_delay;
        shared.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(strong) = weak.upgrade() {
                let mut shared = lock(&strong);
                if shared.replica.settle(ticket) {
                    shared.pending = None;
                    shared.publish();
                }
            }
        }));

        tracing::debug!("Sync requested; seeking to {:.1}s", target);
        Some(target)
    }
}
