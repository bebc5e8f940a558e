use std::collections::HashMap;

use tokio::sync::{broadcast, RwLock};

/// Broadcast channels keyed by id (party id, stream id).
///
/// Channels are created on first subscribe. Publishing to a key nobody
/// listens on is a no-op.
pub struct Hub<T> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> Hub<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, key: &str) -> broadcast::Receiver<T> {
        if let Some(tx) = self.channels.read().await.get(key) {
            return tx.subscribe();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many subscribers received the message.
    pub async fn publish(&self, key: &str, message: T) -> usize {
        match self.channels.read().await.get(key) {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops channels without subscribers. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribers_of_the_key_only() {
        let hub: Hub<u32> = Hub::new(8);
        let mut a = hub.subscribe("a").await;
        let mut b = hub.subscribe("b").await;

        assert_eq!(hub.publish("a", 7).await, 1);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub: Hub<u32> = Hub::new(8);
        assert_eq!(hub.publish("nobody", 1).await, 0);
        assert_eq!(hub.len().await, 0);
    }

    #[tokio::test]
    async fn prune_drops_idle_channels() {
        let hub: Hub<u32> = Hub::new(8);
        let keep = hub.subscribe("keep").await;
        drop(hub.subscribe("idle").await);

        assert_eq!(hub.prune().await, 1);
        assert_eq!(hub.len().await, 1);
        drop(keep);
    }
}
