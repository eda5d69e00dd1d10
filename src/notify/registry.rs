use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// One live connection per owner. Passed explicitly to whoever publishes or serves sockets.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<String, Connection>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `owner`, replacing (and thereby closing) any previous one.
    /// The returned id is what [`unregister`](Self::unregister) matches on.
    pub async fn register(&self, owner: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.lock().await;
        if map.insert(owner.to_string(), Connection { id, tx }).is_some() {
            warn!("replacing existing connection for owner {}", owner);
        }
        (id, rx)
    }

    /// Removes the connection only if it is still the one registered under `id`.
    pub async fn unregister(&self, owner: &str, id: u64) -> bool {
        let mut map = self.inner.lock().await;
        match map.get(owner) {
            Some(c) if c.id == id => {
                map.remove(owner);
                true
            }
            _ => false,
        }
    }

    /// Best-effort push. `false` when nobody is connected for `owner`.
    pub async fn send(&self, owner: &str, text: String) -> bool {
        let mut map = self.inner.lock().await;
        let Some(conn) = map.get(owner) else {
            return false;
        };
        if conn.tx.send(text).is_err() {
            debug!("dropping dead connection for owner {}", owner);
            map.remove(owner);
            return false;
        }
        true
    }

    pub async fn is_connected(&self, owner: &str) -> bool {
        self.inner.lock().await.contains_key(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_connection_is_dropped() {
        let reg = ConnectionRegistry::new();
        assert!(!reg.send("u1", "x".into()).await);
    }

    #[tokio::test]
    async fn delivers_to_registered_owner() {
        let reg = ConnectionRegistry::new();
        let (_id, mut rx) = reg.register("u1").await;
        assert!(reg.send("u1", "hello".into()).await);
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert!(!reg.send("u2", "nope".into()).await);
    }

    #[tokio::test]
    async fn replacement_closes_old_channel_and_stale_unregister_is_ignored() {
        let reg = ConnectionRegistry::new();
        let (old_id, mut old_rx) = reg.register("u1").await;
        let (new_id, mut new_rx) = reg.register("u1").await;

        assert_eq!(old_rx.recv().await, None);
        assert!(!reg.unregister("u1", old_id).await);
        assert!(reg.send("u1", "still here".into()).await);
        assert_eq!(new_rx.recv().await.as_deref(), Some("still here"));

        assert!(reg.unregister("u1", new_id).await);
        assert!(!reg.is_connected("u1").await);
    }

    #[tokio::test]
    async fn dead_receiver_is_pruned() {
        let reg = ConnectionRegistry::new();
        let (_id, rx) = reg.register("u1").await;
        drop(rx);
        assert!(!reg.send("u1", "x".into()).await);
        assert!(!reg.is_connected("u1").await);
    }
}
