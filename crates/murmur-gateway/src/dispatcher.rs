use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

/// Fans gateway events out to every open `/notifications` socket.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connected socket receives every event
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Ids of the sockets currently attached
    sessions: RwLock<HashSet<Uuid>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashSet::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Returns how many
    /// receivers saw it.
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        self.inner.broadcast_tx.send(event).unwrap_or(0)
    }

    /// Track a newly opened socket. Returns its connection id.
    pub async fn register_session(&self) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.sessions.write().await.insert(conn_id);
        conn_id
    }

    pub async fn unregister_session(&self, conn_id: Uuid) {
        self.inner.sessions.write().await.remove(&conn_id);
    }

    /// Number of sockets currently attached.
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }
}
