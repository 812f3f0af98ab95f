use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// Maps each identity to its (at most one) live session and routes
/// outbound events to it. Delivery is fire-and-forget: an event for an
/// identity with no live session is silently dropped, never queued.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// username -> (conn_id, sender). The conn_id distinguishes a
    /// stale session's teardown from the binding that superseded it.
    sessions: RwLock<HashMap<String, (Uuid, mpsc::UnboundedSender<ServerEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bind `username` to a fresh session channel, superseding any
    /// prior binding. Returns (conn_id, receiver).
    pub async fn register(&self, username: &str) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .insert(username.to_string(), (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove the binding, but only if `conn_id` still owns it — a
    /// stale disconnect must not clobber a newer session.
    pub async fn unregister(&self, username: &str, conn_id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some((stored_conn_id, _)) = sessions.get(username) {
            if *stored_conn_id == conn_id {
                sessions.remove(username);
            }
        }
    }

    /// Send a targeted event to an identity's live session, if any.
    pub async fn send_to(&self, username: &str, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some((_, tx)) = sessions.get(username) {
            let _ = tx.send(event);
        }
    }
}
