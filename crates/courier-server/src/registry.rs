use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use courier_shared::protocol::Push;
use courier_shared::types::UserId;

/// Identifies one live connection. A user may hold several.
pub type ConnectionId = u64;

/// Routing table of authenticated connections.
///
/// Each connection owns the receiving half of a bounded channel; the
/// registry only holds senders. Fan-out never blocks: a full or closed
/// channel drops the push.
#[derive(Clone, Default)]
pub struct Registry {
    routes: Arc<RwLock<HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<Push>>>>>,
    next_id: Arc<AtomicU64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn register(&self, user: UserId, conn: ConnectionId, tx: mpsc::Sender<Push>) {
        let mut routes = self.routes.write().await;
        let conns = routes.entry(user).or_default();
        conns.insert(conn, tx);

        info!(
            user = %user,
            conn,
            connections = conns.len(),
            "Connection registered"
        );
    }

    pub async fn unregister(&self, user: UserId, conn: ConnectionId) {
        let mut routes = self.routes.write().await;
        if let Some(conns) = routes.get_mut(&user) {
            conns.remove(&conn);
            if conns.is_empty() {
                routes.remove(&user);
            }
        }
        debug!(user = %user, conn, "Connection unregistered");
    }

    /// Push to every live connection of every recipient except `sender`.
    /// Returns the number of pushes queued.
    pub async fn fan_out(&self, recipients: &[UserId], sender: UserId, push: &Push) -> usize {
        let routes = self.routes.read().await;
        let mut queued = 0;

        for user in recipients {
            if *user == sender {
                continue;
            }
            let Some(conns) = routes.get(user) else {
                continue;
            };
            for (conn, tx) in conns {
                if tx.try_send(push.clone()).is_ok() {
                    queued += 1;
                } else {
                    debug!(
                        user = %user,
                        conn = *conn,
                        chat = %push.chat_id,
                        "Dropping push for slow or closed connection"
                    );
                }
            }
        }

        queued
    }

    /// `(online users, live connections)`.
    pub async fn stats(&self) -> (usize, usize) {
        let routes = self.routes.read().await;
        let connections = routes.values().map(HashMap::len).sum();
        (routes.len(), connections)
    }
}
