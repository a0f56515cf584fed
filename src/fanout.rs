//! Notification Fan-out: per-user live event delivery.
//!
//! Addressing is by user id, not room — a user's every live connection
//! receives the notification regardless of room membership. No durability:
//! offline users miss the event, and persisted notification records belong
//! to the administrative layer, not here.

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

use crate::events::{ServerEvent, UserNotification};
use crate::hub::ConnectionId;

#[derive(Default)]
pub struct NotificationFanout {
    users: RwLock<HashMap<String, HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered at authentication time, one entry per live connection.
    pub async fn register(
        &self,
        user_id: &str,
        conn_id: ConnectionId,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.users
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id, tx);
    }

    pub async fn deregister(&self, user_id: &str, conn_id: ConnectionId) {
        let mut users = self.users.write().await;
        if let Some(conns) = users.get_mut(user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                users.remove(user_id);
            }
        }
    }

    /// Delivers to every live connection of the user. Returns how many
    /// connections were reached; zero simply means the user is offline.
    pub async fn notify_user(&self, user_id: &str, notification: UserNotification) -> usize {
        let users = self.users.read().await;
        let Some(conns) = users.get(user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, tx) in conns {
            match tx.send(ServerEvent::Notification(notification.clone())) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::debug!(
                        connection_id = %conn_id,
                        "Skipped notification to closed connection"
                    );
                }
            }
        }
        delivered
    }
}
