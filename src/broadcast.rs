//! Broadcast Engine: non-durable push of an event to every connection in a
//! room.
//!
//! Delivery is best-effort: a connection that is not joined simply misses
//! the event and catches up through history. Callers invoke `broadcast`
//! synchronously after the store append returns, which is what preserves
//! per-group FIFO relative to store order — there is no batching or
//! reordering here.

use std::sync::Arc;

use crate::events::ServerEvent;
use crate::hub::{ConnectionId, RoomHub};

#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<RoomHub>,
}

impl Broadcaster {
    pub fn new(hub: Arc<RoomHub>) -> Self {
        Self { hub }
    }

    /// Delivers `event` to every connection currently in the room, skipping
    /// at most one explicitly excluded origin connection. A dead channel is
    /// logged and skipped; it never blocks or fails delivery to the rest of
    /// the room. Returns the number of connections reached.
    pub async fn broadcast(
        &self,
        group_id: &str,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.hub.members_of(group_id).await;
        let mut delivered = 0;

        for (conn_id, member) in members {
            if Some(conn_id) == exclude {
                continue;
            }
            match member.tx.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Connection is tearing down; its own cleanup removes it
                    // from the hub.
                    tracing::debug!(
                        group_id = %group_id,
                        connection_id = %conn_id,
                        "Skipped broadcast to closed connection"
                    );
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn typing(group: &str, user: &str) -> ServerEvent {
        ServerEvent::UserTyping {
            group_id: group.into(),
            user_id: user.into(),
        }
    }

    #[tokio::test]
    async fn excluded_origin_does_not_receive() {
        let hub = Arc::new(RoomHub::new());
        let broadcaster = Broadcaster::new(hub.clone());

        let origin = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let (origin_tx, mut origin_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();

        hub.join(origin, "g1", "u1", origin_tx).await;
        hub.join(peer, "g1", "u2", peer_tx).await;

        let delivered = broadcaster
            .broadcast("g1", typing("g1", "u1"), Some(origin))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(peer_rx.recv().await, Some(typing("g1", "u1")));
        assert!(origin_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_channel_does_not_block_the_rest() {
        let hub = Arc::new(RoomHub::new());
        let broadcaster = Broadcaster::new(hub.clone());

        let dead = Uuid::new_v4();
        let alive = Uuid::new_v4();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (alive_tx, mut alive_rx) = mpsc::unbounded_channel();

        hub.join(dead, "g1", "u1", dead_tx).await;
        hub.join(alive, "g1", "u2", alive_tx).await;
        drop(dead_rx);

        let delivered = broadcaster.broadcast("g1", typing("g1", "u3"), None).await;

        assert_eq!(delivered, 1);
        assert_eq!(alive_rx.recv().await, Some(typing("g1", "u3")));
    }

    #[tokio::test]
    async fn other_rooms_are_isolated() {
        let hub = Arc::new(RoomHub::new());
        let broadcaster = Broadcaster::new(hub.clone());

        let other = Uuid::new_v4();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        hub.join(other, "g2", "u9", other_tx).await;

        let delivered = broadcaster.broadcast("g1", typing("g1", "u1"), None).await;

        assert_eq!(delivered, 0);
        assert!(other_rx.try_recv().is_err());
    }
}
