//! Room Hub: the live, in-memory subscription state.
//!
//! One owned object holds every room's membership behind a single lock;
//! nothing else in the process keeps socket-to-room state. Subscriptions
//! are ephemeral — they exist only while the connection does.

use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::events::ServerEvent;

pub type ConnectionId = Uuid;

/// A connection subscribed to a room, with the channel the broadcast engine
/// delivers through.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub user_id: String,
    pub tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct HubState {
    /// group_id -> connections currently in the room
    rooms: HashMap<String, HashMap<ConnectionId, RoomMember>>,
    /// reverse index for disconnect cleanup
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

#[derive(Default)]
pub struct RoomHub {
    state: RwLock<HubState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room. Idempotent: re-joining is a no-op and
    /// membership stays a set. Joining does not notify peers.
    pub async fn join(
        &self,
        conn_id: ConnectionId,
        group_id: &str,
        user_id: &str,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let mut state = self.state.write().await;
        state
            .rooms
            .entry(group_id.to_string())
            .or_default()
            .entry(conn_id)
            .or_insert_with(|| RoomMember {
                user_id: user_id.to_string(),
                tx,
            });
        state
            .memberships
            .entry(conn_id)
            .or_default()
            .insert(group_id.to_string());
    }

    /// Removes a connection from a room. Leaving a room the connection is
    /// not in is a no-op, not an error.
    pub async fn leave(&self, conn_id: ConnectionId, group_id: &str) {
        let mut state = self.state.write().await;
        if let Some(members) = state.rooms.get_mut(group_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                state.rooms.remove(group_id);
            }
        }
        if let Some(rooms) = state.memberships.get_mut(&conn_id) {
            rooms.remove(group_id);
            if rooms.is_empty() {
                state.memberships.remove(&conn_id);
            }
        }
    }

    /// Removes the connection from every room it is in. Invoked on every
    /// disconnect path, clean or abnormal.
    pub async fn drop_connection(&self, conn_id: ConnectionId) {
        let mut state = self.state.write().await;
        if let Some(rooms) = state.memberships.remove(&conn_id) {
            for group_id in rooms {
                if let Some(members) = state.rooms.get_mut(&group_id) {
                    members.remove(&conn_id);
                    if members.is_empty() {
                        state.rooms.remove(&group_id);
                    }
                }
            }
        }
    }

    pub async fn is_joined(&self, conn_id: ConnectionId, group_id: &str) -> bool {
        let state = self.state.read().await;
        state
            .memberships
            .get(&conn_id)
            .map(|rooms| rooms.contains(group_id))
            .unwrap_or(false)
    }

    /// Snapshot of a room's members for the broadcast engine.
    pub async fn members_of(&self, group_id: &str) -> Vec<(ConnectionId, RoomMember)> {
        let state = self.state.read().await;
        state
            .rooms
            .get(group_id)
            .map(|members| members.iter().map(|(id, m)| (*id, m.clone())).collect())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, group_id: &str) -> usize {
        let state = self.state.read().await;
        state.rooms.get(group_id).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn join_is_idempotent() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        hub.join(conn, "g1", "u1", tx.clone()).await;
        hub.join(conn, "g1", "u1", tx).await;

        assert_eq!(hub.room_size("g1").await, 1);
        assert!(hub.is_joined(conn, "g1").await);
    }

    #[tokio::test]
    async fn leave_unknown_room_is_noop() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        hub.leave(conn, "nowhere").await;
        assert_eq!(hub.room_size("nowhere").await, 0);
    }

    #[tokio::test]
    async fn drop_connection_clears_every_room() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        hub.join(conn, "g1", "u1", tx.clone()).await;
        hub.join(conn, "g2", "u1", tx).await;
        hub.drop_connection(conn).await;

        assert!(!hub.is_joined(conn, "g1").await);
        assert!(!hub.is_joined(conn, "g2").await);
        assert_eq!(hub.room_size("g1").await, 0);
        assert_eq!(hub.room_size("g2").await, 0);
    }
}
