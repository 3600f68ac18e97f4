use std::collections::{HashMap, HashSet};

use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use super::event::ServerEvent;

pub type ConnId = u64;

/// Registry of live connections and the room broadcast groups they have
/// joined. Constructed once at startup and carried in `AppState`; every
/// connection handler works through this one instance.
///
/// Frames are serialized once per broadcast and fanned out as JSON strings
/// over each connection's unbounded channel; the per-connection writer task
/// owns the socket sink.
#[derive(Default)]
pub struct Broadcaster {
    inner: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: ConnId,
    connections: HashMap<ConnId, mpsc::UnboundedSender<String>>,
    rooms: HashMap<Uuid, HashSet<ConnId>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.inner.lock().await;
        let id = registry.next_id;
        registry.next_id += 1;
        registry.connections.insert(id, tx);
        (id, rx)
    }

    /// Drops the connection from the registry and from every room group it
    /// joined.
    pub async fn unregister(&self, conn: ConnId) {
        let mut registry = self.inner.lock().await;
        registry.connections.remove(&conn);
        registry.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    pub async fn join(&self, conn: ConnId, room: Uuid) {
        let mut registry = self.inner.lock().await;
        registry.rooms.entry(room).or_default().insert(conn);
    }

    pub async fn leave(&self, conn: ConnId, room: Uuid) {
        let mut registry = self.inner.lock().await;
        if let Some(members) = registry.rooms.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                registry.rooms.remove(&room);
            }
        }
    }

    /// Delivers to a single connection; used for send acknowledgments.
    pub async fn send_to(&self, conn: ConnId, event: &ServerEvent) {
        let Some(payload) = encode(event) else { return };
        let registry = self.inner.lock().await;
        if let Some(tx) = registry.connections.get(&conn) {
            let _ = tx.send(payload);
        }
    }

    /// Presence is global: every live connection gets the frame.
    pub async fn broadcast_all(&self, event: &ServerEvent) {
        let Some(payload) = encode(event) else { return };
        let registry = self.inner.lock().await;
        for tx in registry.connections.values() {
            let _ = tx.send(payload.clone());
        }
    }

    /// Room-scoped fan-out, the sender's own other connections included.
    pub async fn broadcast_room(&self, room: Uuid, event: &ServerEvent) {
        let Some(payload) = encode(event) else { return };
        let registry = self.inner.lock().await;
        let Some(members) = registry.rooms.get(&room) else {
            return;
        };
        for conn in members {
            if let Some(tx) = registry.connections.get(conn) {
                let _ = tx.send(payload.clone());
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::error!(%err, "failed to encode server event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_event() -> ServerEvent {
        ServerEvent::SendResult {
            ok: true,
            message_id: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn room_broadcast_reaches_only_joined_connections() {
        let broadcaster = Broadcaster::new();
        let (c1, mut rx1) = broadcaster.register().await;
        let (c2, mut rx2) = broadcaster.register().await;
        let (_c3, mut rx3) = broadcaster.register().await;

        let room = Uuid::now_v7();
        broadcaster.join(c1, room).await;
        broadcaster.join(c2, room).await;

        broadcaster.broadcast_room(room, &probe_event()).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_broadcast_reaches_every_connection() {
        let broadcaster = Broadcaster::new();
        let (_c1, mut rx1) = broadcaster.register().await;
        let (_c2, mut rx2) = broadcaster.register().await;

        broadcaster.broadcast_all(&probe_event()).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn leave_and_unregister_stop_delivery() {
        let broadcaster = Broadcaster::new();
        let (c1, mut rx1) = broadcaster.register().await;
        let (c2, mut rx2) = broadcaster.register().await;

        let room = Uuid::now_v7();
        broadcaster.join(c1, room).await;
        broadcaster.join(c2, room).await;

        broadcaster.leave(c1, room).await;
        broadcaster.broadcast_room(room, &probe_event()).await;
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        broadcaster.unregister(c2).await;
        broadcaster.broadcast_room(room, &probe_event()).await;
        broadcaster.broadcast_all(&probe_event()).await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_targets_a_single_connection() {
        let broadcaster = Broadcaster::new();
        let (c1, mut rx1) = broadcaster.register().await;
        let (_c2, mut rx2) = broadcaster.register().await;

        broadcaster.send_to(c1, &probe_event()).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
