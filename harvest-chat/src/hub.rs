//! Live fan-out of chat events to connected sessions, grouped by room.
//!
//! Delivery is best-effort: a session that has gone away simply misses the
//! event. The persisted message log is the only replay source.

use async_trait::async_trait;
use harvest_core::types::ChatMessage;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Frames pushed to a session, encoded as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    JoinedChat(Uuid),
    NewMessage {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        message: ChatMessage,
    },
    AdminJoined {
        #[serde(rename = "adminName")]
        admin_name: String,
        message: String,
    },
    MarkedRead {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        count: usize,
    },
    Pong,
    Error(String),
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to encode server event: {}", e);
            r#"{"event":"error","data":"internal error"}"#.to_string()
        })
    }
}

#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Registers a session and returns the stream of events addressed to it.
    async fn connect(&self, session: SessionId, user_id: Uuid) -> mpsc::UnboundedReceiver<ServerEvent>;

    async fn join(&self, session: SessionId, room: Uuid);

    /// Returns the number of sessions the event was handed to.
    async fn broadcast(&self, room: Uuid, event: ServerEvent) -> usize;

    async fn broadcast_except(&self, room: Uuid, except: SessionId, event: ServerEvent) -> usize;

    async fn emit_to_session(&self, session: SessionId, event: ServerEvent) -> bool;

    async fn disconnect(&self, session: SessionId, reason: &str);
}

struct Session {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<Uuid, HashSet<SessionId>>,
}

/// Single-process room hub.
#[derive(Default)]
pub struct MemoryRoomHub {
    state: RwLock<HubState>,
}

impl MemoryRoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn members(&self, room: Uuid) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&room)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    async fn send_to_room(&self, room: Uuid, except: Option<SessionId>, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        let Some(members) = state.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for session_id in members.iter().filter(|id| Some(**id) != except) {
            if let Some(session) = state.sessions.get(session_id) {
                if session.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

#[async_trait]
impl RoomTransport for MemoryRoomHub {
    async fn connect(&self, session: SessionId, user_id: Uuid) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.write().await.sessions.insert(
            session,
            Session {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        tracing::debug!("Session {} connected for user {}", session, user_id);
        rx
    }

    async fn join(&self, session: SessionId, room: Uuid) {
        let mut state = self.state.write().await;
        let Some(entry) = state.sessions.get_mut(&session) else {
            tracing::debug!("Ignoring join of room {} by unknown session {}", room, session);
            return;
        };
        entry.rooms.insert(room);
        state.rooms.entry(room).or_default().insert(session);
    }

    async fn broadcast(&self, room: Uuid, event: ServerEvent) -> usize {
        self.send_to_room(room, None, event).await
    }

    async fn broadcast_except(&self, room: Uuid, except: SessionId, event: ServerEvent) -> usize {
        self.send_to_room(room, Some(except), event).await
    }

    async fn emit_to_session(&self, session: SessionId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        state
            .sessions
            .get(&session)
            .map(|s| s.tx.send(event).is_ok())
            .unwrap_or(false)
    }

    async fn disconnect(&self, session: SessionId, reason: &str) {
        let mut state = self.state.write().await;
        let Some(entry) = state.sessions.remove(&session) else {
            return;
        };
        for room in &entry.rooms {
            let now_empty = match state.rooms.get_mut(room) {
                Some(members) => {
                    members.remove(&session);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.rooms.remove(room);
            }
        }
        tracing::debug!(
            "Session {} of user {} disconnected: {}",
            session,
            entry.user_id,
            reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let id = Uuid::nil();
        assert_eq!(
            ServerEvent::JoinedChat(id).to_json(),
            r#"{"event":"joined-chat","data":"00000000-0000-0000-0000-000000000000"}"#
        );
        assert_eq!(ServerEvent::Pong.to_json(), r#"{"event":"pong"}"#);

        let v: serde_json::Value = serde_json::from_str(
            &ServerEvent::AdminJoined {
                admin_name: "Ada".into(),
                message: "Admin Ada joined the chat for moderation".into(),
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(v["event"], "admin-joined");
        assert_eq!(v["data"]["adminName"], "Ada");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_joined_sessions_only() {
        let hub = MemoryRoomHub::new();
        let room = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut rx_a = hub.connect(a, Uuid::new_v4()).await;
        let mut rx_b = hub.connect(b, Uuid::new_v4()).await;
        let mut rx_c = hub.connect(c, Uuid::new_v4()).await;
        hub.join(a, room).await;
        hub.join(b, room).await;

        assert_eq!(hub.broadcast_except(room, a, ServerEvent::Pong).await, 1);
        assert_eq!(rx_b.recv().await, Some(ServerEvent::Pong));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(hub.broadcast(room, ServerEvent::Pong).await, 2);
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_rooms() {
        let hub = MemoryRoomHub::new();
        let room = Uuid::new_v4();
        let session = Uuid::new_v4();
        let _rx = hub.connect(session, Uuid::new_v4()).await;
        hub.join(session, room).await;
        assert_eq!(hub.members(room).await, 1);

        hub.disconnect(session, "client closed").await;
        assert_eq!(hub.members(room).await, 0);
        assert!(!hub.emit_to_session(session, ServerEvent::Pong).await);
        assert_eq!(hub.broadcast(room, ServerEvent::Pong).await, 0);
    }
}
