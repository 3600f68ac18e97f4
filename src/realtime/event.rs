//! Wire events for the realtime channel. JSON frames tagged by an `event`
//! field, keeping the event names the REST clients' socket library already
//! uses.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::store::{MessageKind, MessageView};
use crate::presence::PresenceUpdate;
use crate::users::OnlineStatus;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// Associates the connection with a verified user id and flips them
    /// online.
    #[serde(rename = "user-online", rename_all = "camelCase")]
    Identify { user_id: Uuid },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    Join { room_id: Uuid },
    #[serde(rename = "leave-room", rename_all = "camelCase")]
    Leave { room_id: Uuid },
    #[serde(rename = "send-message", rename_all = "camelCase")]
    Send {
        room_id: Uuid,
        sender_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageKind,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Room-scoped fan-out of a freshly persisted message, sender resolved.
    #[serde(rename = "receive-message")]
    ReceiveMessage { message: MessageView },
    /// Global presence broadcast.
    #[serde(rename = "user-status-update", rename_all = "camelCase")]
    UserStatusUpdate {
        user_id: Uuid,
        status: OnlineStatus,
        last_seen: i64,
    },
    /// Explicit acknowledgment to the connection that issued a send, so a
    /// client can tell "sent" from "lost".
    #[serde(rename = "send-result", rename_all = "camelCase")]
    SendResult {
        ok: bool,
        message_id: Option<Uuid>,
        error: Option<String>,
    },
}

impl From<PresenceUpdate> for ServerEvent {
    fn from(update: PresenceUpdate) -> Self {
        ServerEvent::UserStatusUpdate {
            user_id: update.user_id,
            status: update.status,
            last_seen: update.last_seen,
        }
    }
}
