//! Realtime gateway: one websocket per client, joined to zero or more room
//! broadcast groups, with presence flips on identify/disconnect. Both this
//! path and the REST facade land in the same stores; history order is always
//! the store's own.

mod broadcast;
mod event;

pub use broadcast::{Broadcaster, ConnId};
pub use event::{ClientEvent, ServerEvent};

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::AppState;
use crate::appresult::AppResult;
use crate::messages::store::{self as messages, MessageKind, MessageView};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(chat_socket))
}

async fn chat_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (conn_id, mut rx) = state.broadcaster.register().await;
    tracing::debug!(conn_id, "realtime connection opened");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Events from one connection are handled strictly in arrival order, and
    // a failed event never tears the connection down.
    let mut identity: Option<Uuid> = None;
    while let Some(Ok(frame)) = stream.next().await {
        let Message::Text(text) = frame else { continue };
        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(conn_id, %err, "discarding unparseable client event");
                continue;
            }
        };
        if let Err(err) = dispatch(&state, conn_id, &mut identity, event).await {
            tracing::warn!(conn_id, %err, "event handler failed");
        }
    }

    if let Some(user_id) = identity {
        match state.presence.disconnect(user_id).await {
            Ok(update) => state.broadcaster.broadcast_all(&update.into()).await,
            Err(err) => tracing::warn!(%user_id, %err, "presence disconnect failed"),
        }
    }
    state.broadcaster.unregister(conn_id).await;
    writer.abort();
    tracing::debug!(conn_id, "realtime connection closed");
}

pub(crate) async fn dispatch(
    state: &AppState,
    conn_id: ConnId,
    identity: &mut Option<Uuid>,
    event: ClientEvent,
) -> AppResult<()> {
    match event {
        ClientEvent::Identify { user_id } => {
            let update = state.presence.connect(user_id).await?;
            *identity = Some(user_id);
            state.broadcaster.broadcast_all(&update.into()).await;
        }
        // The room id is trusted as handed out by the room listing; joining
        // a group does not grant store membership.
        ClientEvent::Join { room_id } => state.broadcaster.join(conn_id, room_id).await,
        ClientEvent::Leave { room_id } => state.broadcaster.leave(conn_id, room_id).await,
        ClientEvent::Send {
            room_id,
            sender_id,
            content,
            message_type,
        } => match deliver(state, room_id, sender_id, &content, message_type).await {
            Ok(message) => {
                state
                    .broadcaster
                    .send_to(
                        conn_id,
                        &ServerEvent::SendResult {
                            ok: true,
                            message_id: Some(message.id),
                            error: None,
                        },
                    )
                    .await;
                state
                    .broadcaster
                    .broadcast_room(room_id, &ServerEvent::ReceiveMessage { message })
                    .await;
            }
            Err(err) => {
                tracing::warn!(%room_id, %err, "send-message failed");
                state
                    .broadcaster
                    .send_to(
                        conn_id,
                        &ServerEvent::SendResult {
                            ok: false,
                            message_id: None,
                            error: Some(err.to_string()),
                        },
                    )
                    .await;
            }
        },
    }
    Ok(())
}

async fn deliver(
    state: &AppState,
    room_id: Uuid,
    sender_id: Uuid,
    content: &str,
    kind: MessageKind,
) -> AppResult<MessageView> {
    let id = messages::append(&state.db_pool, room_id, sender_id, content, kind).await?;
    messages::get_resolved(&state.db_pool, id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::rooms::store::{self as rooms, NewRoom, RoomKind};
    use crate::users;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn test_state() -> AppState {
        AppState::new(test_pool().await)
    }

    fn frames(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    #[tokio::test]
    async fn identify_broadcasts_presence_to_every_connection() {
        let state = test_state().await;
        let user = users::create(&state.db_pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");

        let (c1, mut rx1) = state.broadcaster.register().await;
        let (_c2, mut rx2) = state.broadcaster.register().await;

        let mut identity = None;
        dispatch(&state, c1, &mut identity, ClientEvent::Identify { user_id: user.id })
            .await
            .expect("identify");

        assert_eq!(identity, Some(user.id));
        for rx in [&mut rx1, &mut rx2] {
            let all = frames(rx);
            assert_eq!(all.len(), 1);
            assert!(all[0].contains(r#""event":"user-status-update""#));
            assert!(all[0].contains(r#""status":"online""#));
        }
    }

    #[tokio::test]
    async fn identify_with_unknown_user_surfaces_to_the_event_loop() {
        let state = test_state().await;
        let (c1, mut rx1) = state.broadcaster.register().await;

        let mut identity = None;
        let result = dispatch(
            &state,
            c1,
            &mut identity,
            ClientEvent::Identify {
                user_id: Uuid::now_v7(),
            },
        )
        .await;

        assert!(result.is_err());
        assert!(identity.is_none());
        assert!(frames(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn send_acks_the_origin_and_broadcasts_the_resolved_message() {
        let state = test_state().await;
        let asha = users::create(&state.db_pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let bodhi = users::create(&state.db_pool, "Bodhi", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let room = rooms::create(
            &state.db_pool,
            NewRoom {
                name: None,
                kind: RoomKind::Private,
                members: vec![asha.id, bodhi.id],
                created_by: Some(asha.id),
                description: None,
            },
        )
        .await
        .expect("room");

        let (c1, mut rx1) = state.broadcaster.register().await;
        let (c2, mut rx2) = state.broadcaster.register().await;
        state.broadcaster.join(c1, room.id).await;
        state.broadcaster.join(c2, room.id).await;

        let mut identity = Some(asha.id);
        dispatch(
            &state,
            c1,
            &mut identity,
            ClientEvent::Send {
                room_id: room.id,
                sender_id: asha.id,
                content: "hi".to_owned(),
                message_type: MessageKind::Text,
            },
        )
        .await
        .expect("send");

        // Origin: tagged success ack, then its own copy of the broadcast.
        let origin = frames(&mut rx1);
        assert_eq!(origin.len(), 2);
        assert!(origin[0].contains(r#""event":"send-result""#));
        assert!(origin[0].contains(r#""ok":true"#));
        assert!(origin[1].contains(r#""event":"receive-message""#));

        // Peer: exactly one resolved message.
        let peer = frames(&mut rx2);
        assert_eq!(peer.len(), 1);
        assert!(peer[0].contains(r#""event":"receive-message""#));
        assert!(peer[0].contains(r#""name":"Asha""#));
        assert!(peer[0].contains(r#""content":"hi""#));
    }

    #[tokio::test]
    async fn failed_send_returns_a_tagged_failure_to_the_origin_only() {
        let state = test_state().await;
        let asha = users::create(&state.db_pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");

        let unknown_room = Uuid::now_v7();
        let (c1, mut rx1) = state.broadcaster.register().await;
        let (c2, mut rx2) = state.broadcaster.register().await;
        state.broadcaster.join(c1, unknown_room).await;
        state.broadcaster.join(c2, unknown_room).await;

        let mut identity = Some(asha.id);
        dispatch(
            &state,
            c1,
            &mut identity,
            ClientEvent::Send {
                room_id: unknown_room,
                sender_id: asha.id,
                content: "hi".to_owned(),
                message_type: MessageKind::Text,
            },
        )
        .await
        .expect("send event is caught, not fatal");

        let origin = frames(&mut rx1);
        assert_eq!(origin.len(), 1);
        assert!(origin[0].contains(r#""event":"send-result""#));
        assert!(origin[0].contains(r#""ok":false"#));
        assert!(frames(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn join_and_leave_control_room_delivery() {
        let state = test_state().await;
        let asha = users::create(&state.db_pool, "Asha", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let bodhi = users::create(&state.db_pool, "Bodhi", users::DEFAULT_AVATAR)
            .await
            .expect("user");
        let room = rooms::create(
            &state.db_pool,
            NewRoom {
                name: None,
                kind: RoomKind::Private,
                members: vec![asha.id, bodhi.id],
                created_by: Some(asha.id),
                description: None,
            },
        )
        .await
        .expect("room");

        let (c1, mut rx1) = state.broadcaster.register().await;
        let (c2, mut rx2) = state.broadcaster.register().await;

        let mut identity = Some(asha.id);
        dispatch(&state, c1, &mut identity, ClientEvent::Join { room_id: room.id })
            .await
            .expect("join");
        dispatch(&state, c2, &mut None, ClientEvent::Join { room_id: room.id })
            .await
            .expect("join");
        dispatch(&state, c2, &mut None, ClientEvent::Leave { room_id: room.id })
            .await
            .expect("leave");

        dispatch(
            &state,
            c1,
            &mut identity,
            ClientEvent::Send {
                room_id: room.id,
                sender_id: asha.id,
                content: "anyone here?".to_owned(),
                message_type: MessageKind::Text,
            },
        )
        .await
        .expect("send");

        assert_eq!(frames(&mut rx1).len(), 2); // ack + own broadcast copy
        assert!(frames(&mut rx2).is_empty());
    }
}
