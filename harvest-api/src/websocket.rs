use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use harvest_chat::{ChatService, ServerEvent, SessionId};
use harvest_core::types::Actor;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{extract_token, verify_token};
use crate::error::public_message;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Frames a client may send, encoded as `{"event": ..., "data": ...}`.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinChat(Uuid),
    SendMessage {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
        message: String,
    },
    AdminJoinChat(Uuid),
    MarkRead(Uuid),
    Ping,
}

/// The token is checked once, before the upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<ApiState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok());
    let Some(token) = query.token.or_else(|| extract_token(header)) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let actor = match verify_token(&token, state.jwt_secret()) {
        Ok(actor) => actor,
        Err(status) => return status.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, actor, state.chat))
}

async fn handle_socket(socket: WebSocket, actor: Actor, chat: ChatService) {
    let session: SessionId = Uuid::new_v4();
    let transport = chat.transport().clone();
    let mut events = transport.connect(session, actor.id).await;
    tracing::info!("WebSocket session {} opened for {}", session, actor.id);

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = sender.send(Message::Text(event.to_json())).await {
                tracing::debug!("WebSocket send failed: {}", e);
                return;
            }
        }
    });

    let recv_actor = actor.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_frame(&chat, &recv_actor, session, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("WebSocket receive failed: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    transport.disconnect(session, "connection closed").await;
    tracing::info!("WebSocket session {} closed for {}", session, actor.id);
}

/// Handles one client frame. Replies go to this session only; chat
/// messages reach the room through the service's broadcast.
pub async fn handle_frame(chat: &ChatService, actor: &Actor, session: SessionId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            reply(chat, session, ServerEvent::Error(format!("invalid event: {}", e))).await;
            return;
        }
    };

    let outcome = match event {
        ClientEvent::JoinChat(chat_id) => chat
            .join(actor, session, chat_id)
            .await
            .map(|_| Some(ServerEvent::JoinedChat(chat_id))),
        ClientEvent::AdminJoinChat(chat_id) => chat
            .admin_join(actor, session, chat_id)
            .await
            .map(|_| Some(ServerEvent::JoinedChat(chat_id))),
        ClientEvent::SendMessage { chat_id, message } => {
            chat.send(actor, chat_id, &message).await.map(|_| None)
        }
        ClientEvent::MarkRead(chat_id) => chat
            .mark_read(actor, chat_id)
            .await
            .map(|count| Some(ServerEvent::MarkedRead { chat_id, count })),
        ClientEvent::Ping => Ok(Some(ServerEvent::Pong)),
    };

    match outcome {
        Ok(Some(event)) => reply(chat, session, event).await,
        Ok(None) => {}
        Err(e) => reply(chat, session, ServerEvent::Error(public_message(&e))).await,
    }
}

async fn reply(chat: &ChatService, session: SessionId, event: ServerEvent) {
    if !chat.transport().emit_to_session(session, event).await {
        tracing::debug!("Session {} went away before its reply", session);
    }
}
