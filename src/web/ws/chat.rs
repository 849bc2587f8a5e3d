//! Chat WebSocket handler.
//!
//! Authenticates the caller, upgrades the request and hands the resulting
//! connection to the hub. Everything after the upgrade happens in the pumps.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{future, SinkExt, StreamExt};

use crate::chat::{ChatroomId, Connection, Frame, Transport};
use crate::web::extract::ApiPath;
use crate::web::handlers::AppState;
use crate::web::middleware::AuthUser;
use crate::ChatError;

/// WebSocket chat handler.
///
/// GET /api/chatrooms/:chatroom_id/ws
///
/// The token is read from the `Authorization` header or the `token` query
/// parameter. Unauthenticated requests get 401 and are never upgraded.
pub async fn chat_ws_handler(
    State(state): State<Arc<AppState>>,
    ApiPath(chatroom_id): ApiPath<ChatroomId>,
    AuthUser(claims): AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = claims.sub;
    tracing::info!(%user_id, chatroom_id, "WebSocket upgrade requested");

    let hub = state.hub.clone();
    let queue_capacity = state.chat.send_queue_capacity;

    ws.max_message_size(state.chat.max_message_size)
        .on_upgrade(move |socket| async move {
            let connection = Connection::new(user_id, transport_from_socket(socket), queue_capacity);
            let connection_id = connection.id();
            if let Err(e) = hub.register(connection, chatroom_id).await {
                tracing::warn!(%connection_id, chatroom_id, error = %e, "failed to hand connection to hub");
            }
        })
}

/// Adapt an axum WebSocket into a chat [`Transport`].
pub fn transport_from_socket(socket: WebSocket) -> Transport {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(|e| ChatError::Transport(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, ChatError>(frame_to_message(frame))));

    let stream = stream.map(|result| {
        result
            .map(message_to_frame)
            .map_err(|e| ChatError::Transport(e.to_string()))
    });

    Transport::new(sink, stream)
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close => Message::Close(None),
    }
}

fn message_to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(bytes) => Frame::Binary(bytes),
        Message::Ping(payload) => Frame::Ping(payload),
        Message::Pong(payload) => Frame::Pong(payload),
        Message::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_message_mapping() {
        assert!(matches!(
            frame_to_message(Frame::Text("hi".into())),
            Message::Text(text) if text == "hi"
        ));
        assert!(matches!(frame_to_message(Frame::Close), Message::Close(None)));
        assert_eq!(message_to_frame(Message::Ping(vec![1])), Frame::Ping(vec![1]));
        assert_eq!(message_to_frame(Message::Close(None)), Frame::Close);
    }
}
