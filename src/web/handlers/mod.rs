//! API handlers.

pub mod chat;

use std::sync::Arc;

use crate::chat::{ChatStore, HubHandle};
use crate::config::ChatConfig;

pub use chat::{
    create_chatroom, get_chatroom, list_chatrooms, list_chats, ChatHistoryQuery,
    ChatroomListResponse, CreateChatroomRequest, CreateChatroomResponse,
};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Chat hub the WebSocket acceptor registers connections with.
    pub hub: HubHandle,
    /// Membership and history lookups.
    pub store: Arc<dyn ChatStore>,
    /// Chat tuning, used for outbound queue and frame sizes.
    pub chat: ChatConfig,
}

impl AppState {
    /// Create a new application state.
    pub fn new(hub: HubHandle, store: Arc<dyn ChatStore>, chat: ChatConfig) -> Self {
        Self { hub, store, chat }
    }
}
