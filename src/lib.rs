//! marketchat - real-time buyer/seller chat for a marketplace backend.
//!
//! A hub task admits authenticated WebSocket connections into chatrooms,
//! persists every inbound message through a [`ChatStore`] and fans it out
//! to every live connection in the room.

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod web;

pub use chat::{
    ChatEvent, ChatStore, Chatroom, ChatroomId, Connection, ConnectionId, ConnectionState, Frame,
    Hub, HubHandle, HubStats, IncomingChat, Lifecycle, Transport,
};
pub use config::Config;
pub use db::{Database, ParticipantRole, SqliteChatStore};
pub use error::{ChatError, Result};
pub use web::WebServer;
