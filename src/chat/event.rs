//! Chat event types exchanged over the streaming transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chatroom identifier.
pub type ChatroomId = i64;

/// A chat message as sent by a client.
///
/// Wire shape: `{ "message": "...", "userId": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingChat {
    /// Chat body.
    pub message: String,
    /// Sender's user ID.
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// A persisted, broadcast-ready chat message.
///
/// Serialized as the inbound shape plus the fields assigned by the store,
/// so clients that only read `message` and `userId` keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// Store-assigned message ID.
    pub id: i64,
    /// Chatroom the message was sent to.
    pub chatroom_id: ChatroomId,
    /// Sender's user ID.
    pub user_id: String,
    /// Chat body.
    pub message: String,
    /// Time the store recorded the message.
    pub send_date: DateTime<Utc>,
}
