//! Chat store collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::event::{ChatEvent, ChatroomId};
use crate::Result;

/// A chatroom between the seller of a product and one buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chatroom {
    pub id: ChatroomId,
    pub product_id: i64,
    pub seller_id: String,
    pub buyer_id: String,
}

/// Persistence and membership lookups used by the hub and the pumps.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Check whether `user_id` is a participant (buyer or seller) of the chatroom.
    async fn verify_membership(&self, user_id: &str, chatroom_id: ChatroomId) -> Result<bool>;

    /// Durably record a message and return it in persisted form.
    ///
    /// The store assigns the message ID and timestamp.
    async fn persist_message(
        &self,
        chatroom_id: ChatroomId,
        user_id: &str,
        body: &str,
    ) -> Result<ChatEvent>;

    /// Look up the chatroom for a product between a seller and a buyer,
    /// creating it with both participants if absent.
    ///
    /// Fails with a validation error when seller and buyer are the same user.
    async fn open_chatroom(
        &self,
        product_id: i64,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatroomId>;

    /// Fetch a chatroom with its participants.
    async fn get_chatroom(&self, chatroom_id: ChatroomId) -> Result<Option<Chatroom>>;

    /// List the chatrooms `user_id` participates in.
    async fn resolve_room_participants(&self, user_id: &str) -> Result<Vec<ChatroomId>>;

    /// Page through a chatroom's history, newest first.
    ///
    /// `last` is an exclusive upper bound on message IDs.
    async fn list_chats(
        &self,
        chatroom_id: ChatroomId,
        last: Option<i64>,
        size: usize,
    ) -> Result<Vec<ChatEvent>>;
}
