//! SQLite implementation of the chat store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::chat::{ChatEvent, ChatStore, Chatroom, ChatroomId};
use crate::{ChatError, Result};

/// Role of a participant within one chatroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    /// Owner of the listed product.
    Seller,
    /// User who opened the conversation.
    Buyer,
}

impl ParticipantRole {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Seller => "SELLER",
            ParticipantRole::Buyer => "BUYER",
        }
    }
}

type ChatRow = (i64, ChatroomId, String, String, DateTime<Utc>);

fn chat_from_row((id, chatroom_id, user_id, message, send_date): ChatRow) -> ChatEvent {
    ChatEvent {
        id,
        chatroom_id,
        user_id,
        message,
        send_date,
    }
}

/// Chat store backed by the `chatrooms`, `chat_users` and `chats` tables.
#[derive(Debug, Clone)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn open_chatroom(
        &self,
        product_id: i64,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatroomId> {
        if seller_id == buyer_id {
            return Err(ChatError::Validation(
                "cannot open a chatroom with yourself".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let existing: Option<ChatroomId> = sqlx::query_scalar(
            "SELECT c.id FROM chatrooms c
             JOIN chat_users s ON s.chatroom_id = c.id AND s.role = 'SELLER' AND s.user_id = ?
             JOIN chat_users b ON b.chatroom_id = c.id AND b.role = 'BUYER' AND b.user_id = ?
             WHERE c.product_id = ?
             LIMIT 1",
        )
        .bind(seller_id)
        .bind(buyer_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(chatroom_id) = existing {
            tx.commit().await?;
            return Ok(chatroom_id);
        }

        let chatroom_id = sqlx::query("INSERT INTO chatrooms (product_id) VALUES (?)")
            .bind(product_id)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for (user_id, role) in [
            (seller_id, ParticipantRole::Seller),
            (buyer_id, ParticipantRole::Buyer),
        ] {
            sqlx::query("INSERT INTO chat_users (chatroom_id, user_id, role) VALUES (?, ?, ?)")
                .bind(chatroom_id)
                .bind(user_id)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(chatroom_id, product_id, "chatroom created");

        Ok(chatroom_id)
    }

    async fn get_chatroom(&self, chatroom_id: ChatroomId) -> Result<Option<Chatroom>> {
        let row: Option<(ChatroomId, i64, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT c.id, c.product_id,
                    (SELECT user_id FROM chat_users WHERE chatroom_id = c.id AND role = 'SELLER'),
                    (SELECT user_id FROM chat_users WHERE chatroom_id = c.id AND role = 'BUYER')
             FROM chatrooms c
             WHERE c.id = ?",
        )
        .bind(chatroom_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, product_id, seller_id, buyer_id)| Chatroom {
            id,
            product_id,
            seller_id: seller_id.unwrap_or_default(),
            buyer_id: buyer_id.unwrap_or_default(),
        }))
    }

    async fn verify_membership(&self, user_id: &str, chatroom_id: ChatroomId) -> Result<bool> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chat_users WHERE chatroom_id = ? AND user_id = ?)",
        )
        .bind(chatroom_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(member)
    }

    async fn persist_message(
        &self,
        chatroom_id: ChatroomId,
        user_id: &str,
        body: &str,
    ) -> Result<ChatEvent> {
        let chat_user_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM chat_users WHERE chatroom_id = ? AND user_id = ?")
                .bind(chatroom_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let chat_user_id = chat_user_id.ok_or_else(|| {
            ChatError::Permission(format!(
                "user {user_id} is not a participant of chatroom {chatroom_id}"
            ))
        })?;

        let send_date = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chats (chatroom_id, chat_user_id, content, send_date)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(chatroom_id)
        .bind(chat_user_id)
        .bind(body)
        .bind(send_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatEvent {
            id,
            chatroom_id,
            user_id: user_id.to_string(),
            message: body.to_string(),
            send_date,
        })
    }

    async fn resolve_room_participants(&self, user_id: &str) -> Result<Vec<ChatroomId>> {
        let rooms: Vec<ChatroomId> = sqlx::query_scalar(
            "SELECT chatroom_id FROM chat_users WHERE user_id = ? ORDER BY chatroom_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rooms)
    }

    async fn list_chats(
        &self,
        chatroom_id: ChatroomId,
        last: Option<i64>,
        size: usize,
    ) -> Result<Vec<ChatEvent>> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT c.id, c.chatroom_id, u.user_id, c.content, c.send_date
             FROM chats c
             JOIN chat_users u ON u.id = c.chat_user_id
             WHERE c.chatroom_id = ? AND (? IS NULL OR c.id < ?)
             ORDER BY c.id DESC
             LIMIT ?",
        )
        .bind(chatroom_id)
        .bind(last)
        .bind(last)
        .bind(size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(chat_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> SqliteChatStore {
        let db = Database::open_in_memory().await.unwrap();
        SqliteChatStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_open_chatroom_creates_participants() {
        let store = setup().await;
        let room = store.open_chatroom(10, "seller", "buyer").await.unwrap();

        assert!(store.verify_membership("seller", room).await.unwrap());
        assert!(store.verify_membership("buyer", room).await.unwrap());
        assert!(!store.verify_membership("stranger", room).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_chatroom_reuses_existing() {
        let store = setup().await;
        let first = store.open_chatroom(10, "seller", "buyer").await.unwrap();
        let again = store.open_chatroom(10, "seller", "buyer").await.unwrap();
        let other_buyer = store.open_chatroom(10, "seller", "buyer2").await.unwrap();
        let other_product = store.open_chatroom(11, "seller", "buyer").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other_buyer);
        assert_ne!(first, other_product);
    }

    #[tokio::test]
    async fn test_open_chatroom_with_self_rejected() {
        let store = setup().await;
        let result = store.open_chatroom(10, "alice", "alice").await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_chatroom() {
        let store = setup().await;
        let room = store.open_chatroom(10, "seller", "buyer").await.unwrap();

        let chatroom = store.get_chatroom(room).await.unwrap().unwrap();
        assert_eq!(
            chatroom,
            Chatroom {
                id: room,
                product_id: 10,
                seller_id: "seller".to_string(),
                buyer_id: "buyer".to_string(),
            }
        );
        assert!(store.get_chatroom(room + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_message() {
        let store = setup().await;
        let room = store.open_chatroom(10, "seller", "buyer").await.unwrap();

        let event = store.persist_message(room, "buyer", "is it available?").await.unwrap();
        assert!(event.id > 0);
        assert_eq!(event.chatroom_id, room);
        assert_eq!(event.user_id, "buyer");
        assert_eq!(event.message, "is it available?");

        let next = store.persist_message(room, "seller", "yes").await.unwrap();
        assert!(next.id > event.id);
    }

    #[tokio::test]
    async fn test_persist_message_requires_participant() {
        let store = setup().await;
        let room = store.open_chatroom(10, "seller", "buyer").await.unwrap();

        let result = store.persist_message(room, "stranger", "hello").await;
        assert!(matches!(result, Err(ChatError::Permission(_))));
    }

    #[tokio::test]
    async fn test_resolve_room_participants() {
        let store = setup().await;
        let a = store.open_chatroom(1, "seller", "buyer").await.unwrap();
        let b = store.open_chatroom(2, "buyer", "seller").await.unwrap();
        let _c = store.open_chatroom(3, "seller", "other").await.unwrap();

        assert_eq!(store.resolve_room_participants("buyer").await.unwrap(), vec![a, b]);
        assert!(store.resolve_room_participants("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_chats_newest_first_with_cursor() {
        let store = setup().await;
        let room = store.open_chatroom(10, "seller", "buyer").await.unwrap();
        let other = store.open_chatroom(11, "seller", "buyer").await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let event = store
                .persist_message(room, "buyer", &format!("msg {i}"))
                .await
                .unwrap();
            ids.push(event.id);
        }
        store.persist_message(other, "seller", "elsewhere").await.unwrap();

        let page = store.list_chats(room, None, 3).await.unwrap();
        let page_ids: Vec<i64> = page.iter().map(|c| c.id).collect();
        assert_eq!(page_ids, vec![ids[4], ids[3], ids[2]]);
        assert_eq!(page[0].message, "msg 4");
        assert_eq!(page[0].user_id, "buyer");

        let rest = store.list_chats(room, Some(ids[2]), 3).await.unwrap();
        let rest_ids: Vec<i64> = rest.iter().map(|c| c.id).collect();
        assert_eq!(rest_ids, vec![ids[1], ids[0]]);
    }
}
