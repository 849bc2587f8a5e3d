//! Database schema and migrations for marketchat.
//!
//! Migrations are applied in order when the database is opened.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Chatrooms and their participants
    r#"
-- One chatroom per (product, buyer) conversation
CREATE TABLE chatrooms (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id  INTEGER NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_chatrooms_product_id ON chatrooms(product_id);

-- Room-scoped participant identity
CREATE TABLE chat_users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    chatroom_id  INTEGER NOT NULL REFERENCES chatrooms(id) ON DELETE CASCADE,
    user_id      TEXT NOT NULL,
    role         TEXT NOT NULL,          -- 'SELLER' or 'BUYER'
    created_at   TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(chatroom_id, user_id)
);

CREATE INDEX idx_chat_users_user_id ON chat_users(user_id);
"#,
    // v2: Chat messages
    r#"
CREATE TABLE chats (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    chatroom_id   INTEGER NOT NULL REFERENCES chatrooms(id) ON DELETE CASCADE,
    chat_user_id  INTEGER NOT NULL REFERENCES chat_users(id),
    content       TEXT NOT NULL,
    send_date     TEXT NOT NULL          -- RFC 3339, UTC
);

CREATE INDEX idx_chats_chatroom_id ON chats(chatroom_id, id);
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_not_empty() {
        assert!(!MIGRATIONS.is_empty());
        for migration in MIGRATIONS {
            assert!(!migration.trim().is_empty());
        }
    }
}
