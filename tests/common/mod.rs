//! Test helpers for hub and end-to-end tests.
//!
//! Provides an in-memory transport peer, a mock chat store and polling
//! helpers for hub state.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Instant};

use marketchat::chat::{
    ChatEvent, ChatStore, Chatroom, ChatroomId, Frame, HubHandle, HubStats, Transport,
};
use marketchat::config::ChatConfig;
use marketchat::{ChatError, Result};

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Chat settings with long deadlines so only the test decides when things time out.
pub fn test_config() -> ChatConfig {
    ChatConfig {
        write_wait_ms: 2_000,
        pong_wait_ms: 10_000,
        ping_period_ms: None,
        max_message_size: 512,
        send_queue_capacity: 16,
        room_queue_capacity: 16,
        hub_queue_capacity: 16,
    }
}

/// The client end of an in-memory transport.
pub struct Peer {
    to_server: mpsc::UnboundedSender<Result<Frame>>,
    from_server: BoxStream<'static, Frame>,
}

/// Transport whose outbound side never blocks.
pub fn memory_transport() -> (Transport, Peer) {
    let (out_tx, out_rx) = mpsc::unbounded::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded::<Result<Frame>>();

    let sink = out_tx.sink_map_err(|e| ChatError::Transport(e.to_string()));
    let peer = Peer {
        to_server: in_tx,
        from_server: out_rx.boxed(),
    };
    (Transport::new(sink, in_rx), peer)
}

/// Transport whose outbound side accepts one frame and then stalls until
/// the peer reads.
pub fn stalling_transport() -> (Transport, Peer) {
    let (out_tx, out_rx) = mpsc::channel::<Frame>(0);
    let (in_tx, in_rx) = mpsc::unbounded::<Result<Frame>>();

    let sink = out_tx.sink_map_err(|e| ChatError::Transport(e.to_string()));
    let peer = Peer {
        to_server: in_tx,
        from_server: out_rx.boxed(),
    };
    (Transport::new(sink, in_rx), peer)
}

impl Peer {
    /// Send a raw frame to the server.
    pub fn send(&self, frame: Frame) {
        let _ = self.to_server.unbounded_send(Ok(frame));
    }

    /// Send a chat message frame.
    pub fn send_chat(&self, user_id: &str, message: &str) {
        let payload = serde_json::json!({ "message": message, "userId": user_id });
        self.send(Frame::Text(payload.to_string()));
    }

    /// Receive the next frame, or `None` if the server closed the transport.
    ///
    /// Panics if nothing arrives within [`DEFAULT_TIMEOUT`].
    pub async fn recv(&mut self) -> Option<Frame> {
        timeout(DEFAULT_TIMEOUT, self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Receive the next chat event, skipping keepalive pings.
    pub async fn next_event(&mut self) -> ChatEvent {
        loop {
            match self.recv().await {
                Some(Frame::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Frame::Ping(_)) => continue,
                other => panic!("expected a chat event, got {other:?}"),
            }
        }
    }

    /// Assert that no chat event arrives within `window`.
    pub async fn expect_no_event(&mut self, window: Duration) {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Frame::Ping(_))) => continue,
                Ok(other) => panic!("expected no event, got {other:?}"),
            }
        }
    }

    /// Wait until the server closes the transport, skipping keepalives.
    ///
    /// Returns true if a close frame was seen before the stream ended.
    pub async fn closed(&mut self) -> bool {
        let mut saw_close = false;
        loop {
            match self.recv().await {
                None => return saw_close,
                Some(Frame::Close) => saw_close = true,
                Some(Frame::Ping(_)) => continue,
                Some(other) => panic!("expected close, got {other:?}"),
            }
        }
    }

    /// Split into the sending half and the receiving stream.
    pub fn into_parts(self) -> (mpsc::UnboundedSender<Result<Frame>>, BoxStream<'static, Frame>) {
        (self.to_server, self.from_server)
    }
}

/// In-memory chat store.
#[derive(Default)]
pub struct MockStore {
    members: Mutex<HashSet<(String, ChatroomId)>>,
    persisted: Mutex<Vec<ChatEvent>>,
    next_id: AtomicI64,
    fail_persist: AtomicBool,
    fail_membership: AtomicBool,
    membership_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockStore {
    /// Create a store with the given (user, chatroom) participants.
    pub fn with_members(members: &[(&str, ChatroomId)]) -> Arc<Self> {
        let store = Self::default();
        {
            let mut set = store.members.lock().unwrap();
            for (user_id, chatroom_id) in members {
                set.insert((user_id.to_string(), *chatroom_id));
            }
        }
        Arc::new(store)
    }

    /// Make every subsequent persist call fail.
    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent membership lookup fail.
    pub fn fail_membership(&self, fail: bool) {
        self.fail_membership.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent membership lookup until the returned gate
    /// gets a permit.
    pub fn gate_membership(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.membership_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Messages persisted so far.
    pub fn persisted(&self) -> Vec<ChatEvent> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for MockStore {
    async fn verify_membership(&self, user_id: &str, chatroom_id: ChatroomId) -> Result<bool> {
        let gate = self.membership_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        if self.fail_membership.load(Ordering::SeqCst) {
            return Err(ChatError::Database("membership lookup failed".into()));
        }
        Ok(self
            .members
            .lock()
            .unwrap()
            .contains(&(user_id.to_string(), chatroom_id)))
    }

    async fn persist_message(
        &self,
        chatroom_id: ChatroomId,
        user_id: &str,
        body: &str,
    ) -> Result<ChatEvent> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(ChatError::Database("disk full".into()));
        }
        let event = ChatEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            chatroom_id,
            user_id: user_id.to_string(),
            message: body.to_string(),
            send_date: Utc::now(),
        };
        self.persisted.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn open_chatroom(
        &self,
        product_id: i64,
        seller_id: &str,
        buyer_id: &str,
    ) -> Result<ChatroomId> {
        if seller_id == buyer_id {
            return Err(ChatError::Validation("seller and buyer are the same".into()));
        }
        let chatroom_id = product_id;
        let mut members = self.members.lock().unwrap();
        members.insert((seller_id.to_string(), chatroom_id));
        members.insert((buyer_id.to_string(), chatroom_id));
        Ok(chatroom_id)
    }

    async fn get_chatroom(&self, _chatroom_id: ChatroomId) -> Result<Option<Chatroom>> {
        Ok(None)
    }

    async fn resolve_room_participants(&self, user_id: &str) -> Result<Vec<ChatroomId>> {
        let mut rooms: Vec<ChatroomId> = self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|(member, _)| member == user_id)
            .map(|(_, chatroom_id)| *chatroom_id)
            .collect();
        rooms.sort_unstable();
        Ok(rooms)
    }

    async fn list_chats(
        &self,
        chatroom_id: ChatroomId,
        last: Option<i64>,
        size: usize,
    ) -> Result<Vec<ChatEvent>> {
        let mut chats: Vec<ChatEvent> = self
            .persisted()
            .into_iter()
            .filter(|c| c.chatroom_id == chatroom_id && last.map_or(true, |last| c.id < last))
            .collect();
        chats.sort_by(|a, b| b.id.cmp(&a.id));
        chats.truncate(size);
        Ok(chats)
    }
}

/// Poll the hub until a chatroom reaches the expected member count.
pub async fn wait_for_members(hub: &HubHandle, chatroom_id: ChatroomId, expected: Option<usize>) {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let count = hub.member_count(chatroom_id).await.unwrap();
        if count == expected {
            return;
        }
        if Instant::now() > deadline {
            panic!("chatroom {chatroom_id} has {count:?} members, expected {expected:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the hub until its statistics satisfy `pred`.
pub async fn wait_for_stats(hub: &HubHandle, pred: impl Fn(&HubStats) -> bool) -> HubStats {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    loop {
        let stats = hub.stats().await.unwrap();
        if pred(&stats) {
            return stats;
        }
        if Instant::now() > deadline {
            panic!("hub stats never reached the expected state: {stats:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
