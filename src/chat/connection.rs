//! Client connections and their lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::event::ChatEvent;
use super::transport::Transport;

/// Number of pumps bound to every joined connection.
const PUMPS_PER_CONNECTION: usize = 2;

/// Unique identifier of one live connection.
///
/// A user with two browser tabs open has two connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a connection.
///
/// States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Authenticated and upgraded, waiting for the hub.
    Connecting,
    /// Member of a room, both pumps running.
    Joined,
    /// One of the pumps detected a failure; teardown in progress.
    Leaving,
    /// Both pumps exited and the transport is closed.
    Closed,
}

impl ConnectionState {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Joined => "joined",
            ConnectionState::Leaving => "leaving",
            ConnectionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared lifecycle of one connection.
///
/// Both pumps hold it. The `Joined -> Leaving` edge can be taken exactly
/// once, which is the close-once guard for the connection.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ConnectionState>,
    exited: AtomicUsize,
}

impl Lifecycle {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            state,
            exited: AtomicUsize::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection has reached `target` (or a later state).
    pub async fn wait_for(&self, target: ConnectionState) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    /// Wait until both pumps have exited.
    pub async fn closed(&self) {
        self.wait_for(ConnectionState::Closed).await;
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn mark_joined(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Joined)
    }

    /// Start teardown. Returns true for the first caller only.
    pub(crate) fn begin_leaving(&self) -> bool {
        self.transition(ConnectionState::Joined, ConnectionState::Leaving)
    }

    /// Record that one pump has exited.
    pub(crate) fn pump_exited(&self) {
        let exited = self.exited.fetch_add(1, Ordering::AcqRel) + 1;
        if exited >= PUMPS_PER_CONNECTION {
            self.state.send_if_modified(|state| {
                if *state == ConnectionState::Closed {
                    false
                } else {
                    *state = ConnectionState::Closed;
                    true
                }
            });
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

/// One authenticated client's streaming session.
///
/// Created by the acceptor and handed to the hub, which splits it between
/// the room (outbound sender) and the two pumps (transport halves and
/// outbound receiver).
pub struct Connection {
    id: ConnectionId,
    user_id: String,
    transport: Transport,
    outbound_tx: mpsc::Sender<Arc<ChatEvent>>,
    outbound_rx: mpsc::Receiver<Arc<ChatEvent>>,
    lifecycle: Arc<Lifecycle>,
}

/// A connection taken apart by the hub at registration.
pub(crate) struct ConnectionParts {
    pub id: ConnectionId,
    pub user_id: String,
    pub transport: Transport,
    pub outbound_tx: mpsc::Sender<Arc<ChatEvent>>,
    pub outbound_rx: mpsc::Receiver<Arc<ChatEvent>>,
    pub lifecycle: Arc<Lifecycle>,
}

impl Connection {
    /// Create a connection with an outbound queue of `queue_capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `queue_capacity` is zero.
    pub fn new(user_id: impl Into<String>, transport: Transport, queue_capacity: usize) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity);
        Self {
            id: ConnectionId::new(),
            user_id: user_id.into(),
            transport,
            outbound_tx,
            outbound_rx,
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the authenticated user ID.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Get a handle to the connection's lifecycle.
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    pub(crate) fn into_parts(self) -> ConnectionParts {
        ConnectionParts {
            id: self.id,
            user_id: self.user_id,
            transport: self.transport,
            outbound_tx: self.outbound_tx,
            outbound_rx: self.outbound_rx,
            lifecycle: self.lifecycle,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_state_ordering() {
        assert!(ConnectionState::Connecting < ConnectionState::Joined);
        assert!(ConnectionState::Joined < ConnectionState::Leaving);
        assert!(ConnectionState::Leaving < ConnectionState::Closed);
        assert_eq!(ConnectionState::Leaving.to_string(), "leaving");
    }

    #[test]
    fn test_lifecycle_forward_only() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);

        // Cannot leave before joining.
        assert!(!lifecycle.begin_leaving());
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);

        assert!(lifecycle.mark_joined());
        assert!(!lifecycle.mark_joined());
        assert_eq!(lifecycle.state(), ConnectionState::Joined);
    }

    #[test]
    fn test_begin_leaving_only_once() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_joined();

        assert!(lifecycle.begin_leaving());
        assert!(!lifecycle.begin_leaving());
        assert_eq!(lifecycle.state(), ConnectionState::Leaving);
    }

    #[test]
    fn test_closed_after_both_pumps_exit() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_joined();
        lifecycle.begin_leaving();

        lifecycle.pump_exited();
        assert_eq!(lifecycle.state(), ConnectionState::Leaving);

        lifecycle.pump_exited();
        assert_eq!(lifecycle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_transition() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.mark_joined();

        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_for(ConnectionState::Leaving).await })
        };

        tokio::task::yield_now().await;
        lifecycle.begin_leaving();
        waiter.await.unwrap();
    }
}
