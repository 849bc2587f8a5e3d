//! Chat room implementation for marketchat.
//!
//! Each room runs one broadcast task that owns the delivery list for its
//! members. Membership changes arrive from the hub over a control channel;
//! chat events arrive from read pumps over a bounded publish channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::connection::ConnectionId;
use super::event::{ChatEvent, ChatroomId};
use crate::{ChatError, Result};

/// Membership change sent by the hub to a room task.
#[derive(Debug)]
pub(crate) enum RoomCommand {
    /// Start delivering to a connection's outbound queue.
    Join {
        connection_id: ConnectionId,
        user_id: String,
        outbound: mpsc::Sender<Arc<ChatEvent>>,
    },
    /// Stop delivering to a connection and close its queue.
    Leave { connection_id: ConnectionId },
}

/// A member dropped by a room because its queue was full or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Eviction {
    pub chatroom_id: ChatroomId,
    pub connection_id: ConnectionId,
}

/// Publishing side of a room, held by read pumps.
#[derive(Debug, Clone)]
pub struct RoomPublisher {
    chatroom_id: ChatroomId,
    tx: mpsc::Sender<Arc<ChatEvent>>,
}

impl RoomPublisher {
    /// Queue a persisted event for broadcast.
    ///
    /// Waits while the room's publish channel is full. Fails once the room
    /// has been torn down.
    pub async fn publish(&self, event: ChatEvent) -> Result<()> {
        self.tx
            .send(Arc::new(event))
            .await
            .map_err(|_| ChatError::NotFound(format!("chatroom {}", self.chatroom_id)))
    }
}

/// The hub's handle to a running room task.
///
/// Dropping the handle closes the control channel, which stops the task
/// and drops every member's outbound sender.
#[derive(Debug)]
pub(crate) struct RoomHandle {
    control: mpsc::UnboundedSender<RoomCommand>,
    publisher: RoomPublisher,
}

impl RoomHandle {
    /// Spawn the broadcast task for a chatroom.
    pub(crate) fn spawn(
        chatroom_id: ChatroomId,
        publish_capacity: usize,
        evictions: mpsc::UnboundedSender<Eviction>,
        live_rooms: Arc<AtomicUsize>,
    ) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::channel(publish_capacity);

        let room = Room::new(chatroom_id, evictions);
        let guard = LiveRoom::new(live_rooms);
        tokio::spawn(room.run(control_rx, publish_rx, guard));

        Self {
            control,
            publisher: RoomPublisher {
                chatroom_id,
                tx: publish_tx,
            },
        }
    }

    pub(crate) fn publisher(&self) -> RoomPublisher {
        self.publisher.clone()
    }

    pub(crate) fn join(
        &self,
        connection_id: ConnectionId,
        user_id: String,
        outbound: mpsc::Sender<Arc<ChatEvent>>,
    ) {
        // A send error means the task is gone; the hub drops the handle soon after.
        let _ = self.control.send(RoomCommand::Join {
            connection_id,
            user_id,
            outbound,
        });
    }

    pub(crate) fn leave(&self, connection_id: ConnectionId) {
        let _ = self.control.send(RoomCommand::Leave { connection_id });
    }
}

/// Counts running room tasks for hub statistics.
struct LiveRoom(Arc<AtomicUsize>);

impl LiveRoom {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for LiveRoom {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Delivery target for one member.
#[derive(Debug)]
struct Member {
    user_id: String,
    outbound: mpsc::Sender<Arc<ChatEvent>>,
}

/// State owned by a room's broadcast task.
pub(crate) struct Room {
    chatroom_id: ChatroomId,
    members: HashMap<ConnectionId, Member>,
    evictions: mpsc::UnboundedSender<Eviction>,
}

impl Room {
    pub(crate) fn new(chatroom_id: ChatroomId, evictions: mpsc::UnboundedSender<Eviction>) -> Self {
        Self {
            chatroom_id,
            members: HashMap::new(),
            evictions,
        }
    }

    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<RoomCommand>,
        mut publish_rx: mpsc::Receiver<Arc<ChatEvent>>,
        _guard: LiveRoom,
    ) {
        debug!(chatroom_id = self.chatroom_id, "room broadcast loop started");

        loop {
            tokio::select! {
                biased;

                command = control_rx.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },

                event = publish_rx.recv() => match event {
                    Some(event) => {
                        self.broadcast(event);
                    }
                    None => break,
                },
            }
        }

        debug!(
            chatroom_id = self.chatroom_id,
            members = self.member_count(),
            "room broadcast loop stopped"
        );
    }

    fn apply(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                connection_id,
                user_id,
                outbound,
            } => {
                self.members
                    .insert(connection_id, Member { user_id, outbound });
            }
            RoomCommand::Leave { connection_id } => {
                self.members.remove(&connection_id);
            }
        }
    }

    /// Number of members currently receiving broadcasts.
    pub(crate) fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Fan an event out to every member without waiting on any of them.
    ///
    /// A member whose queue is full or closed is dropped from the room and
    /// reported to the hub. Returns the number of members that received it.
    pub(crate) fn broadcast(&mut self, event: Arc<ChatEvent>) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (connection_id, member) in &self.members {
            match member.outbound.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        chatroom_id = self.chatroom_id,
                        connection_id = %connection_id,
                        user_id = %member.user_id,
                        "outbound queue full, evicting slow member"
                    );
                    evicted.push(*connection_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        chatroom_id = self.chatroom_id,
                        connection_id = %connection_id,
                        "outbound queue closed, dropping member"
                    );
                    evicted.push(*connection_id);
                }
            }
        }

        for connection_id in evicted {
            // Dropping the member's sender closes its outbound queue.
            self.members.remove(&connection_id);
            let _ = self.evictions.send(Eviction {
                chatroom_id: self.chatroom_id,
                connection_id,
            });
        }

        delivered
    }
}
