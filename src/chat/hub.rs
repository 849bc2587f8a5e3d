//! Chat hub: the dispatcher that owns room membership.
//!
//! All registry mutations happen on the hub task, so there is no lock
//! around the room map. Acceptors and read pumps talk to it through a
//! cloneable [`HubHandle`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionId};
use super::event::ChatroomId;
use super::pump::{ReadPump, WritePump};
use super::room::{Eviction, RoomHandle};
use super::store::ChatStore;
use super::transport::Transport;
use crate::config::ChatConfig;
use crate::{ChatError, Result};

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Rooms in the registry.
    pub rooms: usize,
    /// Registered connections.
    pub connections: usize,
    /// Room broadcast tasks still running.
    pub running_rooms: usize,
}

struct RegisterRequest {
    connection: Connection,
    chatroom_id: ChatroomId,
}

enum ControlRequest {
    MemberCount {
        chatroom_id: ChatroomId,
        reply: oneshot::Sender<Option<usize>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// Cloneable handle used to submit work to the hub.
#[derive(Clone)]
pub struct HubHandle {
    store: Arc<dyn ChatStore>,
    register: mpsc::Sender<RegisterRequest>,
    unregister: mpsc::Sender<ConnectionId>,
    control: mpsc::UnboundedSender<ControlRequest>,
}

impl HubHandle {
    /// Submit an authenticated connection for admission to a chatroom.
    ///
    /// Membership is checked on the caller's task, so a slow store never
    /// holds up the hub. A connection whose user is not a participant is
    /// dropped here and never reaches `Joined`.
    pub async fn register(&self, connection: Connection, chatroom_id: ChatroomId) -> Result<()> {
        if self.register.is_closed() {
            return Err(ChatError::HubStopped);
        }

        let connection_id = connection.id();
        let user_id = connection.user_id().to_string();

        match self.store.verify_membership(&user_id, chatroom_id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    %connection_id,
                    %user_id,
                    chatroom_id,
                    "join rejected: user is not a participant of the chatroom"
                );
                return Ok(());
            }
            Err(e) => {
                warn!(
                    %connection_id,
                    %user_id,
                    chatroom_id,
                    error = %e,
                    "join rejected: membership lookup failed"
                );
                return Ok(());
            }
        }

        self.register
            .send(RegisterRequest {
                connection,
                chatroom_id,
            })
            .await
            .map_err(|_| ChatError::HubStopped)
    }

    /// Request removal of a connection from every room it belongs to.
    ///
    /// Unknown or already removed connections are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<()> {
        self.unregister
            .send(connection_id)
            .await
            .map_err(|_| ChatError::HubStopped)
    }

    /// Number of members in a chatroom, or `None` if no room exists for it.
    pub async fn member_count(&self, chatroom_id: ChatroomId) -> Result<Option<usize>> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(ControlRequest::MemberCount { chatroom_id, reply })
            .map_err(|_| ChatError::HubStopped)?;
        rx.await.map_err(|_| ChatError::HubStopped)
    }

    /// Snapshot of the hub's registry.
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(ControlRequest::Stats { reply })
            .map_err(|_| ChatError::HubStopped)?;
        rx.await.map_err(|_| ChatError::HubStopped)
    }

    /// Stop the hub. Every room is closed, which in turn closes every connection.
    pub fn shutdown(&self) -> Result<()> {
        self.control
            .send(ControlRequest::Shutdown)
            .map_err(|_| ChatError::HubStopped)
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("closed", &self.control.is_closed())
            .finish()
    }
}

/// The hub's own, non-owning view of its inbound channels.
///
/// Handles given to read pumps are upgraded from this, so the hub never
/// keeps its own channels open.
struct WeakHubHandle {
    store: Arc<dyn ChatStore>,
    register: mpsc::WeakSender<RegisterRequest>,
    unregister: mpsc::WeakSender<ConnectionId>,
    control: mpsc::WeakUnboundedSender<ControlRequest>,
}

impl WeakHubHandle {
    fn upgrade(&self) -> Option<HubHandle> {
        Some(HubHandle {
            store: Arc::clone(&self.store),
            register: self.register.upgrade()?,
            unregister: self.unregister.upgrade()?,
            control: self.control.upgrade()?,
        })
    }
}

struct RoomEntry {
    handle: RoomHandle,
    members: HashSet<ConnectionId>,
}

struct ConnectionEntry {
    user_id: String,
    rooms: HashSet<ChatroomId>,
}

/// The hub task's state.
pub struct Hub {
    store: Arc<dyn ChatStore>,
    config: ChatConfig,
    rooms: HashMap<ChatroomId, RoomEntry>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    eviction_tx: mpsc::UnboundedSender<Eviction>,
    eviction_rx: mpsc::UnboundedReceiver<Eviction>,
    weak: WeakHubHandle,
    live_rooms: Arc<AtomicUsize>,
}

impl Hub {
    /// Create a hub and the handle that feeds it.
    pub fn new(store: Arc<dyn ChatStore>, config: ChatConfig) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(config.hub_queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.hub_queue_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (eviction_tx, eviction_rx) = mpsc::unbounded_channel();

        let weak = WeakHubHandle {
            store: Arc::clone(&store),
            register: register_tx.downgrade(),
            unregister: unregister_tx.downgrade(),
            control: control_tx.downgrade(),
        };

        let hub = Self {
            store,
            config,
            rooms: HashMap::new(),
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            control_rx,
            eviction_tx,
            eviction_rx,
            weak,
            live_rooms: Arc::new(AtomicUsize::new(0)),
        };

        let handle = HubHandle {
            store: Arc::clone(&hub.store),
            register: register_tx,
            unregister: unregister_tx,
            control: control_tx,
        };

        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    pub fn spawn(store: Arc<dyn ChatStore>, config: ChatConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(store, config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process requests until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("chat hub started");

        loop {
            // Membership changes go first so queries observe them.
            let keep_running = tokio::select! {
                biased;

                request = self.register_rx.recv() => match request {
                    Some(request) => {
                        self.handle_register(request);
                        true
                    }
                    None => false,
                },

                connection_id = self.unregister_rx.recv() => match connection_id {
                    Some(connection_id) => {
                        self.handle_unregister(connection_id);
                        true
                    }
                    None => false,
                },

                Some(eviction) = self.eviction_rx.recv() => {
                    self.handle_eviction(eviction);
                    true
                }

                request = self.control_rx.recv() => match request {
                    Some(request) => self.handle_control(request),
                    None => false,
                },
            };

            if !keep_running {
                break;
            }
        }

        let rooms = self.rooms.len();
        let connections = self.connections.len();
        // Dropping the room handles stops every broadcast task and closes
        // every member's outbound queue.
        self.rooms.clear();
        self.connections.clear();

        info!(rooms, connections, "chat hub stopped");
    }

    fn handle_register(&mut self, request: RegisterRequest) {
        let RegisterRequest {
            connection,
            chatroom_id,
        } = request;

        let Some(hub) = self.weak.upgrade() else {
            debug!(chatroom_id, "hub is shutting down, dropping join");
            return;
        };

        let parts = connection.into_parts();

        let room = self.rooms.entry(chatroom_id).or_insert_with(|| {
            info!(chatroom_id, "room opened");
            RoomEntry {
                handle: RoomHandle::spawn(
                    chatroom_id,
                    self.config.room_queue_capacity,
                    self.eviction_tx.clone(),
                    Arc::clone(&self.live_rooms),
                ),
                members: HashSet::new(),
            }
        });

        room.members.insert(parts.id);
        room.handle
            .join(parts.id, parts.user_id.clone(), parts.outbound_tx);
        let publisher = room.handle.publisher();
        let members = room.members.len();

        self.connections.insert(
            parts.id,
            ConnectionEntry {
                user_id: parts.user_id.clone(),
                rooms: HashSet::from([chatroom_id]),
            },
        );
        parts.lifecycle.mark_joined();

        info!(
            connection_id = %parts.id,
            user_id = %parts.user_id,
            chatroom_id,
            members,
            "connection joined room"
        );

        let Transport { sink, stream } = parts.transport;

        let reader = ReadPump {
            connection_id: parts.id,
            user_id: parts.user_id,
            chatroom_id,
            stream,
            room: publisher,
            store: Arc::clone(&self.store),
            hub,
            lifecycle: Arc::clone(&parts.lifecycle),
            pong_wait: self.config.pong_wait(),
            max_message_size: self.config.max_message_size,
        };
        let writer = WritePump {
            connection_id: parts.id,
            sink,
            outbound: parts.outbound_rx,
            lifecycle: parts.lifecycle,
            write_wait: self.config.write_wait(),
            ping_period: self.config.ping_period(),
            batch_limit: self.config.send_queue_capacity,
        };

        tokio::spawn(reader.run());
        tokio::spawn(writer.run());
    }

    fn handle_unregister(&mut self, connection_id: ConnectionId) {
        let Some(entry) = self.connections.remove(&connection_id) else {
            debug!(%connection_id, "unregister ignored: connection not registered");
            return;
        };

        for chatroom_id in &entry.rooms {
            self.remove_member(*chatroom_id, connection_id);
        }

        info!(
            %connection_id,
            user_id = %entry.user_id,
            "connection unregistered"
        );
    }

    fn handle_eviction(&mut self, eviction: Eviction) {
        let Eviction {
            chatroom_id,
            connection_id,
        } = eviction;

        if let Some(entry) = self.connections.get_mut(&connection_id) {
            entry.rooms.remove(&chatroom_id);
        }
        self.remove_member(chatroom_id, connection_id);
    }

    fn handle_control(&mut self, request: ControlRequest) -> bool {
        match request {
            ControlRequest::MemberCount { chatroom_id, reply } => {
                let count = self.rooms.get(&chatroom_id).map(|room| room.members.len());
                let _ = reply.send(count);
                true
            }
            ControlRequest::Stats { reply } => {
                let _ = reply.send(HubStats {
                    rooms: self.rooms.len(),
                    connections: self.connections.len(),
                    running_rooms: self.live_rooms.load(Ordering::Acquire),
                });
                true
            }
            ControlRequest::Shutdown => {
                info!("chat hub shutdown requested");
                false
            }
        }
    }

    /// Remove a connection from one room, closing the room if it empties.
    fn remove_member(&mut self, chatroom_id: ChatroomId, connection_id: ConnectionId) {
        let Some(room) = self.rooms.get_mut(&chatroom_id) else {
            return;
        };
        if !room.members.remove(&connection_id) {
            return;
        }

        if room.members.is_empty() {
            self.rooms.remove(&chatroom_id);
            info!(chatroom_id, "room closed");
        } else {
            room.handle.leave(connection_id);
        }
    }
}
