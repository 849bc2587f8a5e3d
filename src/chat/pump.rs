//! Read and write pumps.
//!
//! Every joined connection runs exactly one of each. They never talk to
//! each other directly: each watches the connection's [`Lifecycle`] and
//! reacts to transport or queue closure.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use super::connection::{ConnectionId, ConnectionState, Lifecycle};
use super::event::{ChatEvent, ChatroomId, IncomingChat};
use super::hub::HubHandle;
use super::room::RoomPublisher;
use super::store::ChatStore;
use super::transport::{Frame, FrameSink, FrameStream};
use crate::{ChatError, Result};

/// Resolve once the connection has started tearing down.
async fn leaving(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|state| *state >= ConnectionState::Leaving)
        .await;
}

/// Inbound side: decode, persist, publish.
///
/// This is the only task that unregisters the connection from the hub.
pub(crate) struct ReadPump {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub chatroom_id: ChatroomId,
    pub stream: FrameStream,
    pub room: RoomPublisher,
    pub store: Arc<dyn ChatStore>,
    pub hub: HubHandle,
    pub lifecycle: Arc<Lifecycle>,
    pub pong_wait: Duration,
    pub max_message_size: usize,
}

impl ReadPump {
    pub(crate) async fn run(mut self) {
        let mut state = self.lifecycle.subscribe();

        let outcome: Result<()> = loop {
            let chat = tokio::select! {
                result = self.next_chat() => match result {
                    Ok(chat) => chat,
                    Err(e) => break Err(e),
                },
                _ = leaving(&mut state) => break Ok(()),
            };

            let event = match self
                .store
                .persist_message(self.chatroom_id, &self.user_id, &chat.message)
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        connection_id = %self.connection_id,
                        chatroom_id = self.chatroom_id,
                        error = %e,
                        "failed to persist chat message, dropping connection"
                    );
                    break Err(e);
                }
            };

            if let Err(e) = self.room.publish(event).await {
                break Err(e);
            }
        };

        match &outcome {
            Ok(()) => debug!(
                connection_id = %self.connection_id,
                "read pump stopped: write side closed"
            ),
            Err(e) => debug!(
                connection_id = %self.connection_id,
                error = %e,
                "read pump stopped"
            ),
        }

        self.lifecycle.begin_leaving();
        if self.hub.unregister(self.connection_id).await.is_err() {
            debug!(
                connection_id = %self.connection_id,
                "hub already stopped, skipping unregister"
            );
        }
        drop(self.stream);
        self.lifecycle.pump_exited();
    }

    /// Read frames until one decodes into a chat message.
    ///
    /// Every frame, keepalive responses included, restarts the idle window.
    async fn next_chat(&mut self) -> Result<IncomingChat> {
        loop {
            let frame = match timeout(self.pong_wait, self.stream.next()).await {
                Err(_) => {
                    return Err(ChatError::Timeout(format!(
                        "no frame from peer within {} ms",
                        self.pong_wait.as_millis()
                    )))
                }
                Ok(None) => return Err(ChatError::Transport("stream ended".to_string())),
                Ok(Some(frame)) => frame?,
            };

            let text = match frame {
                Frame::Text(text) => text,
                Frame::Binary(bytes) => String::from_utf8(bytes)
                    .map_err(|_| ChatError::Protocol("binary frame is not UTF-8".to_string()))?,
                Frame::Ping(_) | Frame::Pong(_) => continue,
                Frame::Close => return Err(ChatError::Transport("peer sent close".to_string())),
            };

            if text.len() > self.max_message_size {
                return Err(ChatError::Protocol(format!(
                    "frame of {} bytes exceeds limit of {}",
                    text.len(),
                    self.max_message_size
                )));
            }

            let chat: IncomingChat = serde_json::from_str(&text)
                .map_err(|e| ChatError::Protocol(format!("malformed chat frame: {e}")))?;

            if chat.user_id != self.user_id {
                return Err(ChatError::Protocol(format!(
                    "frame claims sender {} on a connection authenticated as {}",
                    chat.user_id, self.user_id
                )));
            }

            return Ok(chat);
        }
    }
}

/// Outbound side: drain the queue to the transport and send keepalives.
pub(crate) struct WritePump {
    pub connection_id: ConnectionId,
    pub sink: FrameSink,
    pub outbound: mpsc::Receiver<Arc<ChatEvent>>,
    pub lifecycle: Arc<Lifecycle>,
    pub write_wait: Duration,
    pub ping_period: Duration,
    pub batch_limit: usize,
}

impl WritePump {
    pub(crate) async fn run(mut self) {
        let mut ticker = interval(self.ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        let mut state = self.lifecycle.subscribe();

        let outcome: Result<()> = loop {
            tokio::select! {
                event = self.outbound.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.write_batch(event).await {
                            break Err(e);
                        }
                    }
                    // Queue closed by the hub or the room.
                    None => break self.send(Frame::Close).await,
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.send(Frame::Ping(Vec::new())).await {
                        break Err(e);
                    }
                }
                _ = leaving(&mut state) => break self.send(Frame::Close).await,
            }
        };

        if let Err(e) = &outcome {
            debug!(
                connection_id = %self.connection_id,
                error = %e,
                "write pump stopped"
            );
        } else {
            debug!(connection_id = %self.connection_id, "write pump stopped");
        }

        self.lifecycle.begin_leaving();
        let _ = timeout(self.write_wait, self.sink.close()).await;
        self.lifecycle.pump_exited();
    }

    /// Write one event plus whatever is already queued behind it, then flush once.
    async fn write_batch(&mut self, first: Arc<ChatEvent>) -> Result<()> {
        let sink = &mut self.sink;
        let outbound = &mut self.outbound;
        let batch_limit = self.batch_limit;

        timeout(self.write_wait, async move {
            sink.feed(encode(&first)?).await?;
            for _ in 1..batch_limit {
                match outbound.try_recv() {
                    Ok(next) => sink.feed(encode(&next)?).await?,
                    Err(_) => break,
                }
            }
            sink.flush().await
        })
        .await
        .map_err(|_| ChatError::Timeout("write deadline exceeded".to_string()))?
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        timeout(self.write_wait, self.sink.send(frame))
            .await
            .map_err(|_| ChatError::Timeout("write deadline exceeded".to_string()))?
    }
}

fn encode(event: &ChatEvent) -> Result<Frame> {
    Ok(Frame::Text(serde_json::to_string(event)?))
}
