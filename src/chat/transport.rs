//! Transport abstraction for chat connections.
//!
//! The pumps speak in [`Frame`]s over a boxed sink/stream pair, so the hub
//! can be driven by an axum WebSocket in production and by in-memory
//! channels in tests.

use std::pin::Pin;

use futures::{Sink, Stream};

use crate::{ChatError, Result};

/// One transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Vec<u8>),
    /// Keepalive ping.
    Ping(Vec<u8>),
    /// Keepalive response.
    Pong(Vec<u8>),
    /// Close handshake.
    Close,
}

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = ChatError> + Send>>;

/// Inbound half of a transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// A bidirectional framed connection to one peer.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound frames.
    pub stream: FrameStream,
}

impl Transport {
    /// Build a transport from any sink/stream pair over [`Frame`].
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<Frame, Error = ChatError> + Send + 'static,
        R: Stream<Item = Result<Frame>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
