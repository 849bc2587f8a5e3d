//! Real-time chat for marketchat.
//!
//! This module provides the streaming side of the chat service:
//! - A hub that admits connections and owns room membership
//! - One broadcast task per active chatroom
//! - A read pump and a write pump per connection
//! - The store trait used for membership checks and persistence

mod connection;
mod event;
mod hub;
mod pump;
mod room;
mod store;
mod transport;

pub use connection::{Connection, ConnectionId, ConnectionState, Lifecycle};
pub use event::{ChatEvent, ChatroomId, IncomingChat};
pub use hub::{Hub, HubHandle, HubStats};
pub use room::RoomPublisher;
pub use store::{ChatStore, Chatroom};
pub use transport::{Frame, FrameSink, FrameStream, Transport};
