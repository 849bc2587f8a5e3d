//! Web module for marketchat.
//!
//! This module provides the WebSocket connection acceptor and the REST
//! endpoints for chatrooms and chat history.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;
pub mod ws;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use middleware::{AuthUser, JwtClaims, JwtState};
pub use router::{create_health_router, create_router};
pub use server::WebServer;
