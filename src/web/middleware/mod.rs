//! Middleware for the web layer.

pub mod auth;
pub mod cors;

pub use auth::{jwt_auth, AuthUser, JwtClaims, JwtState};
pub use cors::create_cors_layer;
