//! Router configuration for the web layer.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{create_chatroom, get_chatroom, list_chatrooms, list_chats, AppState};
use super::middleware::{create_cors_layer, jwt_auth, JwtState};
use super::ws::chat_ws_handler;

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    cors_origins: &[String],
) -> Router {
    let chatroom_routes = Router::new()
        .route("/", get(list_chatrooms).post(create_chatroom))
        .route("/:chatroom_id", get(get_chatroom))
        .route("/:chatroom_id/chats", get(list_chats))
        .route("/:chatroom_id/ws", get(chat_ws_handler));

    let api_routes = Router::new().nest("/chatrooms", chatroom_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(move |req, next| {
                    jwt_auth(jwt_state.clone(), req, next)
                })),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
