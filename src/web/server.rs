//! Web server for marketchat.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::{ChatError, Result};

use super::handlers::AppState;
use super::middleware::JwtState;
use super::router::{create_health_router, create_router};

/// Web server hosting the chat API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Fully layered router.
    router: Router,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(config: &ServerConfig, app_state: Arc<AppState>, jwt_state: Arc<JwtState>) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| ChatError::Config(format!("invalid server address: {e}")))?;

        let router = create_router(app_state, jwt_state, &config.cors_origins)
            .merge(create_health_router());

        Ok(Self { addr, router })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get a clone of the router, for driving the server in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the web server until `shutdown` resolves.
    ///
    /// In-flight requests are drained before this returns.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!("Web server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Run the server in the background and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Web server listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, self.router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
