use std::sync::Arc;

use tracing::{error, info, warn};

use marketchat::chat::{ChatStore, Hub};
use marketchat::web::{AppState, JwtState};
use marketchat::{Config, Database, SqliteChatStore, WebServer};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = marketchat::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        marketchat::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("marketchat starting");

    let db = match Database::open(&config.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(db.pool().clone()));
    let (hub, hub_task) = Hub::spawn(Arc::clone(&store), config.chat.clone());

    let app_state = Arc::new(AppState::new(hub.clone(), store, config.chat.clone()));
    let jwt_state = Arc::new(JwtState::new(&config.auth.jwt_secret));

    let server = match WebServer::new(&config.server, app_state, jwt_state) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to configure web server: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    if let Err(e) = server.run(shutdown).await {
        error!("Web server error: {}", e);
    }

    if hub.shutdown().is_ok() {
        let _ = hub_task.await;
    }
    db.pool().close().await;

    info!("marketchat stopped");
}
