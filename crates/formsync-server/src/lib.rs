//! # formsync-server
//!
//! Network front end of a formsync node.
//!
//! Serves the WebSocket endpoint that browsers and peer nodes connect to,
//! starts the outbound replica channels, and exposes a small read-only JSON
//! API for inspecting the node while it runs.
//!
//! ## Quick Start
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     let config = formsync::Config::default();
//!     formsync_server::start(&config).await.unwrap();
//! }
//! ```

mod api;
pub mod clock;
mod socket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use formsync::config::ReplicationConfig;
use formsync::{Config, ConnectionRegistry, FormStateStore, ReplicationManager};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Everything a running node shares between its handlers.
pub struct AppState {
    /// Authoritative form states.
    pub store: Arc<FormStateStore>,
    /// Outbound channels to the configured peers.
    pub replication: ReplicationManager,
}

impl AppState {
    /// Create an empty store and start replicating to the configured peers.
    ///
    /// Must be called inside a Tokio runtime. Never fails on unreachable
    /// peers; their channels keep retrying in the background.
    pub fn new(config: &ReplicationConfig) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(FormStateStore::new(registry));
        let replication = ReplicationManager::start(&store, config);
        Arc::new(Self { store, replication })
    }
}

/// Build the router for a node.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/socket", get(socket::upgrade))
        .route("/api/status", get(api::status))
        .route("/api/forms", get(api::list_forms))
        .route("/api/forms/:form", get(api::get_form))
        .with_state(state)
}

/// Serve `router` on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&state)).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    state.replication.shutdown();
    Ok(())
}

/// Start a node.
///
/// Binds `server.host:server.port`, connects to every configured peer and
/// serves clients. This function blocks until the process receives Ctrl-C.
pub async fn start(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(config.server.bind_addr()).await?;
    let state = AppState::new(&config.replication);
    info!(
        addr = %listener.local_addr()?,
        peers = config.replication.peers.len(),
        "listening"
    );
    serve(listener, state, ctrl_c()).await?;
    info!("shut down");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
}
