//! ChatServer implementation
//!
//! Owns the shared state (registry and matchmaker) created once at startup
//! and runs the WebSocket accept loop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::StartupError;
use crate::handler::{handle_connection, HandlerSettings};
use crate::matchmaker::Matchmaker;
use crate::registry::ConnectionRegistry;
use crate::topics::Topics;

/// The chat server
///
/// Cheap to clone; clones share the same registry and waiting queue.
#[derive(Debug, Clone)]
pub struct ChatServer {
    registry: Arc<ConnectionRegistry>,
    matchmaker: Arc<Matchmaker>,
}

impl ChatServer {
    /// Create a server with an empty registry and waiting queue
    pub fn new(topics: Topics) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let matchmaker = Matchmaker::new(registry.clone(), topics);
        Self {
            registry,
            matchmaker,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    /// Accept WebSocket connections until `shutdown` is cancelled
    ///
    /// Each connection gets its own handler task. Sessions already running
    /// are not interrupted by shutdown.
    pub async fn serve(
        &self,
        listener: TcpListener,
        settings: HandlerSettings,
        shutdown: CancellationToken,
    ) {
        info!("ChatServer started (WebSocket path {})", settings.ws_path);
        let settings = Arc::new(settings);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let matchmaker = self.matchmaker.clone();
                        let settings = settings.clone();

                        // Spawn handler task for each connection
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, matchmaker, settings).await {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }

        info!("ChatServer shutting down");
    }
}

/// Bind a listener, mapping failure to a startup error
pub async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })
}
