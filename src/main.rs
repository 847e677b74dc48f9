//! Anonymous 1:1 WebSocket Chat Server - Entry Point
//!
//! Loads topics, binds the chat and status listeners, starts the keepalive
//! sweeper and runs until Ctrl-C.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stranger_chat::server::bind;
use stranger_chat::{http, keepalive, ChatServer, Config, Topics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=stranger_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stranger_chat=info")),
        )
        .init();

    let config = Config::parse();

    // Topics are required; a missing or empty file is fatal
    let topics = Topics::load(&config.topics)?;
    let server = ChatServer::new(topics);

    let ws_listener = bind(&config.ws_addr).await?;
    let http_listener = bind(&config.http_addr).await?;
    info!(
        "WebSocket Chat Server listening on {}{}",
        config.ws_addr, config.ws_path
    );
    info!("Status API listening on {}", config.http_addr);

    let shutdown = CancellationToken::new();

    let sweeper = keepalive::spawn(
        server.matchmaker().clone(),
        config.keepalive_interval(),
        shutdown.clone(),
    );

    let status = tokio::spawn(http::serve(
        http_listener,
        server.registry().clone(),
        shutdown.clone(),
    ));

    let chat = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        let settings = config.handler_settings();
        tokio::spawn(async move { server.serve(ws_listener, settings, shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    let _ = chat.await;
    let _ = sweeper.await;
    match status.await {
        Ok(Err(e)) => error!("Status API error: {}", e),
        Err(e) => error!("Status API task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Stopped with {} users still connected", server.registry().count());
    Ok(())
}
