//! Error types for the chat server
//!
//! Defines application-level errors, per-connection transport errors and
//! startup errors. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
///
/// Returned by the connection handler. None of these ever cross the relay
/// boundary; the paired client only ever sees a generic status notice.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket handshake failed (request abandoned, no retry)
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(#[source] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read/write failures on a single connection
///
/// Remote close, protocol violation and network failure are all treated
/// the same way: the peer is gone.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection was closed, locally or by the remote side
    #[error("Connection closed")]
    Closed,

    /// The outbound queue is full; the client is not draining its socket
    #[error("Outbound queue full")]
    Backpressure,

    /// Transport-level WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Fatal errors raised before the server starts accepting connections
#[derive(Debug, Error)]
pub enum StartupError {
    /// Topic file could not be read
    #[error("Failed to read topics from {path}: {source}")]
    Topics {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Topic file is not valid CSV
    #[error("Malformed topic record in {path} at line {line}: {reason}")]
    MalformedTopics {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },

    /// Topic file contained no usable records
    #[error("No topics found in {0}")]
    NoTopics(PathBuf),

    /// A listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
