//! Anonymous 1:1 WebSocket Chat Server Library
//!
//! Pairs strangers who connect over WebSocket into two-person chats and
//! relays their messages until one of them leaves.
//!
//! # Features
//! - WebSocket connection handling with tokio-tungstenite
//! - FIFO waiting queue: the longest-waiting user is matched first
//! - Random conversation topic in every pairing notice
//! - Verbatim message relay in both directions
//! - Exactly-once teardown when either partner disconnects
//! - Keepalive pings for users still waiting for a partner
//! - Health and online-user endpoints
//!
//! # Architecture
//! - `ConnectionRegistry` holds every upgraded connection (read/write lock)
//! - `Matchmaker` owns the waiting queue behind a single mutex
//! - A session runs two relay tasks that meet at a barrier on teardown
//! - Each connection's writer task drains a bounded outbound queue, so
//!   sends never block the relay or the queue lock
//!
//! # Example
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use stranger_chat::{ChatServer, HandlerSettings, Topics};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = ChatServer::new(Topics::load("topics.csv")?);
//!     let listener = stranger_chat::server::bind("127.0.0.1:8080").await?;
//!     server
//!         .serve(listener, HandlerSettings::default(), CancellationToken::new())
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod http;
pub mod keepalive;
pub mod matchmaker;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod topics;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use connection::{Connection, Frame, FrameSink};
pub use error::{AppError, ConnectionError, StartupError};
pub use handler::{handle_connection, HandlerSettings};
pub use matchmaker::{MatchOutcome, Matchmaker, ParkedExit};
pub use message::{Envelope, EnvelopeKind, PEER_DISCONNECTED};
pub use registry::ConnectionRegistry;
pub use server::ChatServer;
pub use session::{SessionHandle, SessionReport, SessionState};
pub use topics::Topics;
pub use types::{ConnectionId, SessionId};
