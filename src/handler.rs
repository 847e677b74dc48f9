//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, wiring the
//! socket into a [`Connection`], and the connection lifecycle from
//! registration through matchmaking to cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, Frame, FrameStream};
use crate::error::{AppError, ConnectionError};
use crate::matchmaker::{MatchOutcome, Matchmaker, ParkedExit};

/// How long to wait for the writer to flush after the connection closed
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Path clients upgrade on unless configured otherwise
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default per-connection outbound queue length
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Settings shared by every connection handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Request path the WebSocket upgrade is accepted on
    pub ws_path: String,
    /// Frames buffered per connection before writes count as failed
    pub outbound_capacity: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            ws_path: DEFAULT_WS_PATH.to_string(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection and hands it
/// to the matchmaker. Returns once the connection is closed and its writer
/// has stopped, including when a session started by a later arrival took
/// the connection over.
pub async fn handle_connection(
    stream: TcpStream,
    matchmaker: Arc<Matchmaker>,
    settings: Arc<HandlerSettings>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);
    stream.set_nodelay(true)?;

    // WebSocket handshake, only on the chat path
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == settings.ws_path {
            Ok(response)
        } else {
            debug!("Rejecting upgrade on {}", request.uri().path());
            let mut reject = ErrorResponse::new(Some("Not Found".to_string()));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            Err(reject)
        }
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path)
        .await
        .map_err(AppError::Upgrade)?;
    let (ws_sender, ws_receiver) = ws_stream.split();

    // Server -> client frames go through a bounded queue drained by the writer
    let (frame_tx, frame_rx) = mpsc::channel::<Frame>(settings.outbound_capacity);
    let conn = Connection::new(peer_addr, frame_tx, inbound_frames(ws_receiver));
    let label = conn.to_string();

    let writer = tokio::spawn(write_frames(ws_sender, frame_rx, label.clone()));

    matchmaker.registry().add(conn.clone());
    info!("New user connected: {}", conn);

    let handed_over = match matchmaker.match_connection(conn.clone()) {
        MatchOutcome::Paired(session) => {
            let session_id = session.id();
            if let Err(e) = session.join().await {
                error!("Session {} relay task failed: {}", session_id, e);
            }
            false
        }
        MatchOutcome::Queued(matched) => {
            matchmaker.watch_parked(&conn, matched).await == ParkedExit::Matched
        }
        MatchOutcome::AlreadyQueued => {
            warn!("Fresh connection {} was already queued", label);
            conn.close();
            matchmaker.remove_client(&conn);
            false
        }
    };

    // Dropping the last handle ends the writer even if the close frame
    // could not be queued
    drop(conn);

    if handed_over {
        // The session outlives this handler's view of the connection; its
        // teardown closes the connection and stops the writer
        debug!("Session owns {}; waiting for its writer", label);
        if let Err(e) = writer.await {
            error!("Write task for {} failed: {}", label, e);
        }
        return Ok(());
    }

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Writer for {} did not finish in time", label);
    }

    info!("User {} disconnected", label);
    Ok(())
}

/// Map WebSocket messages to relay frames
///
/// Ping/pong are answered by tungstenite and never surface here. A close
/// message ends the stream as a read failure.
pub fn inbound_frames<S>(ws_receiver: S) -> FrameStream
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + 'static,
{
    ws_receiver
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data.to_vec()))),
                Ok(Message::Close(_)) => Some(Err(ConnectionError::Closed)),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                Err(e) => Some(Err(e.into())),
            })
        })
        .boxed()
}

/// Drain queued frames into the socket until a close frame or an error
async fn write_frames<S>(mut ws_sender: S, mut frames: mpsc::Receiver<Frame>, label: String)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Close => break,
        };
        if let Err(e) = ws_sender.send(message).await {
            debug!("WebSocket send to {} failed: {}", label, e);
            break;
        }
    }
    debug!("Write task ended for {}", label);

    // Send close frame when done
    let _ = ws_sender.close().await;
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    #[tokio::test]
    async fn test_inbound_frames_mapping() {
        let messages: Vec<Result<Message, tungstenite::Error>> = vec![
            Ok(Message::Ping(vec![1].into())),
            Ok(Message::Text("hello".into())),
            Ok(Message::Pong(vec![2].into())),
            Ok(Message::Binary(vec![7, 8].into())),
            Ok(Message::Close(None)),
        ];
        let mut frames = inbound_frames(stream::iter(messages));

        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            Frame::Text("hello".to_string())
        );
        assert_eq!(frames.next().await.unwrap().unwrap(), Frame::Binary(vec![7, 8]));
        assert!(matches!(
            frames.next().await,
            Some(Err(ConnectionError::Closed))
        ));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_inbound_transport_error_is_read_failure() {
        let messages: Vec<Result<Message, tungstenite::Error>> =
            vec![Err(tungstenite::Error::ConnectionClosed)];
        let mut frames = inbound_frames(stream::iter(messages));
        assert!(matches!(
            frames.next().await,
            Some(Err(ConnectionError::WebSocket(_)))
        ));
    }
}
