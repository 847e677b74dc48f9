//! Connection handle
//!
//! A `Connection` wraps one upgraded, message-oriented channel. Outbound
//! frames go through a [`FrameSink`] (in production a bounded queue drained
//! by the socket writer task); inbound frames come from a boxed stream that
//! is read by whichever task currently owns the connection (its watcher
//! while parked, a relay loop once paired).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::types::ConnectionId;

/// A single message carried by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Ask the writer to send a close frame and stop
    Close,
}

/// Inbound side of a connection
pub type FrameStream = BoxStream<'static, Result<Frame, ConnectionError>>;

/// Anything that can accept an outbound frame without blocking
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), ConnectionError>;
}

impl FrameSink for mpsc::Sender<Frame> {
    fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backpressure,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }
}

/// Handle to an upgraded client connection
///
/// Shared as `Arc<Connection>` between the registry, the waiting queue and
/// a session. Equality is handle identity.
pub struct Connection {
    id: ConnectionId,
    remote_addr: String,
    sink: Box<dyn FrameSink>,
    stream: Mutex<FrameStream>,
    closed: CancellationToken,
    close_requested: AtomicBool,
}

impl Connection {
    /// Wrap a sink/stream pair into a new connection handle
    pub fn new(
        remote_addr: impl Into<String>,
        sink: impl FrameSink + 'static,
        stream: FrameStream,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr: remote_addr.into(),
            sink: Box::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
            close_requested: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address label, for diagnostics only
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Queue a frame for delivery
    ///
    /// Never waits. Fails once the connection is closed, when the writer
    /// has gone away, or when the outbound queue is full.
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.sink.send(frame)
    }

    /// Wait for the next inbound frame
    ///
    /// Returns `Err` when the remote side closes, on transport errors, and
    /// as soon as [`close`](Self::close) is called from any task.
    pub async fn receive(&self) -> Result<Frame, ConnectionError> {
        let mut stream = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(ConnectionError::Closed),
            guard = self.stream.lock() => guard,
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(ConnectionError::Closed),
            next = stream.next() => next.unwrap_or(Err(ConnectionError::Closed)),
        }
    }

    /// Close the connection
    ///
    /// Safe to call concurrently and repeatedly; only the first call has an
    /// effect. Frames queued before the close are still flushed.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        // Best-effort: a full or dead writer queue is already as good as closed
        let _ = self.sink.send(Frame::Close);
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote_addr)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_connection_identity() {
        let (a, _pa) = connection("10.0.0.1:1");
        let (b, _pb) = connection("10.0.0.1:1");
        assert_ne!(a.id(), b.id());
        assert_ne!(*a, *b);
        assert_eq!(*a, *a.clone());
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (conn, mut peer) = connection("10.0.0.1:1");

        conn.send(Frame::Text("hello".to_string())).unwrap();
        assert_eq!(peer.texts(), vec!["hello".to_string()]);

        peer.say("from client").await;
        assert_eq!(
            conn.receive().await.unwrap(),
            Frame::Text("from client".to_string())
        );
    }

    #[tokio::test]
    async fn test_receive_fails_when_client_hangs_up() {
        let (conn, peer) = connection("10.0.0.1:1");
        drop(peer.inbound);
        assert!(matches!(conn.receive().await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_flushes_close_frame_once() {
        let (conn, mut peer) = connection("10.0.0.1:1");
        conn.send(Frame::Text("last words".to_string())).unwrap();

        conn.close();
        conn.close();

        assert!(conn.is_closed());
        assert_eq!(
            peer.written(),
            vec![Frame::Text("last words".to_string()), Frame::Close]
        );
        assert!(matches!(
            conn.send(Frame::Text("too late".to_string())),
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_receive() {
        let (conn, _peer) = connection("10.0.0.1:1");

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.receive().await })
        };
        tokio::task::yield_now().await;
        conn.close();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_full_queue_is_backpressure() {
        let (tx, _rx) = mpsc::channel::<Frame>(1);
        tx.send(Frame::Text("a".to_string())).await.unwrap();
        assert!(matches!(
            FrameSink::send(&tx, Frame::Text("b".to_string())),
            Err(ConnectionError::Backpressure)
        ));
    }

    #[tokio::test]
    async fn test_failing_sink() {
        let (conn, _inbound) = unwritable_connection("10.0.0.1:1");
        assert!(conn.send(Frame::Text("x".to_string())).is_err());
    }
}
