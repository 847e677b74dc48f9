//! Paired session relay
//!
//! A session runs two relay loops, one per direction. Each loop copies
//! frames from its source to its destination until the source fails, asks
//! to leave, or the destination can no longer be written. The loop that
//! stops first tells the surviving side that its partner is gone and closes
//! both connections, which drives the other loop to stop as well.
//!
//! Both loops then meet at a barrier; exactly one of them (the barrier
//! leader) deregisters the two connections.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Barrier;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace};

use crate::connection::{Connection, Frame};
use crate::error::ConnectionError;
use crate::matchmaker::Matchmaker;
use crate::message::{is_disconnect, Envelope, PEER_DISCONNECTED};
use crate::types::{ConnectionId, SessionId};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both directions relaying
    Active,
    /// One direction stopped; waiting for the other
    Draining,
    /// Both connections deregistered
    Closed,
}

/// Why a relay direction stopped
#[derive(Debug)]
pub enum EndReason {
    /// Reading from the source failed (remote close, transport error, or
    /// the connection was closed by the other direction)
    ReadFailed(ConnectionError),
    /// The source sent a `disconnect` envelope
    LeaveRequested,
    /// Writing to the destination failed
    WriteFailed(ConnectionError),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            EndReason::LeaveRequested => write!(f, "left the chat"),
            EndReason::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Outcome of one relay direction
#[derive(Debug)]
pub struct DirectionExit {
    /// The connection this direction was reading from
    pub source: ConnectionId,
    pub reason: EndReason,
    /// Whether this direction was the one that deregistered the pair
    pub ran_cleanup: bool,
    /// Connections this direction actually removed during cleanup
    pub removed: usize,
}

/// Outcome of a whole session
#[derive(Debug)]
pub struct SessionReport {
    pub forward: DirectionExit,
    pub backward: DirectionExit,
}

impl SessionReport {
    /// How many times cleanup ran; always one for a finished session
    pub fn cleanup_runs(&self) -> usize {
        [&self.forward, &self.backward]
            .iter()
            .filter(|exit| exit.ran_cleanup)
            .count()
    }

    /// Connections deregistered by cleanup; two unless something else
    /// removed them first
    pub fn removals(&self) -> usize {
        self.forward.removed + self.backward.removed
    }
}

/// Shared state of a paired session
struct Session {
    id: SessionId,
    first: Arc<Connection>,
    second: Arc<Connection>,
    state: Mutex<SessionState>,
    teardown: Barrier,
}

impl Session {
    /// Move from `Active` to `Draining`
    ///
    /// Returns true only for the first direction to stop.
    fn begin_draining(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Active {
            *state = SessionState::Draining;
            debug!("Session {} draining", self.id);
            true
        } else {
            false
        }
    }
}

/// Handle to a running session
///
/// Holds the two relay tasks; [`join`](Self::join) waits for both.
pub struct SessionHandle {
    session: Arc<Session>,
    forward: JoinHandle<DirectionExit>,
    backward: JoinHandle<DirectionExit>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn state(&self) -> SessionState {
        *self.session.state.lock()
    }

    /// The two paired connections, in (first, second) order
    pub fn participants(&self) -> (ConnectionId, ConnectionId) {
        (self.session.first.id(), self.session.second.id())
    }

    pub fn involves(&self, id: ConnectionId) -> bool {
        self.session.first.id() == id || self.session.second.id() == id
    }

    /// Wait until both directions have stopped and cleanup has run
    pub async fn join(self) -> Result<SessionReport, JoinError> {
        let (forward, backward) = tokio::join!(self.forward, self.backward);
        Ok(SessionReport {
            forward: forward?,
            backward: backward?,
        })
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.session.id)
            .field("first", &self.session.first)
            .field("second", &self.session.second)
            .field("state", &self.state())
            .finish()
    }
}

/// Start relaying between two freshly matched connections
pub fn start_session(
    matchmaker: Arc<Matchmaker>,
    first: Arc<Connection>,
    second: Arc<Connection>,
) -> SessionHandle {
    let session = Arc::new(Session {
        id: SessionId::new(),
        first: first.clone(),
        second: second.clone(),
        state: Mutex::new(SessionState::Active),
        teardown: Barrier::new(2),
    });
    info!("Session {} started: {} <-> {}", session.id, first, second);

    let forward = tokio::spawn(run_direction(
        session.clone(),
        matchmaker.clone(),
        first.clone(),
        second.clone(),
    ));
    let backward = tokio::spawn(run_direction(session.clone(), matchmaker, second, first));

    SessionHandle {
        session,
        forward,
        backward,
    }
}

/// One relay direction plus its share of the teardown
async fn run_direction(
    session: Arc<Session>,
    matchmaker: Arc<Matchmaker>,
    src: Arc<Connection>,
    dst: Arc<Connection>,
) -> DirectionExit {
    let reason = relay(&src, &dst).await;
    info!("User {} disconnected ({})", src, reason);

    if session.begin_draining() {
        // Only the first direction to stop notifies, so the survivor hears
        // about it exactly once
        let survivor = match reason {
            EndReason::WriteFailed(_) => &src,
            EndReason::ReadFailed(_) | EndReason::LeaveRequested => &dst,
        };
        notify_partner_gone(survivor);
    }
    dst.close();
    src.close();

    let ran_cleanup = session.teardown.wait().await.is_leader();
    let mut removed = 0;
    if ran_cleanup {
        removed = [&session.first, &session.second]
            .into_iter()
            .filter(|conn| matchmaker.remove_client(conn))
            .count();
        *session.state.lock() = SessionState::Closed;
        info!("Session {} closed", session.id);
    }

    DirectionExit {
        source: src.id(),
        reason,
        ran_cleanup,
        removed,
    }
}

/// Copy frames from `src` to `dst` until something fails
async fn relay(src: &Connection, dst: &Connection) -> EndReason {
    loop {
        let frame = match src.receive().await {
            Ok(frame) => frame,
            Err(e) => return EndReason::ReadFailed(e),
        };

        if is_disconnect(&frame) {
            return EndReason::LeaveRequested;
        }

        if let Frame::Text(text) = &frame {
            trace!("User {} sent {} bytes", src, text.len());
        }

        if let Err(e) = dst.send(frame) {
            return EndReason::WriteFailed(e);
        }
    }
}

/// Best-effort "partner left" notice
fn notify_partner_gone(dst: &Connection) {
    match Envelope::status(PEER_DISCONNECTED).to_frame() {
        Ok(notice) => {
            if let Err(e) = dst.send(notice) {
                debug!("Could not notify {}: {}", dst, e);
            }
        }
        Err(e) => error!("Failed to serialize disconnect notice: {}", e),
    }
}
