//! Waiting queue and matchmaking
//!
//! A single mutex serializes every queue mutation: matching, enqueueing,
//! removal and the keepalive sweep. Deciding "is there a peer right now"
//! and taking that peer is one atomic step, so no waiting client can be
//! handed to two sessions.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::message::{is_disconnect, Envelope};
use crate::registry::ConnectionRegistry;
use crate::session::{self, SessionHandle};
use crate::topics::Topics;
use crate::types::ConnectionId;

/// A parked connection
#[derive(Debug)]
struct WaitingEntry {
    conn: Arc<Connection>,
    /// Cancelled when the entry is popped for a session
    matched: CancellationToken,
}

/// Result of [`Matchmaker::match_connection`]
#[derive(Debug)]
pub enum MatchOutcome {
    /// Paired with the longest-waiting peer; the relay is running
    Paired(SessionHandle),
    /// Parked at the tail of the queue. The token is cancelled once a later
    /// arrival takes this connection into a session.
    Queued(CancellationToken),
    /// The connection is already in the queue; nothing changed
    AlreadyQueued,
}

/// How a parked connection's watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkedExit {
    /// Taken into a session; the relay now owns its reads
    Matched,
    /// Left or dropped while waiting; already closed and deregistered
    Left,
}

/// The matchmaker: owns the waiting queue
#[derive(Debug)]
pub struct Matchmaker {
    queue: Mutex<VecDeque<WaitingEntry>>,
    registry: Arc<ConnectionRegistry>,
    topics: Topics,
}

impl Matchmaker {
    pub fn new(registry: Arc<ConnectionRegistry>, topics: Topics) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            registry,
            topics,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of parked connections
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether a connection is currently parked
    pub fn is_waiting(&self, id: ConnectionId) -> bool {
        self.queue.lock().iter().any(|entry| entry.conn.id() == id)
    }

    /// Pair `conn` with the longest-waiting peer, or park it
    ///
    /// On a match both sides receive a status notice with a random topic
    /// and a session is started. Heads of the queue that were closed in the
    /// meantime are discarded rather than matched.
    pub fn match_connection(self: &Arc<Self>, conn: Arc<Connection>) -> MatchOutcome {
        let mut queue = self.queue.lock();

        if queue.iter().any(|entry| entry.conn.id() == conn.id()) {
            warn!("User {} is already in the waiting queue", conn);
            return MatchOutcome::AlreadyQueued;
        }

        while let Some(peer) = queue.pop_front() {
            if peer.conn.is_closed() {
                debug!("Skipping closed user {} at the head of the queue", peer.conn);
                continue;
            }
            peer.matched.cancel();

            match Envelope::paired(self.topics.random()).to_frame() {
                Ok(notice) => {
                    if let Err(e) = conn.send(notice.clone()) {
                        debug!("Failed to send pairing notice to {}: {}", conn, e);
                    }
                    if let Err(e) = peer.conn.send(notice) {
                        debug!("Failed to send pairing notice to {}: {}", peer.conn, e);
                    }
                }
                Err(e) => error!("Failed to serialize pairing notice: {}", e),
            }

            info!("User {} connected with user {}", conn, peer.conn);
            return MatchOutcome::Paired(session::start_session(self.clone(), conn, peer.conn));
        }

        let matched = CancellationToken::new();
        queue.push_back(WaitingEntry {
            conn: conn.clone(),
            matched: matched.clone(),
        });
        info!("User {} added to the waiting queue", conn);
        debug!("Waiting queue length: {}", queue.len());

        MatchOutcome::Queued(matched)
    }

    /// Drop a connection from the queue and the registry
    ///
    /// Idempotent: a connection that is not queued or not registered is
    /// simply skipped. Returns whether anything was removed.
    pub fn remove_client(&self, conn: &Connection) -> bool {
        let from_queue = {
            let mut queue = self.queue.lock();
            match queue.iter().position(|entry| entry.conn.id() == conn.id()) {
                Some(index) => {
                    queue.remove(index);
                    true
                }
                None => false,
            }
        };
        let from_registry = self.registry.remove(conn);

        if from_queue || from_registry {
            debug!("Client {} removed", conn);
        }
        from_queue || from_registry
    }

    /// Watch a parked connection until it is matched or goes away
    ///
    /// Frames other than a disconnect request are discarded while waiting.
    pub async fn watch_parked(&self, conn: &Arc<Connection>, matched: CancellationToken) -> ParkedExit {
        loop {
            tokio::select! {
                biased;
                () = matched.cancelled() => {
                    debug!("User {} handed over to a session", conn);
                    return ParkedExit::Matched;
                }
                result = conn.receive() => match result {
                    Ok(frame) if is_disconnect(&frame) => {
                        info!("User {} left the waiting queue", conn);
                        break;
                    }
                    Ok(_) => {
                        debug!("Discarding message from unpaired user {}", conn);
                    }
                    Err(e) => {
                        info!("User {} disconnected while waiting: {}", conn, e);
                        break;
                    }
                }
            }
        }

        conn.close();
        self.remove_client(conn);
        ParkedExit::Left
    }

    /// Ping every parked connection, evicting those that cannot be written
    ///
    /// Evicted connections are closed, which also ends their watchers.
    /// Returns the number of evictions.
    pub fn sweep_waiting(&self) -> usize {
        let ping = match Envelope::ping().to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize ping: {}", e);
                return 0;
            }
        };

        let mut queue = self.queue.lock();
        debug!("Waiting queue length: {}", queue.len());

        let before = queue.len();
        queue.retain(|entry| match entry.conn.send(ping.clone()) {
            Ok(()) => true,
            Err(e) => {
                entry.conn.close();
                info!(
                    "User {} removed from the waiting queue due to no response: {}",
                    entry.conn, e
                );
                false
            }
        });
        before - queue.len()
    }
}
