//! Keepalive sweeper
//!
//! Pings every parked connection on a fixed interval so that clients that
//! vanished while waiting are evicted from the queue. Paired connections
//! are never pinged.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::matchmaker::Matchmaker;

/// Default sweep interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn the sweeper as a background task
pub fn spawn(
    matchmaker: Arc<Matchmaker>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(matchmaker, interval, shutdown))
}

/// Sweep until `shutdown` is cancelled
pub async fn run(matchmaker: Arc<Matchmaker>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Keepalive sweeper started (every {:?})", interval);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Keepalive sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                let evicted = matchmaker.sweep_waiting();
                if evicted > 0 {
                    debug!("Evicted {} unresponsive waiting users", evicted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, TestPeer};
    use crate::connection::Frame;
    use crate::matchmaker::{MatchOutcome, ParkedExit};
    use crate::registry::ConnectionRegistry;
    use crate::topics::Topics;

    fn matchmaker() -> Arc<Matchmaker> {
        let topics = Topics::new(vec!["music".to_string()]).unwrap();
        Matchmaker::new(Arc::new(ConnectionRegistry::new()), topics)
    }

    #[tokio::test]
    async fn test_sweeper_pings_parked_connections() {
        let mm = matchmaker();
        let (conn, mut peer) = connection("10.0.0.1:1");
        mm.registry().add(conn.clone());
        assert!(matches!(
            mm.match_connection(conn.clone()),
            MatchOutcome::Queued(_)
        ));

        let shutdown = CancellationToken::new();
        let sweeper = spawn(mm.clone(), Duration::from_millis(10), shutdown.clone());

        let frame = time::timeout(Duration::from_secs(1), peer.outbound.recv())
            .await
            .unwrap();
        assert_eq!(frame, Some(Frame::Text(r#"{"type":"ping"}"#.to_string())));
        assert_eq!(mm.queue_len(), 1);

        shutdown.cancel();
        time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_vanished_parked_connection_is_evicted_within_a_sweep() {
        let mm = matchmaker();
        let (conn, peer) = connection("10.0.0.1:1");
        mm.registry().add(conn.clone());
        let token = match mm.match_connection(conn.clone()) {
            MatchOutcome::Queued(token) => token,
            other => panic!("expected Queued, got {:?}", other),
        };

        let watcher = {
            let mm = mm.clone();
            let conn = conn.clone();
            tokio::spawn(async move { mm.watch_parked(&conn, token).await })
        };

        // The client stops reading; its outbound side is gone
        let TestPeer { inbound, outbound } = peer;
        drop(outbound);

        let shutdown = CancellationToken::new();
        let sweeper = spawn(mm.clone(), Duration::from_millis(10), shutdown.clone());

        let exit = time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ParkedExit::Left);
        assert_eq!(mm.queue_len(), 0);
        assert_eq!(mm.registry().count(), 0);

        shutdown.cancel();
        sweeper.await.unwrap();
        drop(inbound);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown_with_empty_queue() {
        let mm = matchmaker();
        let shutdown = CancellationToken::new();
        let sweeper = spawn(mm, Duration::from_millis(5), shutdown.clone());

        time::sleep(Duration::from_millis(20)).await;
        assert!(!sweeper.is_finished());

        shutdown.cancel();
        time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
