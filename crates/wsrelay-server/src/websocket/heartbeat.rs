//! Heartbeat ping/pong liveness monitoring.
//!
//! One process-wide timer. Each tick walks the registry: a connection whose
//! alive flag is still clear missed the previous ping and is terminated;
//! every other connection has its flag cleared and receives a new ping.
//! A peer that stops answering is therefore reclaimed within two intervals.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lifecycle::Lifecycle;
use crate::errors::RelayError;
use crate::metrics::{WS_LIVENESS_TERMINATIONS_TOTAL, record_error};

/// Default ping period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The heartbeat was cancelled externally.
    Cancelled {
        /// Ticks processed before cancellation.
        ticks: u64,
    },
}

/// Counts from one liveness pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Connections pinged.
    pub pinged: usize,
    /// Connections terminated for missing a pong.
    pub terminated: usize,
}

/// Periodic liveness check over every registered connection.
pub struct LivenessMonitor {
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor ticking every `interval`.
    pub fn new(lifecycle: Arc<Lifecycle>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    /// Ping period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one liveness pass.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for conn in self.lifecycle.registry().snapshot() {
            if conn.is_terminated() {
                continue;
            }
            if !conn.check_alive() {
                let err = RelayError::DeadPeer {
                    conn_id: conn.id(),
                    silent_for: conn.last_pong_elapsed(),
                };
                warn!(
                    conn_id = %conn.id(),
                    kind = err.kind(),
                    error = %err,
                    "terminating unresponsive client"
                );
                record_error(&err);
                counter!(WS_LIVENESS_TERMINATIONS_TOTAL).increment(1);
                if self.lifecycle.terminate(&conn) {
                    report.terminated += 1;
                }
                continue;
            }
            match conn.ping() {
                Ok(()) => report.pinged += 1,
                Err(e) => debug!(conn_id = %conn.id(), error = %e, "ping not queued"),
            }
        }

        report
    }

    /// Tick until `cancel` fires. The immediate first tick is skipped.
    pub async fn run(&self, cancel: CancellationToken) -> HeartbeatResult {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ticker.tick().await;

        let mut ticks = 0;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(ticks, "liveness monitor stopped");
                    return HeartbeatResult::Cancelled { ticks };
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    let report = self.tick();
                    if report.terminated > 0 {
                        info!(
                            pinged = report.pinged,
                            terminated = report.terminated,
                            "liveness pass reclaimed connections"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::{Connection, Outbound};

    fn setup() -> (Arc<Lifecycle>, LivenessMonitor) {
        let lifecycle = Arc::new(Lifecycle::new());
        let monitor = LivenessMonitor::new(Arc::clone(&lifecycle), Duration::from_millis(100));
        (lifecycle, monitor)
    }

    fn accept(lifecycle: &Lifecycle) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (lifecycle.accept(tx, "test"), rx)
    }

    fn pings(rx: &mut mpsc::Receiver<Outbound>) -> usize {
        let mut n = 0;
        while let Ok(frame) = rx.try_recv() {
            if frame == Outbound::Ping {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn new_connection_is_pinged_not_terminated() {
        let (lifecycle, monitor) = setup();
        let (conn, mut rx) = accept(&lifecycle);
        let report = monitor.tick();
        assert_eq!(report, TickReport { pinged: 1, terminated: 0 });
        assert!(!conn.is_alive());
        assert_eq!(pings(&mut rx), 1);
    }

    #[test]
    fn pong_between_ticks_keeps_connection() {
        let (lifecycle, monitor) = setup();
        let (conn, _rx) = accept(&lifecycle);
        for _ in 0..5 {
            let _ = monitor.tick();
            conn.mark_alive();
        }
        assert_eq!(lifecycle.connection_count(), 1);
        assert!(!conn.is_terminated());
    }

    #[test]
    fn missed_pong_terminates_on_second_tick() {
        let (lifecycle, monitor) = setup();
        let (conn, _rx) = accept(&lifecycle);
        assert_eq!(monitor.tick().terminated, 0);
        let report = monitor.tick();
        assert_eq!(report, TickReport { pinged: 0, terminated: 1 });
        assert!(conn.is_terminated());
        assert_eq!(lifecycle.connection_count(), 0);
    }

    #[test]
    fn only_silent_connections_are_reclaimed() {
        let (lifecycle, monitor) = setup();
        let (live, mut live_rx) = accept(&lifecycle);
        let (dead, _dead_rx) = accept(&lifecycle);
        let _ = monitor.tick();
        live.mark_alive();
        let report = monitor.tick();
        assert_eq!(report.terminated, 1);
        assert_eq!(report.pinged, 1);
        assert!(dead.is_terminated());
        assert!(!live.is_terminated());

        // The survivor hears about the departure.
        let notices: Vec<_> = std::iter::from_fn(|| live_rx.try_recv().ok())
            .filter_map(|f| match f {
                Outbound::Text(t) => Some(t.as_str().to_owned()),
                _ => None,
            })
            .filter(|t| t.contains("Client disconnected"))
            .collect();
        assert_eq!(notices.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reclaims_silent_peer_within_two_intervals() {
        let (lifecycle, monitor) = setup();
        let (conn, _rx) = accept(&lifecycle);
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(conn.is_terminated());
        assert_eq!(lifecycle.connection_count(), 0);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled { ticks: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn run_skips_immediate_first_tick() {
        let (lifecycle, monitor) = setup();
        let (conn, _rx) = accept(&lifecycle);
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(conn.is_alive());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), HeartbeatResult::Cancelled { ticks: 0 });
    }

    #[tokio::test]
    async fn run_cancelled() {
        let (_lifecycle, monitor) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            monitor.run(cancel).await,
            HeartbeatResult::Cancelled { ticks: 0 }
        );
    }

    #[test]
    fn default_interval_is_thirty_seconds() {
        assert_eq!(DEFAULT_HEARTBEAT_INTERVAL, Duration::from_secs(30));
    }
}
