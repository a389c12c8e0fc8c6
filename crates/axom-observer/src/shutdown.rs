//! Graceful shutdown coordination.
//!
//! A single [`CancellationToken`] is the shutdown broadcast: the accept loops
//! stop taking connections when it fires, in-flight connections get a drain
//! window, then the signal channel closes and the exporter performs its final
//! flush. Connections register themselves through RAII guards so the
//! coordinator knows when the listeners have drained.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Coordinates graceful shutdown across the proxy listeners and exporter.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given drain window for in-flight
    /// connections.
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drain_timeout,
        }
    }

    /// Clone of the cancellation token (cheap).
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Register an in-flight connection; the returned guard decrements the
    /// counter on drop.
    pub fn track_connection(&self) -> ConnectionGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Current number of in-flight connections.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for in-flight connections to finish, up to the drain window.
    ///
    /// Returns `true` when everything drained in time.
    pub async fn wait_for_drain(&self) -> bool {
        let poll_interval = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + self.drain_timeout;

        loop {
            let count = self.in_flight_count();
            if count == 0 {
                info!("All in-flight connections drained");
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = count,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain deadline expired with connections still in flight"
                );
                return false;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// RAII guard that decrements the in-flight counter on drop.
pub struct ConnectionGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve when a shutdown signal arrives, then trigger the coordinator.
///
/// Unix listens for SIGTERM and SIGINT; elsewhere Ctrl-C only. An externally
/// cancelled token also resolves, so programmatic shutdown takes the same
/// path.
pub async fn shutdown_signal(coordinator: ShutdownCoordinator) {
    let token = coordinator.token();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("Shutdown signal received (SIGTERM)"),
            _ = sigint.recv() => info!("Shutdown signal received (SIGINT)"),
            _ = token.cancelled() => info!("Shutdown requested programmatically"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received (Ctrl-C)"),
            _ = token.cancelled() => info!("Shutdown requested programmatically"),
        }
    }

    coordinator.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.in_flight_count(), 0);
    }

    #[test]
    fn test_trigger_cancels_token() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        coord.trigger();
        assert!(coord.is_shutting_down());
        assert!(coord.token().is_cancelled());
    }

    #[test]
    fn test_connection_guard_counts() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        let g1 = coord.track_connection();
        let g2 = coord.track_connection();
        assert_eq!(coord.in_flight_count(), 2);
        drop(g1);
        assert_eq!(coord.in_flight_count(), 1);
        drop(g2);
        assert_eq!(coord.in_flight_count(), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        let clone = coord.clone();
        let _guard = coord.track_connection();
        assert_eq!(clone.in_flight_count(), 1);
        clone.trigger();
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_for_drain_immediate_when_idle() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(1));
        assert!(coord.wait_for_drain().await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_completes_when_guard_dropped() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        let coord2 = coord.clone();

        tokio::spawn(async move {
            let _guard = coord2.track_connection();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coord.in_flight_count() > 0);
        assert!(coord.wait_for_drain().await);
    }

    #[tokio::test]
    async fn test_wait_for_drain_times_out() {
        let coord = ShutdownCoordinator::new(Duration::from_millis(300));
        let _guard = coord.track_connection(); // never dropped

        let start = tokio::time::Instant::now();
        assert!(!coord.wait_for_drain().await);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_shutdown_signal_resolves_on_token_cancel() {
        let coord = ShutdownCoordinator::new(Duration::from_secs(5));
        let coord2 = coord.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coord2.trigger();
        });

        let start = tokio::time::Instant::now();
        shutdown_signal(coord.clone()).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(coord.is_shutting_down());
    }
}
