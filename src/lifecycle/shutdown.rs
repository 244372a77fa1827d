//! Graceful shutdown sequence.
//!
//! ```text
//! Running ──signal──▶ Draining ──connections idle (≤ grace)──▶ wait tasks ──▶ Stopped
//!                        │
//!                        └── grace period elapsed ──▶ DeadlineExceeded (terminal error)
//! ```
//!
//! The watcher reports its outcome exactly once over a oneshot channel. The
//! thread that called `serve` consumes it after the accept loop has returned.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::lifecycle::signals::Signal;
use crate::lifecycle::tasks::BackgroundTasks;
use crate::net::connection::ConnectionTracker;
use crate::observability::logging::Logger;
use crate::observability::metrics;
use crate::props;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Listener bound, accepting connections.
    Running,
    /// No new connections; in-flight requests and background tasks finishing.
    Draining,
    /// Drain completed.
    Stopped,
}

/// Why a graceful shutdown failed.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("graceful shutdown exceeded the {grace:?} grace period with {remaining} connection(s) still active")]
    DeadlineExceeded { grace: Duration, remaining: usize },
    #[error("shutdown watcher stopped without reporting an outcome")]
    WatcherLost,
}

/// Result of the drain, delivered once from the watcher to the serving task.
pub type ShutdownOutcome = Result<(), ShutdownError>;

/// Everything the watcher needs to drive the drain.
pub(crate) struct Drain {
    pub(crate) logger: Arc<Logger>,
    pub(crate) state: Arc<watch::Sender<ServerState>>,
    pub(crate) connections: ConnectionTracker,
    pub(crate) tasks: BackgroundTasks,
    pub(crate) grace: Duration,
    pub(crate) addr: SocketAddr,
}

impl Drain {
    /// Wait for `signal`, drain, and report the outcome on `done`.
    pub(crate) async fn run<S>(self, signal: S, done: oneshot::Sender<ShutdownOutcome>)
    where
        S: Future<Output = Signal>,
    {
        let signal = signal.await;
        let _ = self
            .logger
            .info("shutting down server", &props! { "signal" => signal });

        let outcome = self.drain().await;
        metrics::record_shutdown(match outcome {
            Ok(()) => "completed",
            Err(_) => "failed",
        });

        if done.send(outcome).is_err() {
            tracing::debug!("Shutdown outcome dropped: serving task already returned");
        }
    }

    async fn drain(&self) -> ShutdownOutcome {
        self.state.send_replace(ServerState::Draining);

        if tokio::time::timeout(self.grace, self.connections.wait_idle())
            .await
            .is_err()
        {
            let remaining = self.connections.active_count();
            tracing::warn!(remaining, grace = ?self.grace, "Grace period elapsed with active connections");
            return Err(ShutdownError::DeadlineExceeded {
                grace: self.grace,
                remaining,
            });
        }

        let _ = self
            .logger
            .info("completing background tasks", &props! { "addr" => self.addr });

        tracing::debug!(outstanding = self.tasks.outstanding(), "Waiting for background tasks");
        self.tasks.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::Level;
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn messages(&self) -> Vec<String> {
            let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            raw.lines()
                .map(|l| {
                    let v: serde_json::Value = serde_json::from_str(l).unwrap();
                    v["message"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn drain(grace: Duration) -> (Drain, SharedBuf, watch::Receiver<ServerState>) {
        let buf = SharedBuf::default();
        let logger = Arc::new(Logger::new(buf.clone(), Level::Info));
        let (state, rx) = watch::channel(ServerState::Running);
        let drain = Drain {
            tasks: BackgroundTasks::new(Arc::clone(&logger)),
            logger,
            state: Arc::new(state),
            connections: ConnectionTracker::new(),
            grace,
            addr: "127.0.0.1:4000".parse().unwrap(),
        };
        (drain, buf, rx)
    }

    #[tokio::test]
    async fn idle_server_drains_successfully() {
        let (drain, buf, state) = drain(Duration::from_secs(1));
        let (tx, rx) = oneshot::channel();

        drain.run(async { Signal::Interrupt }, tx).await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(*state.borrow(), ServerState::Draining);
        assert_eq!(
            buf.messages(),
            vec!["shutting down server", "completing background tasks"]
        );
    }

    #[tokio::test]
    async fn active_connection_past_grace_fails() {
        let (drain, buf, _state) = drain(Duration::from_millis(50));
        let _conn = drain.connections.track();
        let (tx, rx) = oneshot::channel();

        drain.run(async { Signal::Terminate }, tx).await;

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ShutdownError::DeadlineExceeded { remaining: 1, .. }));
        assert_eq!(buf.messages(), vec!["shutting down server"]);
    }

    #[tokio::test]
    async fn background_tasks_are_not_bounded_by_grace() {
        let (drain, _buf, _state) = drain(Duration::from_millis(10));
        let task = drain.tasks.register();
        let (tx, rx) = oneshot::channel();

        let watcher = tokio::spawn(drain.run(async { Signal::Interrupt }, tx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!watcher.is_finished(), "still waiting for the background task");

        drop(task);
        watcher.await.unwrap();
        assert!(rx.await.unwrap().is_ok());
    }
}
