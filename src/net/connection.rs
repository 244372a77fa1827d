//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count connections that are still being served
//! - Let shutdown wait for them to finish

use std::sync::atomic::{AtomicU64, Ordering};

use crate::lifecycle::counter::{CountGuard, WaitCounter};
use crate::observability::metrics;

/// Only uniqueness matters, so relaxed ordering is enough.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks connections that are being served.
///
/// The accept loop also holds a slot for as long as it runs, so
/// [`ConnectionTracker::wait_idle`] cannot resolve while the listener is
/// still able to hand out new connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counter: WaitCounter,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The guard releases it on drop.
    pub fn track(&self) -> ConnectionGuard {
        metrics::connection_opened();
        ConnectionGuard {
            _count: self.counter.acquire(),
            id: ConnectionId::new(),
        }
    }

    /// Hold a slot for the accept loop itself.
    pub(crate) fn hold_listener(&self) -> CountGuard {
        self.counter.acquire()
    }

    /// Connections (and running accept loops) not yet released.
    pub fn active_count(&self) -> usize {
        self.counter.count()
    }

    /// Wait until every tracked connection has closed.
    pub async fn wait_idle(&self) {
        self.counter.wait_zero().await
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    _count: CountGuard,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
