//! Counter with a wait-for-zero primitive.
//!
//! Shared by the background-task registry and the connection tracker.
//! Increments and decrements are atomic; waiters park on a [`Notify`] that is
//! woken whenever the count drops to zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    zero: Notify,
}

/// Cloneable handle to a shared outstanding-work counter.
#[derive(Debug, Clone, Default)]
pub struct WaitCounter {
    inner: Arc<Inner>,
}

impl WaitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter. The returned guard decrements it on drop,
    /// including when the owning task unwinds.
    pub fn acquire(&self) -> CountGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        CountGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Resolve once the counter is zero. Resolves immediately if it already is.
    ///
    /// There is no timeout: callers that need one wrap this future.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.inner.zero.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the load and the
            // await cannot be missed.
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Scoped registration on a [`WaitCounter`].
#[derive(Debug)]
#[must_use = "dropping the guard releases the registration immediately"]
pub struct CountGuard {
    inner: Arc<Inner>,
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.zero.notify_waiters();
        }
    }
}
