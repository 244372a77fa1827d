//! Background task accounting.
//!
//! Work that outlives the request that triggered it (sending an email,
//! cleaning up expired tokens) registers here so shutdown can wait for it.
//! Shutdown waits for every registration to be released, with no deadline.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::lifecycle::counter::{CountGuard, WaitCounter};
use crate::observability::logging::Logger;
use crate::observability::metrics;
use crate::props;

/// Registry of outstanding background tasks.
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    counter: WaitCounter,
    logger: Arc<Logger>,
}

impl BackgroundTasks {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            counter: WaitCounter::new(),
            logger,
        }
    }

    /// Register one unit of background work.
    ///
    /// The registration lasts until the guard is dropped. Move the guard into
    /// the thread or task doing the work so every exit path releases it.
    pub fn register(&self) -> TaskGuard {
        metrics::background_task_registered();
        TaskGuard {
            _count: self.counter.acquire(),
        }
    }

    /// Run `task` on the runtime as a registered background task.
    ///
    /// A panic inside the task is logged at ERROR and does not leak the
    /// registration.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.register();
        let logger = Arc::clone(&self.logger);

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                let _ = logger.error(panic_message(panic.as_ref()), &props!());
            }
        })
    }

    /// Number of tasks currently registered.
    pub fn outstanding(&self) -> usize {
        self.counter.count()
    }

    /// Wait until no task is registered.
    pub async fn wait(&self) {
        self.counter.wait_zero().await
    }
}

/// Registration of one background task. Dropping it deregisters the task.
#[derive(Debug)]
#[must_use = "dropping the guard deregisters the task immediately"]
pub struct TaskGuard {
    _count: CountGuard,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        metrics::background_task_released();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("background task panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("background task panicked: {message}")
    } else {
        "background task panicked".to_string()
    }
}
