//! Cancellable periodic task, the async replacement for
//! `original_source/JobThread.py`'s `TimedJobThread`.
//!
//! The Python original waits on `Event.wait(interval)`, which returns early
//! the moment `stop()` is called, and otherwise fires `execute` every
//! `interval`. `PeriodicJob` reproduces that promptly-cancellable wait with
//! `tokio::select!` over a sleep and a `Notify`, rather than relying on
//! interrupting blocking I/O.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// A task that runs an async closure on a fixed interval until stopped.
///
/// Dropping a running `PeriodicJob` without calling [`PeriodicJob::stop`]
/// aborts the underlying task; prefer an explicit `stop().await` so the
/// in-flight tick finishes cleanly.
pub struct PeriodicJob {
    handle: JoinHandle<()>,
    stopped: Arc<Notify>,
}

impl PeriodicJob {
    /// Spawn `execute` to run every `interval`, starting after the first
    /// `interval` elapses (matching `Event.wait(interval)` firing before
    /// the first execution, never immediately on start).
    pub fn spawn<F, Fut>(interval: Duration, mut execute: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let stopped = Arc::new(Notify::new());
        let stopped_for_task = stopped.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        execute().await;
                    }
                    () = stopped_for_task.notified() => {
                        debug!("periodic job stopped");
                        break;
                    }
                }
            }
        });

        Self { handle, stopped }
    }

    /// Signal the loop to stop and wait for the task to finish its current
    /// iteration, if any, before returning.
    pub async fn stop(self) {
        self.cancel();
        let _ = self.handle.await;
    }

    /// Signal the loop to stop without waiting for it to exit.
    ///
    /// Use this instead of `stop` when the caller is running inside the
    /// job's own `execute` closure: awaiting `self.handle` there would join
    /// the very task currently executing and hang forever. The task still
    /// exits on its own after the current tick returns.
    pub fn cancel(&self) {
        self.stopped.notify_one();
    }

    /// `true` if the underlying task has already exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
