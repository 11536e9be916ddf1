use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

/// Owned handle to a scheduled background task.
///
/// The owner is the only party that can stop the task early: `cancel`
/// aborts it, and dropping the handle aborts it as well, so a timer or
/// polling loop can never outlive the controller that spawned it.
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Spawn `future` onto the runtime and take ownership of it.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Abort the task. Safe to call more than once or after the task has
    /// already finished.
    pub fn cancel(&self) {
        trace!("Cancelling scheduled task");
        self.handle.abort();
    }

    /// Whether the task has run to completion or been aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
