use tokio::runtime::Handle;

/// A unit of work handed to a [`TaskExecutor`]: one handler invocation for one event.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget worker pool used by the asynchronous bus to run handlers.
///
/// Implementations decide threading and sizing. `submit` should return quickly: it is
/// called from the drain task, and a blocking `submit` delays every queued event.
///
/// Any `Fn(Task) + Send + Sync` closure is an executor:
///
/// ```rust
/// use minibus::{Task, TaskExecutor};
///
/// let inline = |task: Task| task();
/// inline.submit(Box::new(|| {}));
/// ```
pub trait TaskExecutor: Send + Sync + 'static {
    /// Schedules `task` to run once. The task already isolates handler failures.
    fn submit(&self, task: Task);
}

impl<F> TaskExecutor for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn submit(&self, task: Task) {
        self(task);
    }
}

/// Runs each task on the blocking thread pool of a Tokio runtime.
///
/// Handlers are synchronous and may block, so they go to `spawn_blocking` rather than
/// to the async worker threads.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor bound to the runtime the caller is running on.
    ///
    /// # Errors
    /// Returns [`EventBusError::RuntimeUnavailable`](crate::EventBusError::RuntimeUnavailable)
    /// outside a Tokio runtime.
    pub fn current() -> crate::Result<Self> {
        Ok(Self::new(Handle::try_current()?))
    }
}

impl TaskExecutor for TokioExecutor {
    fn submit(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}
