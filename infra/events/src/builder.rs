use crate::bus::{Dispatcher, EventBus};
use crate::dispatch::{AsyncDispatcher, SyncDispatcher};
use crate::error::{EventBusError, EventBusErrorExt, Result};
use crate::event::Event;
use crate::executor::{TaskExecutor, TokioExecutor};
use crate::registry::SubscriberRegistry;
use private::Sealed;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// How often an idle drain task sweeps the registry for dropped handlers.
const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(1);

struct AsyncConfig {
    executor: Option<Arc<dyn TaskExecutor>>,
    runtime: Option<Handle>,
    reclaim_interval: Duration,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self { executor: None, runtime: None, reclaim_interval: DEFAULT_RECLAIM_INTERVAL }
    }
}

impl fmt::Debug for AsyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncConfig")
            .field("executor", &self.executor.as_ref().map(|_| "custom"))
            .field("runtime", &self.runtime)
            .field("reclaim_interval", &self.reclaim_interval)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NoMode;
#[derive(Debug)]
pub struct SyncMode;
#[derive(Debug)]
pub struct AsyncMode(AsyncConfig);

mod private {
    pub trait Sealed {}
}
impl Sealed for NoMode {}
impl Sealed for SyncMode {}
impl Sealed for AsyncMode {}

/// Typestate builder for [`EventBus`]: pick a dispatch mode, then configure it.
///
/// ```rust
/// use minibus::{EventBus, Message, Task};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), minibus::EventBusError> {
/// let bus = EventBus::<Message>::builder()
///     .asynchronous()
///     .executor(|task: Task| drop(std::thread::spawn(task)))
///     .reclaim_interval(Duration::from_millis(250))
///     .build()?;
/// bus.publish(Message::new("started"))?;
/// # Ok(())
/// # }
/// ```
#[allow(private_bounds)]
pub struct EventBusBuilder<E: Event, S: Sealed = NoMode> {
    state: S,
    _event: PhantomData<fn(E)>,
}

#[allow(private_bounds)]
impl<E: Event, S: Sealed> EventBusBuilder<E, S> {
    fn transition<N: Sealed>(self, state: N) -> EventBusBuilder<E, N> {
        EventBusBuilder { state, _event: PhantomData }
    }
}

impl<E: Event> EventBusBuilder<E, NoMode> {
    #[must_use = "Creates a new bus builder"]
    pub fn new() -> Self {
        Self { state: NoMode, _event: PhantomData }
    }

    #[must_use = "Selects inline delivery on the publishing thread"]
    pub fn synchronous(self) -> EventBusBuilder<E, SyncMode> {
        self.transition(SyncMode)
    }

    #[must_use = "Selects queued delivery through a task executor"]
    pub fn asynchronous(self) -> EventBusBuilder<E, AsyncMode> {
        self.transition(AsyncMode(AsyncConfig::default()))
    }
}

impl<E: Event> Default for EventBusBuilder<E, NoMode> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBusBuilder<E, SyncMode> {
    #[must_use]
    pub fn build(self) -> EventBus<E> {
        debug!(event = std::any::type_name::<E>(), "Creating synchronous event bus");
        EventBus::from_parts(
            Arc::new(SubscriberRegistry::new()),
            Dispatcher::Sync { dispatcher: SyncDispatcher::default(), closed: AtomicBool::new(false) },
        )
    }
}

impl<E: Event> EventBusBuilder<E, AsyncMode> {
    /// Sets the pool handlers run on. Defaults to [`TokioExecutor`] on the bus runtime.
    #[must_use = "Sets the task executor for handler invocations"]
    pub fn executor(mut self, executor: impl TaskExecutor) -> Self {
        self.state.0.executor = Some(Arc::new(executor));
        self
    }

    /// Sets the runtime the drain task is spawned on. Defaults to the current runtime.
    #[must_use = "Sets the runtime for the drain task"]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.state.0.runtime = Some(handle);
        self
    }

    /// Sets how often an idle drain task sweeps for dropped handlers.
    #[must_use = "Sets the idle reclamation interval"]
    pub const fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.state.0.reclaim_interval = interval;
        self
    }

    /// Spawns the drain task and returns the bus.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] for a zero reclaim interval or a
    /// runtime built without the time driver, or [`EventBusError::RuntimeUnavailable`]
    /// if no runtime was given and the caller is not inside one.
    pub fn build(self) -> Result<EventBus<E>> {
        let AsyncConfig { executor, runtime, reclaim_interval } = self.state.0;
        if reclaim_interval.is_zero() {
            return Err(EventBusError::InvalidConfiguration {
                message: "reclaim interval must be greater than zero".into(),
                context: None,
            });
        }

        let runtime = match runtime {
            Some(handle) => handle,
            None => Handle::try_current().context("asynchronous event bus needs a Tokio runtime")?,
        };
        let executor =
            executor.unwrap_or_else(|| Arc::new(TokioExecutor::new(runtime.clone())));

        let registry = Arc::new(SubscriberRegistry::new());
        let dispatcher =
            AsyncDispatcher::spawn(Arc::clone(&registry), executor, &runtime, reclaim_interval)?;
        debug!(event = std::any::type_name::<E>(), "Created asynchronous event bus");
        Ok(EventBus::from_parts(registry, Dispatcher::Async(dispatcher)))
    }
}

impl<E: Event, S: Sealed + fmt::Debug> fmt::Debug for EventBusBuilder<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBusBuilder").field("state", &self.state).finish()
    }
}
