use crate::builder::EventBusBuilder;
use crate::dispatch::{AsyncDispatcher, SyncDispatcher};
use crate::error::{EventBusError, Result};
use crate::event::Event;
use crate::handler::Handler;
use crate::registry::SubscriberRegistry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Delivery strategy of an [`EventBus`], fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Handlers run on the publishing thread before `publish` returns.
    Synchronous,
    /// Events are queued and handlers run on a [`TaskExecutor`](crate::TaskExecutor).
    Asynchronous,
}

pub(crate) enum Dispatcher<E: Event> {
    Sync { dispatcher: SyncDispatcher, closed: AtomicBool },
    Async(AsyncDispatcher<E>),
}

struct BusInner<E: Event> {
    registry: Arc<SubscriberRegistry<E>>,
    dispatcher: Dispatcher<E>,
}

/// In-process publish/subscribe bus.
///
/// Handlers are held weakly: the bus never keeps a handler alive. Once the application
/// drops its last [`Arc`] to a handler, the bus stops delivering to it and reclaims
/// its entry on a later publish (synchronous) or drain iteration (asynchronous).
///
/// The handle is cheap to clone; clones share the same registry and dispatcher.
/// Independent buses never share state.
///
/// # Examples
///
/// ```rust
/// use minibus::{EventBus, FnHandler, Message};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let bus = EventBus::<Message>::synchronous();
/// let seen = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&seen);
/// let handler = Arc::new(FnHandler::exact("user.created", move |_: &Message| {
///     counter.fetch_add(1, Ordering::Relaxed);
///     Ok(())
/// }));
/// bus.subscribe(&handler);
///
/// bus.publish(Message::builder("user.created").val("id", 42_u64).build())?;
/// bus.publish(Message::new("user.deleted"))?;
/// assert_eq!(seen.load(Ordering::Relaxed), 1);
///
/// // Dropping the handler unsubscribes it.
/// drop(handler);
/// bus.publish(Message::new("user.created"))?;
/// assert_eq!(seen.load(Ordering::Relaxed), 1);
/// # Ok::<(), minibus::EventBusError>(())
/// ```
pub struct EventBus<E: Event> {
    inner: Arc<BusInner<E>>,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Event> EventBus<E> {
    #[must_use = "The bus is not created until you call .build()"]
    pub fn builder() -> EventBusBuilder<E> {
        EventBusBuilder::new()
    }

    /// Creates a bus that delivers on the publishing thread.
    #[must_use]
    pub fn synchronous() -> Self {
        Self::builder().synchronous().build()
    }

    /// Creates a queued bus on the current Tokio runtime with default settings.
    ///
    /// # Errors
    /// Returns [`EventBusError::RuntimeUnavailable`] outside a Tokio runtime.
    pub fn asynchronous() -> Result<Self> {
        Self::builder().asynchronous().build()
    }

    pub(crate) fn from_parts(registry: Arc<SubscriberRegistry<E>>, dispatcher: Dispatcher<E>) -> Self {
        Self { inner: Arc::new(BusInner { registry, dispatcher }) }
    }

    /// Subscribes `handler` without taking ownership of it.
    ///
    /// Subscribing the same instance again has no effect. Returns `true` if the handler
    /// was newly enrolled.
    pub fn subscribe<H: Handler<E>>(&self, handler: &Arc<H>) -> bool {
        self.inner.registry.subscribe(handler)
    }

    /// Same as [`subscribe`](Self::subscribe) for a type-erased handler.
    pub fn subscribe_dyn(&self, handler: &Arc<dyn Handler<E>>) -> bool {
        self.inner.registry.subscribe_dyn(handler)
    }

    /// Stops delivery to `handler`. Returns `false` if it was not subscribed.
    pub fn unsubscribe<H: ?Sized>(&self, handler: &Arc<H>) -> bool {
        self.inner.registry.unsubscribe(handler)
    }

    /// Publishes `event` to every matching handler.
    ///
    /// The event is locked before any handler sees it. Handler failures are logged and
    /// never returned here.
    ///
    /// # Errors
    /// Returns [`EventBusError::Closed`] after [`shutdown`](Self::shutdown).
    pub fn publish(&self, event: E) -> Result<()> {
        match &self.inner.dispatcher {
            Dispatcher::Sync { dispatcher, closed } => {
                ensure_open(closed)?;
                dispatcher.dispatch(&self.inner.registry, &event);
                Ok(())
            },
            Dispatcher::Async(dispatcher) => dispatcher.enqueue(Arc::new(event)),
        }
    }

    /// Publishes an already shared event without re-wrapping it.
    ///
    /// # Errors
    /// Returns [`EventBusError::Closed`] after [`shutdown`](Self::shutdown).
    pub fn publish_arc(&self, event: Arc<E>) -> Result<()> {
        match &self.inner.dispatcher {
            Dispatcher::Sync { dispatcher, closed } => {
                ensure_open(closed)?;
                dispatcher.dispatch(&self.inner.registry, event.as_ref());
                Ok(())
            },
            Dispatcher::Async(dispatcher) => dispatcher.enqueue(event),
        }
    }

    /// Reports whether delivery is still in progress.
    ///
    /// Synchronous: `true` only while a `publish` call is running. Asynchronous: `true`
    /// while queued events have not all been handed to the executor; handler tasks
    /// that are already scheduled are not counted, so this is not a completion barrier.
    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        match &self.inner.dispatcher {
            Dispatcher::Sync { dispatcher, .. } => dispatcher.has_pending_events(),
            Dispatcher::Async(dispatcher) => dispatcher.has_pending_events(),
        }
    }

    /// The dispatch mode chosen at construction.
    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        match &self.inner.dispatcher {
            Dispatcher::Sync { .. } => DispatchMode::Synchronous,
            Dispatcher::Async(_) => DispatchMode::Asynchronous,
        }
    }

    /// Number of enrolled handlers, including dropped ones not yet reclaimed.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Removes every handler that was dropped by the application, right now.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        self.inner.registry.sweep();
        self.inner.registry.reclaim_stale()
    }

    /// Stops accepting events. For an asynchronous bus this also stops the drain task
    /// and discards events still queued; tasks already submitted run to completion.
    pub fn shutdown(&self) {
        match &self.inner.dispatcher {
            Dispatcher::Sync { closed, .. } => {
                if !closed.swap(true, Ordering::AcqRel) {
                    debug!("Synchronous event bus closed");
                }
            },
            Dispatcher::Async(dispatcher) => dispatcher.shutdown(),
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called. An asynchronous bus
    /// also closes when its drain task stops, for example because its runtime shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match &self.inner.dispatcher {
            Dispatcher::Sync { closed, .. } => closed.load(Ordering::Acquire),
            Dispatcher::Async(dispatcher) => dispatcher.is_closed(),
        }
    }
}

fn ensure_open(closed: &AtomicBool) -> Result<()> {
    if closed.load(Ordering::Acquire) {
        return Err(EventBusError::Closed {
            message: "event rejected".into(),
            context: Some("the synchronous bus was shut down".into()),
        });
    }
    Ok(())
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("mode", &self.mode())
            .field("registry", &self.inner.registry)
            .field("pending", &self.has_pending_events())
            .finish()
    }
}
