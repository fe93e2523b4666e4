use crate::event::Event;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

/// A consumer of events published on an [`EventBus`](crate::EventBus).
///
/// A handler either declares one exact [`Event::Kind`] through
/// [`type_affinity`](Handler::type_affinity), or returns `None` and is asked per event
/// through [`can_handle`](Handler::can_handle).
///
/// [`handle`](Handler::handle) may run on the publisher's thread (synchronous bus) or on
/// an executor thread (asynchronous bus). Errors and panics are caught and logged by the
/// bus; they never reach the publisher or other handlers.
///
/// # Examples
///
/// ```rust
/// use minibus::{EventType, Handler, Message};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct Audit(AtomicUsize);
///
/// impl Handler<Message> for Audit {
///     fn type_affinity(&self) -> Option<EventType> {
///         None
///     }
///
///     fn can_handle(&self, kind: &EventType) -> bool {
///         kind.as_str().starts_with("user.")
///     }
///
///     fn handle(&self, _event: &Message) -> anyhow::Result<()> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
/// }
/// ```
pub trait Handler<E: Event>: Send + Sync + 'static {
    /// The exact event type this handler wants, or `None` for a catch-all handler.
    fn type_affinity(&self) -> Option<E::Kind>;

    /// Predicate consulted only for catch-all handlers.
    fn can_handle(&self, kind: &E::Kind) -> bool {
        let _ = kind;
        false
    }

    /// Processes one event.
    ///
    /// # Errors
    /// Any error is logged by the dispatcher and otherwise ignored.
    fn handle(&self, event: &E) -> anyhow::Result<()>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

enum Route<K> {
    Exact(K),
    Matching(Box<dyn Fn(&K) -> bool + Send + Sync>),
}

impl<K: fmt::Debug> fmt::Debug for Route<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(kind) => f.debug_tuple("Exact").field(kind).finish(),
            Self::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

/// A [`Handler`] built from closures.
///
/// ```rust
/// use minibus::{FnHandler, Message};
/// use std::sync::Arc;
///
/// let greeter = Arc::new(FnHandler::exact("greet", |msg: &Message| {
///     let _name = msg.str_value_or("name", "stranger");
///     Ok(())
/// }));
///
/// let wildcard = Arc::new(
///     FnHandler::matching(|kind: &minibus::EventType| kind.as_str() != "noise", |_msg: &Message| Ok(()))
///         .with_name("wildcard"),
/// );
/// # let _ = (greeter, wildcard);
/// ```
pub struct FnHandler<E: Event, F> {
    name: Cow<'static, str>,
    route: Route<E::Kind>,
    callback: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnHandler<E, F>
where
    E: Event,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    /// Handler subscribed to exactly one event type.
    pub fn exact(kind: impl Into<E::Kind>, callback: F) -> Self {
        Self {
            name: Cow::Borrowed("fn-handler"),
            route: Route::Exact(kind.into()),
            callback,
            _event: PhantomData,
        }
    }

    /// Catch-all handler that accepts every event type `predicate` approves.
    pub fn matching<P>(predicate: P, callback: F) -> Self
    where
        P: Fn(&E::Kind) -> bool + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed("fn-handler"),
            route: Route::Matching(Box::new(predicate)),
            callback,
            _event: PhantomData,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }
}

impl<E, F> Handler<E> for FnHandler<E, F>
where
    E: Event,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn type_affinity(&self) -> Option<E::Kind> {
        match &self.route {
            Route::Exact(kind) => Some(kind.clone()),
            Route::Matching(_) => None,
        }
    }

    fn can_handle(&self, kind: &E::Kind) -> bool {
        match &self.route {
            Route::Exact(exact) => exact == kind,
            Route::Matching(predicate) => predicate(kind),
        }
    }

    fn handle(&self, event: &E) -> anyhow::Result<()> {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<E: Event, F> fmt::Debug for FnHandler<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).field("route", &self.route).finish()
    }
}
