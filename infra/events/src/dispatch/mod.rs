//! Delivery strategies and the failure isolation they share.

mod inline;
mod queued;

pub(crate) use inline::SyncDispatcher;
pub(crate) use queued::AsyncDispatcher;

use crate::event::Event;
use crate::handler::Handler;
use crate::registry::SubscriberRegistry;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Resolves the handlers for `event`.
///
/// Predicate panics are isolated per handler by the registry. A panic in
/// [`Event::event_type`] itself is logged and yields no handlers.
fn resolve<E: Event>(registry: &SubscriberRegistry<E>, event: &E) -> Vec<Arc<dyn Handler<E>>> {
    panic::catch_unwind(AssertUnwindSafe(|| registry.matching_handlers(&event.event_type())))
        .unwrap_or_else(|payload| {
            error!(
                panic = panic_message(payload.as_ref()),
                "Failed to resolve handlers for event"
            );
            Vec::new()
        })
}

/// Invokes one handler. Errors and panics are logged and never escape.
fn deliver<E: Event>(handler: &dyn Handler<E>, event: &E) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => {
            trace!(handler = handler.name(), event = ?event.event_type(), "Event delivered");
        },
        Ok(Err(err)) => {
            error!(
                handler = handler.name(),
                event = ?event.event_type(),
                error = %format_args!("{err:#}"),
                "Handler failed to process event"
            );
        },
        Err(payload) => {
            error!(
                handler = handler.name(),
                event = ?event.event_type(),
                panic = panic_message(payload.as_ref()),
                "Handler panicked while processing event"
            );
        },
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
