use super::{deliver, resolve};
use crate::event::Event;
use crate::registry::SubscriberRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Every this many publishes the whole registry is swept, so handlers dropped for
/// event types that are never published again are still reclaimed.
const SWEEP_EVERY: usize = 64;

/// Delivers every event on the publishing thread. No queue, no background threads.
#[derive(Debug, Default)]
pub(crate) struct SyncDispatcher {
    in_flight: AtomicUsize,
    published: AtomicUsize,
}

/// Keeps the in-flight counter raised for the lifetime of one publish, unwinding included.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SyncDispatcher {
    /// Runs all matching handlers for `event` before returning.
    ///
    /// Returns the number of handlers invoked, successful or not.
    pub(crate) fn dispatch<E: Event>(&self, registry: &SubscriberRegistry<E>, event: &E) -> usize {
        let _in_flight = InFlight::enter(&self.in_flight);
        event.lock();
        if self.published.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == 0 {
            registry.sweep();
        }
        registry.reclaim_stale();

        let handlers = resolve(registry, event);
        trace!(event = ?event.event_type(), handlers = handlers.len(), "Dispatching event inline");
        for handler in &handlers {
            deliver(handler.as_ref(), event);
        }
        handlers.len()
    }

    /// `true` only while a publish is executing.
    pub(crate) fn has_pending_events(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }
}
