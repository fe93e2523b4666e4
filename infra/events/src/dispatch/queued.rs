//! Queued dispatch: publishers enqueue, a single drain task fans out to an executor.
//!
//! ```text
//!  publish() ──► [unbounded queue] ──► drain task ──► matching_handlers()
//!                                          │               │
//!                                          │               ├──► executor.submit(h1, ev)
//!                                          │               └──► executor.submit(hN, ev)
//!                                          └──► reclaim_stale() every iteration,
//!                                               sweep() on every idle tick
//! ```
//!
//! Events leave the queue in publish order. Handler tasks are scheduled independently,
//! so completion order across handlers and events is not guaranteed.

use super::{deliver, panic_message, resolve};
use crate::error::{EventBusError, Result};
use crate::event::Event;
use crate::executor::TaskExecutor;
use crate::registry::SubscriberRegistry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

pub(crate) struct AsyncDispatcher<E: Event> {
    queue: mpsc::UnboundedSender<Arc<E>>,
    queued: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl<E: Event> AsyncDispatcher<E> {
    /// Spawns the drain task on `runtime` and returns the publishing side.
    ///
    /// # Errors
    /// Returns [`EventBusError::InvalidConfiguration`] if `runtime` was built without
    /// the time driver, which the idle reclamation tick needs.
    pub(crate) fn spawn(
        registry: Arc<SubscriberRegistry<E>>,
        executor: Arc<dyn TaskExecutor>,
        runtime: &Handle,
        reclaim_interval: Duration,
    ) -> Result<Self> {
        let ticker = idle_ticker(runtime, reclaim_interval)?;
        let (queue, receiver) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let worker = DrainWorker {
            registry,
            executor,
            receiver,
            queued: Arc::clone(&queued),
            shutdown: shutdown.clone(),
            ticker,
        };
        drop(runtime.spawn(worker.run()));

        Ok(Self { queue, queued, shutdown })
    }

    /// Locks and enqueues `event`. Never waits for handlers.
    pub(crate) fn enqueue(&self, event: Arc<E>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(closed());
        }

        event.lock();
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.queue.send(event).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(closed());
        }
        Ok(())
    }

    /// `true` while at least one event has not been fully fanned out yet.
    ///
    /// Tasks already handed to the executor are not counted.
    pub(crate) fn has_pending_events(&self) -> bool {
        self.queued.load(Ordering::Acquire) > 0
    }

    pub(crate) fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            debug!("Stopping event drain worker");
            self.shutdown.cancel();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl<E: Event> Drop for AsyncDispatcher<E> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<E: Event> std::fmt::Debug for AsyncDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

fn closed() -> EventBusError {
    EventBusError::Closed {
        message: "event rejected".into(),
        context: Some("the asynchronous dispatcher was shut down".into()),
    }
}

/// Builds the idle tick inside `runtime`. Tokio panics when the time driver is
/// missing, so that panic is turned into a configuration error here instead of
/// killing the drain task later.
fn idle_ticker(runtime: &Handle, period: Duration) -> Result<Interval> {
    let _entered = runtime.enter();
    let mut ticker = panic::catch_unwind(|| tokio::time::interval(period)).map_err(|payload| {
        EventBusError::InvalidConfiguration {
            message: "the runtime has no time driver".into(),
            context: Some(panic_message(payload.as_ref()).to_owned().into()),
        }
    })?;
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Ok(ticker)
}

struct DrainWorker<E: Event> {
    registry: Arc<SubscriberRegistry<E>>,
    executor: Arc<dyn TaskExecutor>,
    receiver: mpsc::UnboundedReceiver<Arc<E>>,
    queued: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    ticker: Interval,
}

impl<E: Event> DrainWorker<E> {
    async fn run(mut self) {
        debug!(reclaim_interval = ?self.ticker.period(), "Event drain worker started");

        loop {
            self.registry.reclaim_stale();

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.receiver.recv() => {
                    let Some(event) = next else {
                        self.shutdown.cancel();
                        break;
                    };
                    self.fan_out(&event);
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                },
                _ = self.ticker.tick() => {
                    self.registry.sweep();
                },
            }
        }
    }

    /// Submits one executor task per matching handler.
    fn fan_out(&self, event: &Arc<E>) {
        let handlers = resolve(&self.registry, event.as_ref());
        trace!(event = ?event.event_type(), handlers = handlers.len(), "Fanning out event");

        let submitted = panic::catch_unwind(AssertUnwindSafe(|| {
            for handler in handlers {
                let event = Arc::clone(event);
                self.executor.submit(Box::new(move || deliver(handler.as_ref(), event.as_ref())));
            }
        }));
        if let Err(payload) = submitted {
            error!(
                event = ?event.event_type(),
                panic = panic_message(payload.as_ref()),
                "Task executor panicked while scheduling handlers"
            );
        }
    }

    fn discard_queued(&mut self) -> usize {
        self.receiver.close();
        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        self.queued.fetch_sub(discarded, Ordering::AcqRel);
        discarded
    }
}

/// Runs however the task ends: after a shutdown, on a panic, or when the runtime
/// drops it. A worker that was not asked to stop closes the bus so publishers see
/// [`EventBusError::Closed`] instead of a queue nobody drains.
impl<E: Event> Drop for DrainWorker<E> {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            error!("Event drain worker terminated unexpectedly, closing the bus");
            self.shutdown.cancel();
        }
        let discarded = self.discard_queued();
        debug!(discarded, "Event drain worker stopped");
    }
}
