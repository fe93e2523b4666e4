//! Type-indexed registry of weakly-held subscribers.
//!
//! Handlers live in one of two partitions: a bucket per exact event type, or the
//! catch-all list consulted through [`Handler::can_handle`]. The registry only holds
//! [`Weak`] references. A handler whose last [`Arc`] is dropped elsewhere is reported
//! to the reclamation channel the first time a lookup or sweep finds it dead, and
//! removed on the next [`SubscriberRegistry::reclaim_stale`].

use crate::dispatch::panic_message;
use crate::event::Event;
use crate::handler::Handler;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Identity of a handler: the address of its shared allocation.
///
/// The registry keeps a [`Weak`] to every enrolled handler, which pins the allocation,
/// so an address cannot be reused by another handler while its entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandlerKey(usize);

impl HandlerKey {
    fn of<T: ?Sized>(handler: &Arc<T>) -> Self {
        Self(Arc::as_ptr(handler).cast::<()>().addr())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Enrollment<K> {
    Exact(K),
    CatchAll,
}

/// Non-owning reference to a subscribed handler.
pub(crate) struct WeakSubscriber<E: Event> {
    key: HandlerKey,
    handler: Weak<dyn Handler<E>>,
    reported: AtomicBool,
}

impl<E: Event> WeakSubscriber<E> {
    fn new(handler: &Arc<dyn Handler<E>>) -> Self {
        Self {
            key: HandlerKey::of(handler),
            handler: Arc::downgrade(handler),
            reported: AtomicBool::new(false),
        }
    }

    fn upgrade(&self) -> Option<Arc<dyn Handler<E>>> {
        self.handler.upgrade()
    }

    fn is_reclaimed(&self) -> bool {
        self.handler.strong_count() == 0
    }

    /// Returns `true` only for the first caller, so each dead entry is queued once.
    fn mark_reported(&self) -> bool {
        !self.reported.swap(true, Ordering::AcqRel)
    }
}

impl<E: Event> PartialEq for WeakSubscriber<E> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<E: Event> Eq for WeakSubscriber<E> {}

impl<E: Event> fmt::Debug for WeakSubscriber<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSubscriber")
            .field("key", &self.key)
            .field("reclaimed", &self.is_reclaimed())
            .finish()
    }
}

struct Partitions<E: Event> {
    by_kind: FxHashMap<E::Kind, Vec<WeakSubscriber<E>>>,
    catch_all: Vec<WeakSubscriber<E>>,
    enrolled: FxHashMap<HandlerKey, Enrollment<E::Kind>>,
}

impl<E: Event> Default for Partitions<E> {
    fn default() -> Self {
        Self {
            by_kind: FxHashMap::default(),
            catch_all: Vec::new(),
            enrolled: FxHashMap::default(),
        }
    }
}

impl<E: Event> Partitions<E> {
    fn insert(&mut self, enrollment: Enrollment<E::Kind>, subscriber: WeakSubscriber<E>) -> bool {
        let key = subscriber.key;
        match self.enrolled.get(&key).map(|current| *current == enrollment) {
            Some(true) => return false,
            // Affinity changed since the last subscribe; keep a single enrollment.
            Some(false) => {
                self.remove(key);
            },
            None => {},
        }

        let bucket = match &enrollment {
            Enrollment::Exact(kind) => self.by_kind.entry(kind.clone()).or_default(),
            Enrollment::CatchAll => &mut self.catch_all,
        };
        bucket.push(subscriber);
        self.enrolled.insert(key, enrollment);
        true
    }

    fn remove(&mut self, key: HandlerKey) -> bool {
        let Some(enrollment) = self.enrolled.remove(&key) else {
            return false;
        };
        match enrollment {
            Enrollment::Exact(kind) => {
                if let Some(bucket) = self.by_kind.get_mut(&kind) {
                    bucket.retain(|s| s.key != key);
                    if bucket.is_empty() {
                        self.by_kind.remove(&kind);
                    }
                }
            },
            Enrollment::CatchAll => self.catch_all.retain(|s| s.key != key),
        }
        true
    }

    /// Removes `key` only if its entry still points at a dropped handler.
    ///
    /// A reported key may have been unsubscribed and its address reused by a newly
    /// enrolled handler before the report is drained.
    fn remove_reclaimed(&mut self, key: HandlerKey) -> bool {
        let reclaimed = match self.enrolled.get(&key) {
            Some(Enrollment::Exact(kind)) => self.by_kind.get(kind).map(Vec::as_slice),
            Some(Enrollment::CatchAll) => Some(self.catch_all.as_slice()),
            None => None,
        }
        .and_then(|bucket| bucket.iter().find(|s| s.key == key))
        .is_some_and(WeakSubscriber::is_reclaimed);
        reclaimed && self.remove(key)
    }

    fn all(&self) -> impl Iterator<Item = &WeakSubscriber<E>> {
        self.by_kind.values().flatten().chain(&self.catch_all)
    }
}

/// Concurrent registry of weakly-held handlers, partitioned by type affinity.
///
/// Lookups take a shared read lock and release it before any handler code runs, so
/// handlers may subscribe or unsubscribe from inside [`Handler::handle`].
pub struct SubscriberRegistry<E: Event> {
    partitions: RwLock<Partitions<E>>,
    stale_tx: mpsc::UnboundedSender<HandlerKey>,
    stale_rx: Mutex<mpsc::UnboundedReceiver<HandlerKey>>,
}

impl<E: Event> Default for SubscriberRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> SubscriberRegistry<E> {
    /// Creates an empty registry with its own reclamation channel.
    #[must_use]
    pub fn new() -> Self {
        let (stale_tx, stale_rx) = mpsc::unbounded_channel();
        Self {
            partitions: RwLock::new(Partitions::default()),
            stale_tx,
            stale_rx: Mutex::new(stale_rx),
        }
    }

    /// Enrolls `handler` without taking ownership of it.
    ///
    /// Returns `false` if the same instance was already enrolled for the same affinity.
    pub fn subscribe<H: Handler<E>>(&self, handler: &Arc<H>) -> bool {
        let handler: Arc<dyn Handler<E>> = Arc::clone(handler) as Arc<dyn Handler<E>>;
        self.subscribe_dyn(&handler)
    }

    /// Same as [`subscribe`](Self::subscribe) for an already type-erased handler.
    pub fn subscribe_dyn(&self, handler: &Arc<dyn Handler<E>>) -> bool {
        let enrollment = handler.type_affinity().map_or(Enrollment::CatchAll, Enrollment::Exact);
        let subscriber = WeakSubscriber::new(handler);
        trace!(handler = handler.name(), ?enrollment, "Subscribing handler");
        self.partitions.write().insert(enrollment, subscriber)
    }

    /// Removes `handler` from whichever partition holds it.
    ///
    /// Returns `false` if it was not enrolled.
    pub fn unsubscribe<H: ?Sized>(&self, handler: &Arc<H>) -> bool {
        self.partitions.write().remove(HandlerKey::of(handler))
    }

    /// Returns `true` if `handler` is enrolled, even if it was dropped and not yet reclaimed.
    #[must_use]
    pub fn contains<H: ?Sized>(&self, handler: &Arc<H>) -> bool {
        self.partitions.read().enrolled.contains_key(&HandlerKey::of(handler))
    }

    /// Returns live handlers for `kind`: the exact bucket first, in subscription order,
    /// then every catch-all handler whose [`Handler::can_handle`] accepts `kind`.
    ///
    /// Reclaimed handlers are skipped and queued for [`reclaim_stale`](Self::reclaim_stale).
    /// A catch-all handler whose `can_handle` panics is logged and left out; the others
    /// are unaffected.
    #[must_use]
    pub fn matching_handlers(&self, kind: &E::Kind) -> Vec<Arc<dyn Handler<E>>> {
        let (mut matched, candidates) = {
            let partitions = self.partitions.read();
            let exact = partitions
                .by_kind
                .get(kind)
                .map(|bucket| self.upgrade_all(bucket))
                .unwrap_or_default();
            (exact, self.upgrade_all(&partitions.catch_all))
        };

        matched.extend(candidates.into_iter().filter(|handler| accepts(handler.as_ref(), kind)));
        matched
    }

    /// Drains the reclamation channel and removes every reported entry.
    ///
    /// Returns the number of entries removed.
    pub fn reclaim_stale(&self) -> usize {
        let reported: Vec<HandlerKey> = {
            let mut rx = self.stale_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        if reported.is_empty() {
            return 0;
        }

        let removed = {
            let mut partitions = self.partitions.write();
            reported.into_iter().filter(|key| partitions.remove_reclaimed(*key)).count()
        };
        if removed > 0 {
            debug!(removed, "Reclaimed stale subscribers");
        }
        removed
    }

    /// Scans every partition and queues dead entries for reclamation.
    ///
    /// Returns the number of newly queued entries.
    pub fn sweep(&self) -> usize {
        let partitions = self.partitions.read();
        partitions.all().filter(|subscriber| self.report_if_reclaimed(subscriber)).count()
    }

    /// Number of enrolled entries, including dead ones not yet reclaimed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.read().enrolled.len()
    }

    /// Returns `true` if no entry is enrolled, dead or alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upgrade_all(&self, bucket: &[WeakSubscriber<E>]) -> Vec<Arc<dyn Handler<E>>> {
        bucket
            .iter()
            .filter_map(|subscriber| {
                let handler = subscriber.upgrade();
                if handler.is_none() {
                    self.report(subscriber);
                }
                handler
            })
            .collect()
    }

    fn report_if_reclaimed(&self, subscriber: &WeakSubscriber<E>) -> bool {
        subscriber.is_reclaimed() && self.report(subscriber)
    }

    fn report(&self, subscriber: &WeakSubscriber<E>) -> bool {
        if !subscriber.mark_reported() {
            return false;
        }
        trace!(key = ?subscriber.key, "Queueing reclaimed subscriber");
        // The receiver lives in `self`, so the channel cannot be closed here.
        self.stale_tx.send(subscriber.key).is_ok()
    }
}

fn accepts<E: Event>(handler: &dyn Handler<E>, kind: &E::Kind) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| handler.can_handle(kind))).unwrap_or_else(|payload| {
        error!(
            handler = handler.name(),
            event = ?kind,
            panic = panic_message(payload.as_ref()),
            "Handler predicate panicked, skipping handler"
        );
        false
    })
}

impl<E: Event> fmt::Debug for SubscriberRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partitions = self.partitions.read();
        f.debug_struct("SubscriberRegistry")
            .field("kinds", &partitions.by_kind.len())
            .field("catch_all", &partitions.catch_all.len())
            .field("enrolled", &partitions.enrolled.len())
            .finish()
    }
}
