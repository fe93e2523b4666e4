#![allow(dead_code)]

use minibus::{Event, EventType, FnHandler, Handler, Message};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Exact-affinity handler that counts deliveries.
#[must_use]
pub fn counting(kind: &'static str) -> (Arc<dyn Handler<Message>>, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler = FnHandler::exact(kind, move |_: &Message| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .with_name(kind);
    (Arc::new(handler), hits)
}

/// Exact-affinity handler that rejects every event.
#[must_use]
pub fn failing(kind: &'static str) -> Arc<dyn Handler<Message>> {
    Arc::new(FnHandler::exact(kind, |message: &Message| -> anyhow::Result<()> {
        anyhow::bail!("refusing {}", message.kind())
    }))
}

/// Catch-all handler that records the event types it accepts.
pub struct Recorder {
    accepts: &'static [&'static str],
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    #[must_use]
    pub fn new(accepts: &'static [&'static str]) -> Arc<Self> {
        Arc::new(Self { accepts, seen: Mutex::new(Vec::new()) })
    }

    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl Handler<Message> for Recorder {
    fn type_affinity(&self) -> Option<EventType> {
        None
    }

    fn can_handle(&self, kind: &EventType) -> bool {
        self.accepts.contains(&kind.as_str())
    }

    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.seen.lock().push(message.kind().to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Placed,
    Shipped,
}

/// Strongly-typed event with an enum discriminant.
#[derive(Debug)]
pub struct OrderEvent {
    pub kind: OrderKind,
    pub id: u64,
}

impl Event for OrderEvent {
    type Kind = OrderKind;

    fn event_type(&self) -> OrderKind {
        self.kind
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
