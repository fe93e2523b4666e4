//! # Minibus
//!
//! A minimal in-process publish/subscribe event bus with weakly-held subscribers.
//!
//! ## Overview
//!
//! Publishers hand an [`Event`] to an [`EventBus`]; the bus routes it to every subscribed
//! [`Handler`] whose type affinity matches the event type, or whose catch-all predicate
//! accepts it. The bus never owns its handlers: dropping the last [`Arc`](std::sync::Arc)
//! to a handler unsubscribes it.
//!
//! ## Features
//!
//! * **Two dispatch modes**: inline on the publishing thread, or queued and fanned out to a
//!   pluggable [`TaskExecutor`].
//! * **Failure isolation**: handler errors and panics are logged and never reach the
//!   publisher or other handlers.
//! * **Automatic reclamation**: dead subscriptions are removed without any explicit call.
//! * **Generic message**: [`Message`] carries a string type, named properties and typed
//!   objects, and becomes read-only once published.
//!
//! # Example
//!
//! ```rust
//! use minibus::{EventBus, EventBusError, EventType, FnHandler, Message};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::<Message>::asynchronous()?;
//!
//!     let audit = Arc::new(FnHandler::matching(
//!         |kind: &EventType| kind.as_str().starts_with("user."),
//!         |message: &Message| {
//!             let id = message.value::<u64>("id").copied().unwrap_or_default();
//!             tracing::info!(kind = %message.kind(), id, "audit");
//!             Ok(())
//!         },
//!     ));
//!     bus.subscribe(&audit);
//!
//!     bus.publish(Message::builder("user.created").val("id", 42_u64).build())?;
//!     bus.shutdown();
//!     Ok(())
//! }
//! ```

mod builder;
mod bus;
mod dispatch;
mod error;
mod event;
mod executor;
mod handler;
mod registry;

pub use builder::{AsyncMode, EventBusBuilder, NoMode, SyncMode};
pub use bus::{DispatchMode, EventBus};
pub use error::{EventBusError, EventBusErrorExt, Result};
pub use event::{Event, EventType, Message, MessageBuilder};
pub use executor::{Task, TaskExecutor, TokioExecutor};
pub use handler::{FnHandler, Handler};
pub use registry::SubscriberRegistry;
