//! Event contract and the stock [`Message`] container.
//!
//! The bus only needs two things from a payload: a discriminator to route by and a
//! `lock` hook it calls once at publish. [`Message`] implements both on top of a
//! string-keyed property bag and a one-value-per-type object bag.

use crate::error::{EventBusError, Result};
use fxhash::FxHashMap;
use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A payload that can be published on an [`EventBus`](crate::EventBus).
///
/// `Kind` is the routing discriminator: handlers declare an exact `Kind` they want,
/// or none and decide per `Kind` through [`Handler::can_handle`](crate::Handler::can_handle).
pub trait Event: Send + Sync + 'static {
    /// The type discriminator handlers subscribe to.
    type Kind: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Returns the discriminator of this event. Must never change for an instance.
    fn event_type(&self) -> Self::Kind;

    /// Freezes the event. Called once per publish, before any handler sees it.
    ///
    /// Must be idempotent. The default does nothing, which suits immutable types.
    fn lock(&self) {}
}

/// String discriminator used by [`Message`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(Arc<str>);

impl EventType {
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EventType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

type Value = Box<dyn Any + Send + Sync>;

/// A general-purpose event: a type name, a property bag and an object bag.
///
/// Properties are arbitrary values under string keys. Objects are keyed by their
/// concrete type, so a message holds at most one value of each type and setting a
/// second one replaces the first.
///
/// A message is mutable until it is published. Publishing locks it, and every
/// setter called afterwards fails with [`EventBusError::EventLocked`].
///
/// # Examples
///
/// ```rust
/// use minibus::Message;
///
/// #[derive(Debug, PartialEq)]
/// struct Author(&'static str);
///
/// let message = Message::builder("doc.saved")
///     .val("path", "/tmp/report.txt")
///     .val("bytes", 512_u64)
///     .set(Author("alice"))
///     .build();
///
/// assert_eq!(message.kind().as_str(), "doc.saved");
/// assert_eq!(message.str_value("path"), Some("/tmp/report.txt"));
/// assert_eq!(message.value::<u64>("bytes"), Some(&512));
/// assert_eq!(message.object::<Author>(), Some(&Author("alice")));
/// ```
pub struct Message {
    kind: EventType,
    properties: FxHashMap<String, Value>,
    objects: FxHashMap<TypeId, Value>,
    locked: AtomicBool,
}

impl Message {
    #[must_use]
    pub fn new(kind: impl Into<EventType>) -> Self {
        Self {
            kind: kind.into(),
            properties: FxHashMap::default(),
            objects: FxHashMap::default(),
            locked: AtomicBool::new(false),
        }
    }

    /// Creates a message pre-filled with `properties`.
    #[must_use]
    pub fn with_properties<K>(
        kind: impl Into<EventType>,
        properties: impl IntoIterator<Item = (K, Value)>,
    ) -> Self
    where
        K: Into<String>,
    {
        let mut message = Self::new(kind);
        message.properties.extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        message
    }

    #[must_use = "The message is not created until you call .build()"]
    pub fn builder(kind: impl Into<EventType>) -> MessageBuilder {
        MessageBuilder { message: Self::new(kind) }
    }

    #[must_use]
    pub const fn kind(&self) -> &EventType {
        &self.kind
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns [`EventBusError::EventLocked`] once the message has been published.
    pub fn set_value<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) -> Result<()> {
        self.ensure_unlocked("set_value")?;
        self.properties.insert(key.into(), Box::new(value));
        Ok(())
    }

    /// Returns the property under `key` if it exists and is a `V`.
    #[must_use]
    pub fn value<V: Any>(&self, key: &str) -> Option<&V> {
        self.properties.get(key).and_then(|v| v.downcast_ref::<V>())
    }

    /// Returns the property under `key` as a `V`, or `default` if it is missing or has
    /// another type.
    ///
    /// ```rust
    /// use minibus::Message;
    ///
    /// let message = Message::builder("job").val("retries", 3_u32).build();
    /// assert_eq!(*message.value_or("retries", &0_u32), 3);
    /// assert_eq!(*message.value_or("timeout", &30_u64), 30);
    /// ```
    #[must_use]
    pub fn value_or<'a, V: Any>(&'a self, key: &str, default: &'a V) -> &'a V {
        self.value(key).unwrap_or(default)
    }

    /// Returns a string property stored either as `String` or `&'static str`.
    ///
    /// Values of any other type are not converted and yield `None`. Store a rendering
    /// with [`set_display`](Self::set_display) to read a non-string value as text.
    #[must_use]
    pub fn str_value(&self, key: &str) -> Option<&str> {
        let value = self.properties.get(key)?;
        value
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| value.downcast_ref::<&'static str>().copied())
    }

    #[must_use]
    pub fn str_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.str_value(key).unwrap_or(default)
    }

    /// Stores the [`Display`](fmt::Display) rendering of `value` under `key`, readable
    /// through [`str_value`](Self::str_value).
    ///
    /// # Errors
    /// Returns [`EventBusError::EventLocked`] once the message has been published.
    pub fn set_display(&mut self, key: impl Into<String>, value: &impl fmt::Display) -> Result<()> {
        self.set_value(key, value.to_string())
    }

    /// Iterates over property keys in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Returns `true` if at least one property is set.
    #[must_use]
    pub fn has_properties(&self) -> bool {
        !self.properties.is_empty()
    }

    /// Associates `object` with the message, replacing a previous value of type `T`.
    ///
    /// # Errors
    /// Returns [`EventBusError::EventLocked`] once the message has been published.
    pub fn set_object<T: Any + Send + Sync>(&mut self, object: T) -> Result<()> {
        self.ensure_unlocked("set_object")?;
        self.objects.insert(TypeId::of::<T>(), Box::new(object));
        Ok(())
    }

    /// Returns the object of type `T`, if one was set.
    #[must_use]
    pub fn object<T: Any>(&self) -> Option<&T> {
        self.objects.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn objects(&self) -> impl Iterator<Item = &(dyn Any + Send + Sync)> {
        self.objects.values().map(|v| &**v)
    }

    /// Returns `true` if at least one object is set.
    #[must_use]
    pub fn has_objects(&self) -> bool {
        !self.objects.is_empty()
    }

    fn ensure_unlocked(&self, operation: &'static str) -> Result<()> {
        if self.is_locked() {
            return Err(EventBusError::EventLocked {
                message: operation.into(),
                context: Some(format!("message `{}` was already published", self.kind).into()),
            });
        }
        Ok(())
    }
}

impl Event for Message {
    type Kind = EventType;

    fn event_type(&self) -> EventType {
        self.kind.clone()
    }

    fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("objects", &self.objects.len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Fluent builder for [`Message`].
#[derive(Debug)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    #[must_use = "Adds a property to the message under construction"]
    pub fn val<V: Any + Send + Sync>(mut self, key: impl Into<String>, value: V) -> Self {
        self.message.properties.insert(key.into(), Box::new(value));
        self
    }

    #[must_use = "Adds an object to the message under construction"]
    pub fn set<T: Any + Send + Sync>(mut self, object: T) -> Self {
        self.message.objects.insert(TypeId::of::<T>(), Box::new(object));
        self
    }

    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}
