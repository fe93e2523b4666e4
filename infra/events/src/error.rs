use std::borrow::Cow;

/// A specialized [`Result`](std::result::Result) alias for bus operations.
pub type Result<T, E = EventBusError> = std::result::Result<T, E>;

/// Errors that can occur during event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// A mutation was attempted on an event that has already been published.
    #[error("Event locked{}: {message}", format_context(.context))]
    EventLocked { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The bus was shut down and no longer accepts events.
    #[error("Event bus closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The asynchronous dispatcher needs a Tokio runtime and none was available.
    #[error("Tokio runtime unavailable{}: {source}", format_context(.context))]
    RuntimeUnavailable {
        source: tokio::runtime::TryCurrentError,
        context: Option<Cow<'static, str>>,
    },

    /// The builder was given a setting the dispatcher cannot run with.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Adds `.context(...)` to results carrying an [`EventBusError`].
pub trait EventBusErrorExt<T> {
    /// Attaches a human-readable context to the error, if any.
    ///
    /// # Errors
    /// Returns the original error with its `context` field populated.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> EventBusErrorExt<T> for Result<T> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut err| {
            match &mut err {
                EventBusError::EventLocked { context: c, .. }
                | EventBusError::Closed { context: c, .. }
                | EventBusError::RuntimeUnavailable { context: c, .. }
                | EventBusError::InvalidConfiguration { context: c, .. } => {
                    *c = Some(context.into());
                },
            }
            err
        })
    }
}

impl<T> EventBusErrorExt<T> for std::result::Result<T, tokio::runtime::TryCurrentError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|source| EventBusError::RuntimeUnavailable {
            source,
            context: Some(context.into()),
        })
    }
}

impl From<tokio::runtime::TryCurrentError> for EventBusError {
    #[inline]
    fn from(source: tokio::runtime::TryCurrentError) -> Self {
        Self::RuntimeUnavailable { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
