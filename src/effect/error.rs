//! Error types for the effect runtime.
//!
//! Every failure travelling through the error channel of an [`IO`](super::IO)
//! is an [`IoError`]: a cheaply clonable handle to any
//! `std::error::Error + Send + Sync`. Failures produced by the runtime itself
//! (protocol violations, caught panics, timeouts and aggregated finalizer
//! failures) are [`RuntimeError`] values wrapped in an `IoError`, so callers
//! can recover them with [`IoError::runtime_error`].
//!
//! Cancellation is *not* an error. It is reported through
//! [`Outcome::Canceled`](super::Outcome::Canceled) and never coerced into
//! this channel.
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::{IoError, RuntimeError};
//!
//! let error = IoError::from(RuntimeError::DeferredAlreadyCompleted);
//! assert_eq!(
//!     error.runtime_error(),
//!     Some(&RuntimeError::DeferredAlreadyCompleted)
//! );
//! assert_eq!(format!("{error}"), "deferred value was already completed");
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// IoError
// =============================================================================

/// The error carried by the error channel of every `IO`.
///
/// Cloning is an `Arc` increment, so the same failure can be observed by a
/// fiber's joiner, by finalizers and by a composite failure at once.
#[derive(Clone)]
pub struct IoError {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl IoError {
    /// Wraps an arbitrary error value.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Creates an error from a plain message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::IoError;
    ///
    /// let error = IoError::msg("connection reset");
    /// assert_eq!(error.to_string(), "connection reset");
    /// ```
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// Returns the wrapped error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        let inner: &(dyn std::error::Error + 'static) = &*self.inner;
        inner.downcast_ref::<E>()
    }

    /// Returns the runtime error this value wraps, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        self.downcast_ref::<RuntimeError>()
    }

    /// Returns `true` if both handles point at the same underlying failure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|text| (*text).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::from(RuntimeError::Panicked(message))
    }
}

impl fmt::Debug for IoError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("IoError").field(&self.inner).finish()
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, formatter)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Two errors are equal when they render identically.
///
/// This keeps `Outcome<A>: PartialEq` usable in assertions without requiring
/// every wrapped error type to implement `PartialEq`.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.to_string() == other.to_string()
    }
}

impl From<RuntimeError> for IoError {
    fn from(error: RuntimeError) -> Self {
        Self::new(error)
    }
}

impl From<CompositeFailure> for IoError {
    fn from(failure: CompositeFailure) -> Self {
        Self::new(RuntimeError::Composite(failure))
    }
}

impl From<String> for IoError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for IoError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}

// =============================================================================
// RuntimeError
// =============================================================================

/// Failures raised by the runtime itself rather than by user code.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// `Deferred::complete` was called on an already completed cell.
    DeferredAlreadyCompleted,
    /// A resource finished acquiring after its owning scope had closed.
    /// The resource has already been released when this is reported.
    AcquireAfterClose,
    /// A lease was requested on a scope that is no longer open.
    ScopeClosed,
    /// A closed root scope was asked to open a child.
    ReopenClosedScope,
    /// `interrupt_when` was called on a scope opened without interruption.
    ScopeNotInterruptible,
    /// A `timeout` elapsed before the guarded computation finished.
    Timeout(Duration),
    /// A panic escaped user code evaluated by the interpreter.
    Panicked(String),
    /// The outcome of a fiber was already handed to another consumer.
    OutcomeConsumed,
    /// Several finalizers failed while a scope or lease was closed.
    Composite(CompositeFailure),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeferredAlreadyCompleted => {
                write!(formatter, "deferred value was already completed")
            }
            Self::AcquireAfterClose => {
                write!(formatter, "resource acquired after its scope was closed")
            }
            Self::ScopeClosed => write!(formatter, "scope closed at the time of the lease"),
            Self::ReopenClosedScope => write!(formatter, "cannot re-open a closed scope"),
            Self::ScopeNotInterruptible => {
                write!(formatter, "interrupt_when called on a scope that cannot be interrupted")
            }
            Self::Timeout(duration) => write!(formatter, "timeout of {duration:?} exceeded"),
            Self::Panicked(message) => write!(formatter, "computation panicked: {message}"),
            Self::OutcomeConsumed => {
                write!(formatter, "fiber outcome was already consumed by another joiner")
            }
            Self::Composite(failure) => write!(formatter, "{failure}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

// =============================================================================
// CompositeFailure
// =============================================================================

/// Two or more failures collected while running independent finalizers.
///
/// A scope close keeps running finalizers after the first one fails; every
/// failure is kept here in the order it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFailure {
    head: IoError,
    tail: Vec<IoError>,
}

impl CompositeFailure {
    /// Folds a list of failures into a single error.
    ///
    /// Returns `None` for an empty list and the error itself for a list of
    /// one; only two or more failures produce a composite.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::{CompositeFailure, IoError};
    ///
    /// assert!(CompositeFailure::from_errors(Vec::new()).is_none());
    ///
    /// let single = CompositeFailure::from_errors(vec![IoError::msg("a")]).unwrap();
    /// assert_eq!(single.to_string(), "a");
    ///
    /// let both = CompositeFailure::from_errors(vec![IoError::msg("a"), IoError::msg("b")]).unwrap();
    /// assert_eq!(both.to_string(), "multiple failures (2): a; b");
    /// ```
    pub fn from_errors(errors: Vec<IoError>) -> Option<IoError> {
        let mut iterator = errors.into_iter();
        let head = iterator.next()?;
        let tail: Vec<IoError> = iterator.collect();
        if tail.is_empty() {
            Some(head)
        } else {
            Some(IoError::from(Self { head, tail }))
        }
    }

    /// The first failure observed.
    pub const fn head(&self) -> &IoError {
        &self.head
    }

    /// All failures, in observation order.
    pub fn errors(&self) -> impl Iterator<Item = &IoError> {
        std::iter::once(&self.head).chain(self.tail.iter())
    }

    /// Number of failures collected.
    pub fn len(&self) -> usize {
        self.tail.len() + 1
    }

    /// Always `false`: a composite holds at least two failures.
    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for CompositeFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "multiple failures ({}): ", self.len())?;
        for (index, error) in self.errors().enumerate() {
            if index > 0 {
                formatter.write_str("; ")?;
            }
            write!(formatter, "{error}")?;
        }
        Ok(())
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Rejected [`RuntimeConfig`](super::RuntimeConfig) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The auto-yield threshold must allow at least one step per turn.
    ZeroAutoYieldThreshold,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAutoYieldThreshold => {
                write!(formatter, "auto-yield threshold must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_display() {
        assert_eq!(
            RuntimeError::AcquireAfterClose.to_string(),
            "resource acquired after its scope was closed"
        );
        assert_eq!(
            RuntimeError::Timeout(Duration::from_millis(5)).to_string(),
            "timeout of 5ms exceeded"
        );
    }

    #[test]
    fn test_io_error_downcast_to_runtime_error() {
        let error = IoError::from(RuntimeError::ScopeClosed);
        assert_eq!(error.runtime_error(), Some(&RuntimeError::ScopeClosed));
        assert!(IoError::msg("plain").runtime_error().is_none());
    }

    #[test]
    fn test_io_error_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let error = IoError::from_panic(payload.as_ref());
        assert_eq!(
            error.runtime_error(),
            Some(&RuntimeError::Panicked("boom".to_string()))
        );
    }

    #[test]
    fn test_composite_failure_keeps_every_error() {
        let error = CompositeFailure::from_errors(vec![
            IoError::msg("first"),
            IoError::msg("second"),
            IoError::msg("third"),
        ])
        .expect("three errors");

        let Some(RuntimeError::Composite(failure)) = error.runtime_error() else {
            panic!("expected a composite failure");
        };
        let rendered: Vec<String> = failure.errors().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["first", "second", "third"]);
        assert_eq!(failure.head().to_string(), "first");
    }

    #[test]
    fn test_config_error_display() {
        assert_eq!(
            ConfigError::ZeroAutoYieldThreshold.to_string(),
            "auto-yield threshold must be greater than 0"
        );
    }
}
