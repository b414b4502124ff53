//! The pluggable scheduling substrate fibers run on.
//!
//! The interpreter never spawns threads or reads clocks on its own. Every
//! task submission, timer and clock read goes through an
//! [`ExecutionContext`], which is threaded explicitly through a [`Runtime`]
//! value. Several runtimes can coexist in one process, and tests swap in the
//! deterministic [`TestContext`](super::TestContext).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{ConfigError, IoError, RuntimeConfig};

/// A unit of work submitted to an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to an execution context.
pub type ContextRef = Arc<dyn ExecutionContext>;

/// The host environment a runtime schedules fibers on.
///
/// Implementations must be safe to call from any thread and from inside a
/// running task.
pub trait ExecutionContext: Send + Sync + 'static {
    /// Queues `task` for execution. Must not run it synchronously.
    fn execute(&self, task: Task);

    /// Runs `task` once `delay` has elapsed on this context's clock.
    fn schedule_after(&self, delay: Duration, task: Task) -> TimerHandle;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn current_time_millis(&self) -> u64;

    /// A monotonically non-decreasing clock reading.
    fn monotonic(&self) -> Duration;

    /// Receives failures that have nowhere else to go, such as finalizer
    /// errors swallowed while a fiber was being canceled.
    fn report_failure(&self, error: &IoError) {
        tracing::warn!(%error, "unhandled failure reported by the runtime");
    }
}

// =============================================================================
// TimerHandle
// =============================================================================

/// Cancels a pending [`ExecutionContext::schedule_after`] task.
///
/// Dropping the handle leaves the timer armed.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    /// Creates a handle that runs `cancel` when the timer is cleared.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle whose cancellation does nothing.
    pub const fn noop() -> Self {
        Self { cancel: None }
    }

    /// Disarms the timer. Has no effect if it already fired.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TimerHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// An execution context paired with the configuration its fibers use.
///
/// Cloning shares the context.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{IO, Outcome, Runtime, RuntimeConfig, TestContext};
///
/// let context = TestContext::new();
/// let runtime = Runtime::new(context.context_ref(), RuntimeConfig::default()).unwrap();
/// assert_eq!(runtime.config().auto_yield_threshold, 1024);
///
/// assert_eq!(context.run(IO::pure(5)), Some(Outcome::Succeeded(5)));
/// ```
#[derive(Clone)]
pub struct Runtime {
    context: ContextRef,
    config: Arc<RuntimeConfig>,
}

impl Runtime {
    /// Creates a runtime after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` is rejected by
    /// [`RuntimeConfig::validate`].
    pub fn new(context: ContextRef, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            context,
            config: Arc::new(config),
        })
    }

    /// Creates a runtime with the default configuration.
    pub fn with_context(context: ContextRef) -> Self {
        Self {
            context,
            config: Arc::new(RuntimeConfig::default()),
        }
    }

    /// The execution context fibers are scheduled on.
    pub fn context(&self) -> &ContextRef {
        &self.context
    }

    /// The configuration shared by this runtime's fibers.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_timer_handle_runs_cancel_once() {
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&canceled);
        TimerHandle::new(move || flag.store(true, Ordering::SeqCst)).cancel();
        assert!(canceled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_noop_timer_handle() {
        let handle = TimerHandle::noop();
        assert_eq!(format!("{handle:?}"), "TimerHandle { armed: false }");
        handle.cancel();
    }
}
