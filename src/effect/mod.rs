//! The effect runtime: computation descriptions, their interpreter, fibers
//! and the primitives fibers coordinate through.
//!
//! # Overview
//!
//! - [`IO`]: an immutable description of a computation that may suspend,
//!   fail or be canceled
//! - [`Fiber`]: a cooperatively scheduled run of an `IO`, with `join` and
//!   an awaited `cancel`
//! - [`Outcome`]: the terminal result of a fiber (`Succeeded`, `Errored`,
//!   `Canceled`)
//! - [`Ref`], [`Deferred`], [`Semaphore`], [`CountDownLatch`]: coordination
//!   primitives that are themselves `IO` values
//! - [`ExecutionContext`] and [`Runtime`]: the pluggable substrate fibers are
//!   scheduled on, with [`TestContext`] as a deterministic implementation
//!
//! # Cancellation
//!
//! Cancellation is cooperative. `fiber.cancel()` sets the target's latch and
//! waits until the target has finished. The target observes the request at
//! its next step outside any `uncancelable` region, runs its `on_cancel`
//! finalizers innermost first, and completes with `Outcome::Canceled`.
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use strand::effect::{IO, Outcome, TestContext};
//!
//! let context = TestContext::new();
//! let finalized = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&finalized);
//!
//! let program = IO::<()>::never()
//!     .on_cancel(IO::delay(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }))
//!     .fork()
//!     .flat_map(|fiber| {
//!         IO::cede()
//!             .then(IO::both(fiber.cancel(), fiber.cancel()))
//!             .then(fiber.join())
//!     });
//!
//! assert_eq!(context.run(program), Some(Outcome::Succeeded(Outcome::Canceled)));
//! assert_eq!(finalized.load(Ordering::SeqCst), 1);
//! ```

// =============================================================================
// Errors, outcomes and configuration
// =============================================================================

mod config;
mod error;
mod outcome;

pub use config::{
    DEFAULT_AUTO_YIELD_THRESHOLD, DEFAULT_MAX_FINALIZER_ERRORS_LOGGED, RuntimeConfig,
};
pub use error::{CompositeFailure, ConfigError, IoError, RuntimeError};
pub use outcome::{ExitCase, Outcome};

// =============================================================================
// Execution contexts
// =============================================================================

mod context;
mod test_context;

pub use context::{ContextRef, ExecutionContext, Runtime, Task, TimerHandle};
pub use test_context::TestContext;

// =============================================================================
// IO and fibers
// =============================================================================

mod fiber;
pub(crate) mod io;

pub use fiber::{CancelToken, Fiber, FiberId};
pub use io::{
    Callback, IO, Poll, RacePairResult, par_sequence, par_sequence_outcome, par_traverse,
    par_traverse_n, sequence, traverse,
};

// =============================================================================
// Synchronization primitives
// =============================================================================

mod kernel;

pub use kernel::{CountDownLatch, Deferred, Ref, Semaphore};

// =============================================================================
// Tokio integration (requires async feature)
// =============================================================================

#[cfg(feature = "async")]
pub mod async_io;

#[cfg(feature = "async")]
pub use async_io::{IoFuture, TokioContext};
