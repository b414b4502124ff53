//! Shared tokio runtime used by [`TokioContext`](super::TokioContext).
//!
//! A lazily initialized multi-thread runtime backs every context created
//! outside of tokio. Inside a runtime, the current handle is preferred so
//! that fibers run on the caller's workers and inherit its tracing setup.
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::async_io::runtime::{global, handle};
//!
//! let answer = global().block_on(async { 42 });
//! assert_eq!(answer, 42);
//!
//! let obtained_handle = handle();
//! drop(obtained_handle.spawn(async {}));
//! ```

use std::cell::RefCell;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};

// =============================================================================
// Global Runtime
// =============================================================================

/// Global multi-thread runtime with one worker per CPU core.
///
/// Created on first access and never dropped.
static GLOBAL_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("strand-worker")
        .enable_all()
        .build()
        .expect("Failed to create global tokio runtime")
});

/// Returns the global runtime, initializing it on first call.
#[inline]
#[must_use]
pub fn global() -> &'static Runtime {
    &GLOBAL_RUNTIME
}

// =============================================================================
// Handle Caching
// =============================================================================

thread_local! {
    /// Per-thread clone of the global runtime's handle.
    static CACHED_HANDLE: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Returns the current runtime's handle, or the global runtime's handle when
/// called outside of tokio.
#[inline]
#[must_use]
pub fn handle() -> Handle {
    if let Ok(current_handle) = Handle::try_current() {
        return current_handle;
    }

    CACHED_HANDLE.with(|cached| {
        cached
            .borrow_mut()
            .get_or_insert_with(|| global().handle().clone())
            .clone()
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
