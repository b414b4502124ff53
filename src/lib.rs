//! # strand
//!
//! A cooperative fiber runtime for cancellable, resource-safe effect
//! descriptions.
//!
//! ## Overview
//!
//! - **Effect descriptions**: [`IO`](effect::IO) values describe
//!   computations that may suspend, fail or be canceled. Nothing runs until
//!   a description is handed to a runtime.
//! - **Trampolined interpreter**: arbitrarily long `flat_map` chains and
//!   recursive loops run in constant native stack.
//! - **Fibers**: `fork`, `join`, awaited `cancel`, and `race`/`both`
//!   combinators built on a single `race_pair` primitive.
//! - **Masking**: `uncancelable` regions with `Poll` capabilities that
//!   re-enable cancellation locally.
//! - **Synchronization**: `Ref`, `Deferred`, `Semaphore`, `CountDownLatch`.
//! - **Resource scopes**: a tree of scopes releasing resources in reverse
//!   acquisition order, with leases and interruption, for stream compilers.
//!
//! ## Feature Flags
//!
//! - `control`: `Either`
//! - `effect`: the runtime, fibers and synchronization primitives
//! - `stream`: the resource scope tree
//! - `async`: tokio execution context and future interop
//! - `serde`: serialization of `RuntimeConfig`
//! - `full`: Enable all features
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use strand::prelude::*;
//!
//! let context = TestContext::new();
//!
//! let slow = IO::sleep(Duration::from_secs(10)).then(IO::pure("slow"));
//! let fast = IO::sleep(Duration::from_secs(1)).then(IO::pure("fast"));
//!
//! assert_eq!(
//!     context.run(IO::race(slow, fast)),
//!     Some(Outcome::Succeeded(Either::Right("fast")))
//! );
//! assert_eq!(context.now(), Duration::from_secs(1));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use strand::prelude::*;
/// ```
pub mod prelude {

    #[cfg(feature = "control")]
    pub use crate::control::*;

    #[cfg(feature = "effect")]
    pub use crate::effect::*;

    #[cfg(feature = "stream")]
    pub use crate::stream::*;
}

#[cfg(feature = "control")]
pub mod control;

#[cfg(feature = "effect")]
pub mod effect;

#[cfg(feature = "stream")]
pub mod stream;
