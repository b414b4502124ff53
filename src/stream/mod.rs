//! The resource scope tree used to compile streams safely.
//!
//! A stream compiler opens a [`Scope`] for every resource region it enters.
//! Resources acquired through [`Scope::acquire_resource`] belong to the
//! innermost open scope and are released, newest first, when that scope
//! closes. Concurrently running consumers can keep resources alive past the
//! close of their scope with a [`Lease`].
//!
//! # Interruption
//!
//! A scope opened with `interruptible = true` carries an
//! [`InterruptContext`]. Once a signal registered with
//! [`Scope::interrupt_when`] fires, every evaluation in that scope and its
//! interruptible descendants stops with an [`InterruptionOutcome`].
//!
//! ```rust
//! use strand::control::Either;
//! use strand::effect::{IO, Outcome, TestContext};
//! use strand::stream::{InterruptionOutcome, Scope};
//!
//! let context = TestContext::new();
//! let root = Scope::new_root();
//! let scope = context
//!     .run(root.open(true))
//!     .and_then(|outcome| outcome.into_result())
//!     .and_then(Result::ok)
//!     .and_then(Result::ok)
//!     .unwrap();
//!
//! context.run(scope.interrupt_when(IO::pure(Ok(()))));
//! let evaluated = context.run(scope.interruptible_eval(IO::<i32>::never()));
//! assert_eq!(
//!     evaluated,
//!     Some(Outcome::Succeeded(Either::Left(InterruptionOutcome::Interrupted(scope.id()))))
//! );
//! ```

mod interrupt_context;
mod lease;
mod scope;
mod scoped_resource;

pub use interrupt_context::{InterruptContext, InterruptionOutcome};
pub use lease::Lease;
pub use scope::{Scope, ScopeId};
pub use scoped_resource::ScopedResource;
