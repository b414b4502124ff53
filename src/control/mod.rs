//! Control structures shared by the runtime.
//!
//! - [`Either`]: the step type of [`IO::tail_rec_m`](crate::effect::IO::tail_rec_m),
//!   the winner side of a race and the "interrupted or value" result of
//!   scope-bound evaluation.
//!
//! # Examples
//!
//! ```rust
//! use strand::control::Either;
//!
//! let step: Either<u32, &str> = Either::Left(3);
//! let next = step.fold(|remaining| remaining - 1, |_| 0);
//! assert_eq!(next, 2);
//! ```

mod either;

pub use either::Either;
