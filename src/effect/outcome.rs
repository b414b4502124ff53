//! Terminal results of fibers and exit cases of guarded regions.
//!
//! [`Outcome`] is what a fiber records exactly once when it stops running.
//! [`ExitCase`] is the value-less shape of an outcome, handed to finalizers
//! (`guarantee_case`, `bracket_case`, scope release actions) which only need
//! to know *how* a region ended.

use std::fmt;

use super::{IO, IoError};

// =============================================================================
// Outcome
// =============================================================================

/// The terminal result of a fiber.
///
/// Cancellation is a distinct terminal state, not an error.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{IoError, Outcome};
///
/// let succeeded: Outcome<i32> = Outcome::Succeeded(1);
/// assert!(succeeded.is_succeeded());
/// assert_eq!(succeeded.map(|value| value + 1), Outcome::Succeeded(2));
///
/// let canceled: Outcome<i32> = Outcome::Canceled;
/// assert_eq!(canceled.into_result(), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<A> {
    /// The computation produced a value.
    Succeeded(A),
    /// The computation failed with an error nothing handled.
    Errored(IoError),
    /// The computation observed a cancellation request while unmasked.
    Canceled,
}

impl<A> Outcome<A> {
    /// Returns `true` for [`Outcome::Succeeded`].
    pub const fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns `true` for [`Outcome::Errored`].
    pub const fn is_errored(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    /// Returns `true` for [`Outcome::Canceled`].
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Transforms the success value.
    pub fn map<B, F>(self, function: F) -> Outcome<B>
    where
        F: FnOnce(A) -> B,
    {
        match self {
            Self::Succeeded(value) => Outcome::Succeeded(function(value)),
            Self::Errored(error) => Outcome::Errored(error),
            Self::Canceled => Outcome::Canceled,
        }
    }

    /// Eliminates the outcome by handling each case.
    pub fn fold<B>(
        self,
        on_canceled: impl FnOnce() -> B,
        on_errored: impl FnOnce(IoError) -> B,
        on_succeeded: impl FnOnce(A) -> B,
    ) -> B {
        match self {
            Self::Succeeded(value) => on_succeeded(value),
            Self::Errored(error) => on_errored(error),
            Self::Canceled => on_canceled(),
        }
    }

    /// Converts into a `Result`, or `None` if the fiber was canceled.
    pub fn into_result(self) -> Option<Result<A, IoError>> {
        match self {
            Self::Succeeded(value) => Some(Ok(value)),
            Self::Errored(error) => Some(Err(error)),
            Self::Canceled => None,
        }
    }

    /// Returns the exit case this outcome corresponds to.
    pub fn exit_case(&self) -> ExitCase {
        match self {
            Self::Succeeded(_) => ExitCase::Succeeded,
            Self::Errored(error) => ExitCase::Errored(error.clone()),
            Self::Canceled => ExitCase::Canceled,
        }
    }
}

impl<A: Send + 'static> Outcome<A> {
    /// Lifts the outcome back into an `IO`.
    ///
    /// A success becomes `pure`, an error is re-raised and a cancellation is
    /// replaced by `on_cancel`.
    pub fn embed(self, on_cancel: IO<A>) -> IO<A> {
        match self {
            Self::Succeeded(value) => IO::pure(value),
            Self::Errored(error) => IO::raise_error(error),
            Self::Canceled => on_cancel,
        }
    }

    /// Like [`Outcome::embed`] but a cancellation never completes.
    pub fn embed_never(self) -> IO<A> {
        self.embed(IO::never())
    }
}

impl<A> From<Result<A, IoError>> for Outcome<A> {
    fn from(result: Result<A, IoError>) -> Self {
        match result {
            Ok(value) => Self::Succeeded(value),
            Err(error) => Self::Errored(error),
        }
    }
}

impl<A: fmt::Display> fmt::Display for Outcome<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(value) => write!(formatter, "Succeeded({value})"),
            Self::Errored(error) => write!(formatter, "Errored({error})"),
            Self::Canceled => write!(formatter, "Canceled"),
        }
    }
}

// =============================================================================
// ExitCase
// =============================================================================

/// How a guarded region ended, without its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitCase {
    /// The region completed normally.
    Succeeded,
    /// The region failed.
    Errored(IoError),
    /// The region was canceled.
    Canceled,
}

impl ExitCase {
    /// Returns `true` for [`ExitCase::Canceled`].
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Rebuilds an outcome from the exit case and a success value.
    pub fn to_outcome<A>(&self, value: A) -> Outcome<A> {
        match self {
            Self::Succeeded => Outcome::Succeeded(value),
            Self::Errored(error) => Outcome::Errored(error.clone()),
            Self::Canceled => Outcome::Canceled,
        }
    }
}

impl From<Result<(), IoError>> for ExitCase {
    fn from(result: Result<(), IoError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(error) => Self::Errored(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Outcome::Succeeded(1), ExitCase::Succeeded)]
    #[case(Outcome::Errored(IoError::msg("boom")), ExitCase::Errored(IoError::msg("boom")))]
    #[case(Outcome::Canceled, ExitCase::Canceled)]
    fn test_exit_case_matches_outcome(#[case] outcome: Outcome<i32>, #[case] expected: ExitCase) {
        assert_eq!(outcome.exit_case(), expected);
    }

    #[test]
    fn test_fold_selects_branch() {
        let rendered = Outcome::<i32>::Errored(IoError::msg("e")).fold(
            || "canceled".to_string(),
            |error| format!("errored: {error}"),
            |value| format!("succeeded: {value}"),
        );
        assert_eq!(rendered, "errored: e");
    }

    #[test]
    fn test_into_result_drops_cancellation() {
        assert_eq!(Outcome::Succeeded(3).into_result(), Some(Ok(3)));
        assert_eq!(Outcome::<i32>::Canceled.into_result(), None);
    }

    #[test]
    fn test_embed_replays_outcome() {
        let context = crate::effect::TestContext::new();
        assert_eq!(
            context.run(Outcome::Succeeded(1).embed_never()),
            Some(Outcome::Succeeded(1))
        );
        assert_eq!(context.run(Outcome::Canceled.embed(IO::pure(2))), Some(Outcome::Succeeded(2)));
        assert_eq!(context.run(Outcome::<i32>::Canceled.embed_never()), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Outcome::Succeeded(7).to_string(), "Succeeded(7)");
        assert_eq!(Outcome::<i32>::Canceled.to_string(), "Canceled");
    }
}
