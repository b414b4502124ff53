//! A value that is one of two alternatives.
//!
//! The runtime uses `Either` wherever a computation forks into two typed
//! branches:
//!
//! - `tail_rec_m` loops on `Left(state)` and stops on `Right(result)`
//! - `race` reports which side finished first
//! - scope evaluation yields `Left(interruption)` or `Right(value)`
//!
//! # Examples
//!
//! ```rust
//! use strand::control::Either;
//!
//! let winner: Either<i32, String> = Either::Right("fast".to_string());
//! assert!(winner.is_right());
//! assert_eq!(winner.right(), Some("fast".to_string()));
//! ```

/// A value that is either `Left(L)` or `Right(R)`.
///
/// Unlike `Result`, neither side is privileged as the failure case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Either<L, R> {
    /// The first alternative.
    Left(L),
    /// The second alternative.
    Right(R),
}

impl<L, R> Either<L, R> {
    /// Returns `true` if this is a `Left` value.
    #[inline]
    pub const fn is_left(&self) -> bool {
        matches!(self, Self::Left(_))
    }

    /// Returns `true` if this is a `Right` value.
    #[inline]
    pub const fn is_right(&self) -> bool {
        matches!(self, Self::Right(_))
    }

    /// Consumes the value, keeping only the left side.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::control::Either;
    ///
    /// let left: Either<i32, ()> = Either::Left(7);
    /// assert_eq!(left.left(), Some(7));
    /// ```
    #[inline]
    pub fn left(self) -> Option<L> {
        match self {
            Self::Left(value) => Some(value),
            Self::Right(_) => None,
        }
    }

    /// Consumes the value, keeping only the right side.
    #[inline]
    pub fn right(self) -> Option<R> {
        match self {
            Self::Left(_) => None,
            Self::Right(value) => Some(value),
        }
    }

    /// Transforms the left side, leaving a right value untouched.
    #[inline]
    pub fn map_left<T, F>(self, function: F) -> Either<T, R>
    where
        F: FnOnce(L) -> T,
    {
        match self {
            Self::Left(value) => Either::Left(function(value)),
            Self::Right(value) => Either::Right(value),
        }
    }

    /// Transforms the right side, leaving a left value untouched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::control::Either;
    ///
    /// let right: Either<(), i32> = Either::Right(20);
    /// assert_eq!(right.map_right(|x| x + 1), Either::Right(21));
    /// ```
    #[inline]
    pub fn map_right<T, F>(self, function: F) -> Either<L, T>
    where
        F: FnOnce(R) -> T,
    {
        match self {
            Self::Left(value) => Either::Left(value),
            Self::Right(value) => Either::Right(function(value)),
        }
    }

    /// Collapses both sides into a single value.
    #[inline]
    pub fn fold<T, F, G>(self, left_function: F, right_function: G) -> T
    where
        F: FnOnce(L) -> T,
        G: FnOnce(R) -> T,
    {
        match self {
            Self::Left(value) => left_function(value),
            Self::Right(value) => right_function(value),
        }
    }

    /// Exchanges the two sides.
    #[inline]
    pub fn swap(self) -> Either<R, L> {
        match self {
            Self::Left(value) => Either::Right(value),
            Self::Right(value) => Either::Left(value),
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    /// `Ok` maps to `Right`, `Err` maps to `Left`.
    #[inline]
    fn from(result: Result<R, L>) -> Self {
        match result {
            Ok(value) => Self::Right(value),
            Err(error) => Self::Left(error),
        }
    }
}
