//! Concurrency combinators built on `fork` and `race_pair`.
//!
//! `race_pair` is the only primitive: it forks both sides and resolves with
//! the outcome of whichever finishes first, together with a live handle to
//! the other. Everything else decides what to do with the loser.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::control::Either;

use super::super::fiber::{Fiber, Listener, RawFiber, await_completion};
use super::super::kernel::Semaphore;
use super::super::{Outcome, RuntimeError};
use super::algebra::{Node, NodeBox, Value, downcast};
use super::{IO, Poll};

/// The result of [`IO::race_pair`]: the winner's outcome and the loser's
/// still-running fiber.
pub type RacePairResult<A, B> = Either<(Outcome<A>, Fiber<B>), (Fiber<A>, Outcome<B>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Resolves with the side whose fiber completes first.
fn first_completed(left: RawFiber, right: RawFiber) -> IO<Side> {
    IO::async_(move |callback| {
        IO::delay(move || {
            let decided = Arc::new(AtomicBool::new(false));
            let listener = |side: Side| -> Listener {
                let decided = Arc::clone(&decided);
                let callback = callback.clone();
                Box::new(move |_: &RawFiber| {
                    if !decided.swap(true, Ordering::SeqCst) {
                        callback.succeed(side);
                    }
                })
            };
            let left_id = left.on_complete(listener(Side::Left));
            let right_id = right.on_complete(listener(Side::Right));
            Some(IO::delay(move || {
                if let Some(id) = left_id {
                    left.remove_listener(id);
                }
                if let Some(id) = right_id {
                    right.remove_listener(id);
                }
            }))
        })
    })
}

/// Requests cancellation of both fibers, then waits for both.
fn cancel_both(left: RawFiber, right: RawFiber) -> IO<()> {
    let (left_wait, right_wait) = (Arc::clone(&left), Arc::clone(&right));
    IO::delay(move || {
        left.request_cancel();
        right.request_cancel();
    })
    .then(await_completion(left_wait))
    .then(await_completion(right_wait))
}

fn taken_outcome(fiber: &RawFiber) -> Outcome<Value> {
    fiber
        .take_outcome()
        .unwrap_or_else(|| Outcome::Errored(RuntimeError::OutcomeConsumed.into()))
}

impl<A: Send + 'static> IO<A> {
    /// Runs `left` and `right` concurrently and resolves when the first one
    /// finishes, with its outcome and the other's fiber.
    ///
    /// Canceling the race cancels both fibers and waits for them. The loser
    /// is left running; the caller decides whether to join or cancel it.
    pub fn race_pair<B: Send + 'static>(left: Self, right: IO<B>) -> IO<RacePairResult<A, B>> {
        IO::uncancelable(move |poll| {
            IO::<(RawFiber, RawFiber)>::from_node(Node::RacePair(
                NodeBox::new(left.into_node()),
                NodeBox::new(right.into_node()),
            ))
            .flat_map(move |(left, right)| {
                let on_cancel = cancel_both(Arc::clone(&left), Arc::clone(&right));
                poll.apply(first_completed(Arc::clone(&left), Arc::clone(&right)))
                    .on_cancel(on_cancel)
                    .fmap(move |side| match side {
                        Side::Left => Either::Left((
                            taken_outcome(&left).map(downcast::<A>),
                            Fiber::from_raw(right),
                        )),
                        Side::Right => Either::Right((
                            Fiber::from_raw(left),
                            taken_outcome(&right).map(downcast::<B>),
                        )),
                    })
            })
        })
    }

    /// Races two computations, canceling the loser.
    ///
    /// An error from the winner is re-raised. If the winner was canceled the
    /// race waits for the other side instead.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::control::Either;
    /// use strand::effect::{IO, Outcome, TestContext};
    ///
    /// let io = IO::race(IO::<i32>::never(), IO::pure("done"));
    /// assert_eq!(TestContext::new().run(io), Some(Outcome::Succeeded(Either::Right("done"))));
    /// ```
    pub fn race<B: Send + 'static>(left: Self, right: IO<B>) -> IO<Either<A, B>> {
        IO::uncancelable(move |poll| {
            poll.apply(IO::race_pair(left, right))
                .flat_map(move |result| match result {
                    Either::Left((outcome, loser)) => {
                        finish_race(poll, outcome, loser, Either::Left, Either::Right)
                    }
                    Either::Right((loser, outcome)) => {
                        finish_race(poll, outcome, loser, Either::Right, Either::Left)
                    }
                })
        })
    }

    /// Races two computations, canceling the loser, and returns the
    /// winner's outcome without interpreting it.
    pub fn race_outcome<B: Send + 'static>(
        left: Self,
        right: IO<B>,
    ) -> IO<Either<Outcome<A>, Outcome<B>>> {
        IO::uncancelable(move |poll| {
            poll.apply(IO::race_pair(left, right))
                .flat_map(|result| match result {
                    Either::Left((outcome, loser)) => {
                        loser.cancel().fmap(move |()| Either::Left(outcome))
                    }
                    Either::Right((loser, outcome)) => {
                        loser.cancel().fmap(move |()| Either::Right(outcome))
                    }
                })
        })
    }

    /// Runs both concurrently and returns both results.
    ///
    /// If either side fails or is canceled, the other is canceled before
    /// the failure propagates.
    pub fn both<B: Send + 'static>(left: Self, right: IO<B>) -> IO<(A, B)> {
        IO::uncancelable(move |poll| {
            poll.apply(IO::race_pair(left, right))
                .flat_map(move |result| match result {
                    Either::Left((outcome, other)) => finish_both(poll, outcome, other),
                    Either::Right((other, outcome)) => {
                        finish_both(poll, outcome, other).fmap(|(b, a)| (a, b))
                    }
                })
        })
    }

    /// Runs both concurrently and returns both outcomes, whatever they are.
    pub fn both_outcome<B: Send + 'static>(
        left: Self,
        right: IO<B>,
    ) -> IO<(Outcome<A>, Outcome<B>)> {
        IO::uncancelable(move |poll| {
            poll.apply(IO::race_pair(left, right))
                .flat_map(move |result| match result {
                    Either::Left((outcome, other)) => {
                        let cancel = other.cancel();
                        poll.apply(other.join())
                            .on_cancel(cancel)
                            .fmap(move |other| (outcome, other))
                    }
                    Either::Right((other, outcome)) => {
                        let cancel = other.cancel();
                        poll.apply(other.join())
                            .on_cancel(cancel)
                            .fmap(move |other| (other, outcome))
                    }
                })
        })
    }

    /// Falls back to `fallback` if `self` does not finish within `duration`.
    /// `self` is canceled in that case.
    pub fn timeout_to(self, duration: Duration, fallback: Self) -> Self {
        IO::race(self, IO::sleep(duration)).flat_map(move |winner| match winner {
            Either::Left(value) => IO::pure(value),
            Either::Right(()) => fallback,
        })
    }

    /// Fails with [`RuntimeError::Timeout`] if `self` does not finish within
    /// `duration`. `self` is canceled in that case.
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_to(
            duration,
            IO::raise_error(RuntimeError::Timeout(duration)),
        )
    }
}

/// Settles a race once one side has finished.
fn finish_race<W, L, R, FW, FL>(
    poll: Poll,
    outcome: Outcome<W>,
    loser: Fiber<L>,
    wrap_winner: FW,
    wrap_loser: FL,
) -> IO<R>
where
    W: Send + 'static,
    L: Send + 'static,
    R: Send + 'static,
    FW: FnOnce(W) -> R + Send + 'static,
    FL: FnOnce(L) -> R + Send + 'static,
{
    match outcome {
        Outcome::Succeeded(value) => loser.cancel().fmap(move |()| wrap_winner(value)),
        Outcome::Errored(error) => loser.cancel().then(IO::raise_error(error)),
        Outcome::Canceled => {
            let cancel = loser.cancel();
            poll.apply(loser.join())
                .on_cancel(cancel)
                .flat_map(move |outcome| match outcome {
                    Outcome::Succeeded(value) => IO::pure(wrap_loser(value)),
                    Outcome::Errored(error) => IO::raise_error(error),
                    Outcome::Canceled => poll.apply(IO::canceled()).then(IO::never()),
                })
        }
    }
}

/// Settles `both` once one side has finished; returns `(first, other)`.
fn finish_both<F, O>(poll: Poll, outcome: Outcome<F>, other: Fiber<O>) -> IO<(F, O)>
where
    F: Send + 'static,
    O: Send + 'static,
{
    match outcome {
        Outcome::Succeeded(first) => {
            let cancel = other.cancel();
            poll.apply(other.join())
                .on_cancel(cancel)
                .flat_map(move |outcome| match outcome {
                    Outcome::Succeeded(second) => IO::pure((first, second)),
                    Outcome::Errored(error) => IO::raise_error(error),
                    Outcome::Canceled => poll.apply(IO::canceled()).then(IO::never()),
                })
        }
        Outcome::Errored(error) => other.cancel().then(IO::raise_error(error)),
        Outcome::Canceled => other
            .cancel()
            .then(poll.apply(IO::canceled()))
            .then(IO::never()),
    }
}

// =============================================================================
// Parallel traversals
// =============================================================================

/// Runs every computation on its own fiber and collects every outcome, in
/// input order.
///
/// Canceling the traversal cancels all fibers and waits for them.
pub fn par_sequence_outcome<A: Send + 'static>(ios: Vec<IO<A>>) -> IO<Vec<Outcome<A>>> {
    IO::uncancelable(move |poll| {
        let forks = ios.into_iter().map(IO::fork).collect();
        super::sequence(forks).flat_map(move |fibers: Vec<Fiber<A>>| {
            let cancel_all = super::sequence(fibers.iter().map(Fiber::cancel).collect()).void();
            let joins = fibers.into_iter().map(Fiber::join).collect();
            poll.apply(super::sequence(joins)).on_cancel(cancel_all)
        })
    })
}

/// Runs every computation concurrently and collects the results in input
/// order.
///
/// The first failure cancels everything still running and is re-raised.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use strand::effect::{IO, Outcome, TestContext, par_sequence};
///
/// let context = TestContext::new();
/// let ios = (1..=3_u64)
///     .map(|n| IO::sleep(Duration::from_secs(n)).then(IO::pure(n)))
///     .collect();
/// assert_eq!(context.run(par_sequence(ios)), Some(Outcome::Succeeded(vec![1, 2, 3])));
/// assert_eq!(context.now(), Duration::from_secs(3));
/// ```
pub fn par_sequence<A: Send + 'static>(ios: Vec<IO<A>>) -> IO<Vec<A>> {
    let capacity = ios.len();
    ios.into_iter()
        .fold(IO::pure(Vec::with_capacity(capacity)), |accumulated, io| {
            IO::both(accumulated, io).fmap(|(mut values, value)| {
                values.push(value);
                values
            })
        })
}

/// Maps every item to a computation and runs them all concurrently.
pub fn par_traverse<T, B, F>(items: Vec<T>, function: F) -> IO<Vec<B>>
where
    T: Send + 'static,
    B: Send + 'static,
    F: Fn(T) -> IO<B>,
{
    par_sequence(items.into_iter().map(function).collect())
}

/// Like [`par_traverse`], with at most `limit` computations running at once.
///
/// A `limit` of zero runs the computations one at a time.
pub fn par_traverse_n<T, B, F>(limit: usize, items: Vec<T>, function: F) -> IO<Vec<B>>
where
    T: Send + 'static,
    B: Send + 'static,
    F: Fn(T) -> IO<B> + Send + 'static,
{
    Semaphore::of(limit.max(1)).flat_map(move |semaphore| {
        par_traverse(items, move |item| semaphore.with_permit(function(item)))
    })
}
