#![cfg(feature = "stream")]
//! Property-based tests for the laws `IO` and its combinators obey.
//!
//! Programs are compared by the terminal outcome they produce on a fresh
//! `TestContext`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use strand::effect::{
    ExitCase, IO, IoError, Outcome, Semaphore, TestContext, par_sequence, par_sequence_outcome,
    par_traverse_n, sequence, traverse,
};
use strand::stream::Scope;

fn run<A: Send + 'static>(io: IO<A>) -> Option<Outcome<A>> {
    TestContext::new().run(io)
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Pure,
    Raise,
    Canceled,
}

fn shape() -> impl Strategy<Value = Shape> {
    prop_oneof![Just(Shape::Pure), Just(Shape::Raise), Just(Shape::Canceled)]
}

fn build(shape: Shape, value: i32) -> IO<i32> {
    match shape {
        Shape::Pure => IO::pure(value),
        Shape::Raise => IO::raise_error(format!("error {value}")),
        Shape::Canceled => IO::canceled().then(IO::pure(value)),
    }
}

// =============================================================================
// Monad Laws
// =============================================================================

proptest! {
    /// Left Identity Law: pure(a).flat_map(f) == f(a)
    #[test]
    fn prop_left_identity(value: i32) {
        let function = |n: i32| IO::pure(n.wrapping_mul(3));

        prop_assert_eq!(run(IO::pure(value).flat_map(function)), run(function(value)));
    }

    /// Right Identity Law: m.flat_map(pure) == m
    #[test]
    fn prop_right_identity(shape in shape(), value: i32) {
        prop_assert_eq!(run(build(shape, value).flat_map(IO::pure)), run(build(shape, value)));
    }

    /// Associativity Law: m.flat_map(f).flat_map(g) == m.flat_map(|x| f(x).flat_map(g))
    #[test]
    fn prop_associativity(shape in shape(), value: i32) {
        let function1 = |n: i32| IO::pure(n.wrapping_add(1));
        let function2 = |n: i32| {
            if n % 2 == 0 { IO::pure(n / 2) } else { IO::raise_error("odd") }
        };

        let left = build(shape, value).flat_map(function1).flat_map(function2);
        let right = build(shape, value).flat_map(move |x| function1(x).flat_map(function2));

        prop_assert_eq!(run(left), run(right));
    }

    /// Functor Composition Law: fmap(f . g) == fmap(g).fmap(f)
    #[test]
    fn prop_functor_composition(shape in shape(), value: i32) {
        let function1 = |x: i32| x.wrapping_add(1);
        let function2 = |x: i32| x.wrapping_mul(2);

        let left = build(shape, value).fmap(move |x| function2(function1(x)));
        let right = build(shape, value).fmap(function1).fmap(function2);

        prop_assert_eq!(run(left), run(right));
    }
}

// =============================================================================
// Error Laws
// =============================================================================

proptest! {
    /// raise(e).handle_error_with(f) == f(e)
    #[test]
    fn prop_handler_receives_error(message in "[a-z]{1,12}") {
        let handler = |error: IoError| IO::pure(error.to_string().len());

        let left = IO::raise_error(message.clone()).handle_error_with(handler);
        let right = handler(IoError::msg(message));

        prop_assert_eq!(run(left), run(right));
    }

    /// fa.attempt().flat_map(from_result) == fa
    #[test]
    fn prop_attempt_round_trips(shape in shape(), value: i32) {
        let left = build(shape, value).attempt().flat_map(IO::from_result);

        prop_assert_eq!(run(left), run(build(shape, value)));
    }

    /// A handler never changes a successful computation.
    #[test]
    fn prop_handler_ignores_success(value: i32) {
        let left = IO::pure(value).handle_error(|_| 0);

        prop_assert_eq!(run(left), Some(Outcome::Succeeded(value)));
    }
}

// =============================================================================
// Cancellation Laws
// =============================================================================

proptest! {
    /// uncancelable(p => p(fa)) == fa
    #[test]
    fn prop_poll_restores_outer_state(shape in shape(), value: i32) {
        let left = IO::uncancelable(move |poll| poll.apply(build(shape, value)));

        prop_assert_eq!(run(left), run(build(shape, value)));
    }

    /// Nested polls each lift exactly their own region:
    /// uncancelable(p => p(uncancelable(p2 => p2(fa)))) == uncancelable(_ => fa)
    /// when compared by terminal outcome.
    #[test]
    fn prop_nested_polls_match_single_mask(shape in shape(), value: i32) {
        let left = IO::uncancelable(move |poll| {
            poll.apply(IO::uncancelable(move |inner| inner.apply(build(shape, value))))
        });
        let right = IO::uncancelable(move |_| build(shape, value));

        prop_assert_eq!(run(left), run(right));
    }

    /// A finalizer registered with on_cancel does not alter the outcome.
    #[test]
    fn prop_on_cancel_preserves_outcome(shape in shape(), value: i32) {
        let left = build(shape, value).on_cancel(IO::unit());

        prop_assert_eq!(run(left), run(build(shape, value)));
    }

    /// guarantee_case sees the exit case matching the outcome.
    #[test]
    fn prop_guarantee_case_matches_outcome(shape in shape(), value: i32) {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let outcome = run(
            build(shape, value)
                .guarantee_case(move |exit_case| IO::delay(move || *slot.lock() = Some(exit_case))),
        );

        let exit_case = seen.lock().clone();
        prop_assert_eq!(exit_case, outcome.map(|outcome| outcome.exit_case()));
    }
}

// =============================================================================
// Traversal and Concurrency Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// traverse with pure is the identity on the input vector.
    #[test]
    fn prop_traverse_preserves_order(items in prop::collection::vec(any::<i64>(), 0..64)) {
        let expected = items.clone();

        prop_assert_eq!(run(traverse(items, IO::pure)), Some(Outcome::Succeeded(expected)));
    }

    /// par_sequence keeps input order whatever the completion order, and
    /// takes as long as its slowest member.
    #[test]
    fn prop_par_sequence_order_and_time(delays in prop::collection::vec(0_u64..50, 1..16)) {
        let context = TestContext::new();
        let ios: Vec<IO<usize>> = delays
            .iter()
            .enumerate()
            .map(|(index, delay)| IO::sleep(Duration::from_millis(*delay)).then(IO::pure(index)))
            .collect();

        let outcome = context.run(par_sequence(ios));

        prop_assert_eq!(outcome, Some(Outcome::Succeeded((0..delays.len()).collect::<Vec<_>>())));
        let slowest = delays.iter().copied().max().unwrap_or_default();
        prop_assert_eq!(context.now(), Duration::from_millis(slowest));
    }

    /// No more than `limit` computations ever hold a permit at once.
    #[test]
    fn prop_par_traverse_n_respects_limit(
        limit in 1_usize..5,
        delays in prop::collection::vec(1_u64..20, 1..12),
    ) {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_in, peak_in) = (Arc::clone(&active), Arc::clone(&peak));
        let expected = delays.clone();

        let io = par_traverse_n(limit, delays, move |delay| {
            let (enter, leave, peak) =
                (Arc::clone(&active_in), Arc::clone(&active_in), Arc::clone(&peak_in));
            IO::delay(move || {
                let now = enter.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
            })
            .then(IO::sleep(Duration::from_millis(delay)))
            .then(IO::delay(move || {
                leave.fetch_sub(1, Ordering::SeqCst);
                delay
            }))
        });

        prop_assert_eq!(run(io), Some(Outcome::Succeeded(expected)));
        prop_assert!(peak.load(Ordering::SeqCst) <= limit);
        prop_assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    /// Every permit taken by `with_permit` is given back.
    #[test]
    fn prop_with_permit_returns_permits(permits in 1_usize..6, shapes in prop::collection::vec(shape(), 1..10)) {
        let semaphore = Semaphore::new(permits);
        let probe = semaphore.clone();
        let guarded: Vec<IO<()>> = shapes
            .into_iter()
            .map(|shape| semaphore.with_permit(build(shape, 0)).attempt().void())
            .collect();

        let io = par_sequence_outcome(guarded).then(probe.available());

        prop_assert_eq!(run(io), Some(Outcome::Succeeded(permits)));
    }
}

// =============================================================================
// Scope Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Closing a scope releases its resources in reverse acquisition order.
    #[test]
    fn prop_scope_releases_in_reverse(count in 0_usize..24) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = Scope::new_root();
        let acquisitions: Vec<IO<()>> = (0..count)
            .map(|index| {
                let log = Arc::clone(&log);
                root.acquire_resource(
                    move |_| IO::pure(index),
                    move |index, _| IO::delay(move || log.lock().push(index)),
                )
                .void()
            })
            .collect();

        let outcome = run(sequence(acquisitions).then(root.close(ExitCase::Succeeded)));

        prop_assert_eq!(outcome, Some(Outcome::Succeeded(Ok(()))));
        prop_assert_eq!(log.lock().clone(), (0..count).rev().collect::<Vec<_>>());
    }
}
