#![cfg(feature = "effect")]
//! Integration tests for `IO` construction, composition and error handling.

use rstest::{fixture, rstest};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use strand::control::Either;
use strand::effect::{IO, IoError, Outcome, RuntimeError, TestContext, sequence, traverse};

#[fixture]
fn context() -> TestContext {
    TestContext::new()
}

// =============================================================================
// Constructors
// =============================================================================

#[rstest]
fn test_pure_and_map(context: TestContext) {
    let io = IO::pure(20).fmap(|n| n + 1).fmap(|n| n * 2);
    assert_eq!(context.run(io), Some(Outcome::Succeeded(42)));
}

#[rstest]
fn test_delay_is_lazy_and_runs_once_per_run(context: TestContext) {
    let counter = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&counter);
    let io = IO::delay(move || shared.fetch_add(1, Ordering::SeqCst) + 1);

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(context.run(io), Some(Outcome::Succeeded(1)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_defer_builds_program_when_run(context: TestContext) {
    let built = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&built);
    let io = IO::defer(move || {
        shared.fetch_add(1, Ordering::SeqCst);
        IO::pure("built")
    });

    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(context.run(io), Some(Outcome::Succeeded("built")));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case::ok(Ok(3), Outcome::Succeeded(3))]
#[case::err(Err("broken"), Outcome::Errored(IoError::msg("broken")))]
fn test_try_delay(
    context: TestContext,
    #[case] result: Result<i32, &'static str>,
    #[case] expected: Outcome<i32>,
) {
    let io = IO::try_delay(move || result);
    assert_eq!(context.run(io), Some(expected));
}

#[rstest]
fn test_from_result(context: TestContext) {
    assert_eq!(context.run(IO::from_result(Ok(5))), Some(Outcome::Succeeded(5)));
    assert_eq!(
        context.run(IO::<i32>::from_result(Err(IoError::msg("no")))),
        Some(Outcome::Errored(IoError::msg("no")))
    );
}

#[rstest]
fn test_async_callback_resumes_with_value(context: TestContext) {
    let io = IO::async_simple(|callback| callback.succeed("ready"));
    assert_eq!(context.run(io), Some(Outcome::Succeeded("ready")));
}

#[rstest]
fn test_async_callback_error(context: TestContext) {
    let io: IO<i32> = IO::async_simple(|callback| callback.fail("refused"));
    assert_eq!(context.run(io), Some(Outcome::Errored(IoError::msg("refused"))));
}

#[rstest]
fn test_async_first_completion_wins(context: TestContext) {
    let io = IO::async_simple(|callback| {
        callback.succeed(1);
        callback.succeed(2);
        callback.fail("late");
    });
    assert_eq!(context.run(io), Some(Outcome::Succeeded(1)));
}

#[rstest]
fn test_async_callback_from_timer(context: TestContext) {
    let io = IO::execution_context().flat_map(|execution| {
        IO::async_simple(move |callback| {
            drop(execution.schedule_after(
                Duration::from_secs(5),
                Box::new(move || callback.succeed("later")),
            ));
        })
    });
    assert_eq!(context.run(io), Some(Outcome::Succeeded("later")));
    assert_eq!(context.now(), Duration::from_secs(5));
}

#[rstest]
fn test_never_leaves_program_suspended(context: TestContext) {
    assert_eq!(context.run(IO::<()>::never()), None);
}

// =============================================================================
// Operators
// =============================================================================

#[rstest]
fn test_flat_map_sequences_effects(context: TestContext) {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (first, second) = (Arc::clone(&log), Arc::clone(&log));
    let io = IO::delay(move || first.lock().push("first"))
        .flat_map(move |()| IO::delay(move || second.lock().push("second")));

    context.run(io);
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

#[rstest]
fn test_tap_and_flat_tap_keep_value(context: TestContext) {
    let seen = Arc::new(AtomicUsize::new(0));
    let (tap_seen, flat_seen) = (Arc::clone(&seen), Arc::clone(&seen));
    let io = IO::pure(7_usize)
        .tap(move |n| {
            tap_seen.fetch_add(*n, Ordering::SeqCst);
        })
        .flat_tap(move |n| {
            let n = *n;
            IO::delay(move || flat_seen.fetch_add(n, Ordering::SeqCst))
        });

    assert_eq!(context.run(io), Some(Outcome::Succeeded(7)));
    assert_eq!(seen.load(Ordering::SeqCst), 14);
}

#[rstest]
fn test_error_short_circuits_until_handler(context: TestContext) {
    let skipped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&skipped);
    let io = IO::<i32>::raise_error("boom")
        .fmap(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            n + 1
        })
        .handle_error_with(|error| IO::pure(error.to_string().len() as i32));

    assert_eq!(context.run(io), Some(Outcome::Succeeded(4)));
    assert_eq!(skipped.load(Ordering::SeqCst), 0);
}

#[rstest]
fn test_handler_is_skipped_on_success(context: TestContext) {
    let io = IO::pure(1).handle_error(|_| 2).fmap(|n| n * 10);
    assert_eq!(context.run(io), Some(Outcome::Succeeded(10)));
}

#[rstest]
fn test_attempt_exposes_both_channels(context: TestContext) {
    assert_eq!(
        context.run(IO::pure(1).attempt()),
        Some(Outcome::Succeeded(Ok(1)))
    );
    assert_eq!(
        context.run(IO::<i32>::raise_error("bad").attempt()),
        Some(Outcome::Succeeded(Err(IoError::msg("bad"))))
    );
}

#[rstest]
fn test_redeem_and_redeem_with(context: TestContext) {
    let recovered = IO::<i32>::raise_error("bad").redeem(|_| -1, |n| n);
    assert_eq!(context.run(recovered), Some(Outcome::Succeeded(-1)));

    let mapped = IO::pure(2).redeem_with(|_| IO::pure(0), |n| IO::pure(n * 3));
    assert_eq!(context.run(mapped), Some(Outcome::Succeeded(6)));
}

#[rstest]
fn test_error_raised_inside_handler_propagates(context: TestContext) {
    let io = IO::<i32>::raise_error("first")
        .handle_error_with(|_| IO::raise_error("second"));
    assert_eq!(context.run(io), Some(Outcome::Errored(IoError::msg("second"))));
}

#[rstest]
fn test_void_and_flatten(context: TestContext) {
    assert_eq!(context.run(IO::pure(9).void()), Some(Outcome::Succeeded(())));
    assert_eq!(
        context.run(IO::pure(IO::pure(4)).flatten()),
        Some(Outcome::Succeeded(4))
    );
}

// =============================================================================
// Panics
// =============================================================================

#[rstest]
#[case::delay(IO::delay(|| -> i32 { panic!("in delay") }), "in delay")]
#[case::map(IO::pure(1).fmap(|_| -> i32 { panic!("in map") }), "in map")]
#[case::flat_map(IO::pure(1).flat_map(|_| -> IO<i32> { panic!("in flat_map") }), "in flat_map")]
fn test_panics_become_errors(context: TestContext, #[case] io: IO<i32>, #[case] message: &str) {
    let outcome = context.run(io);
    assert!(matches!(
        outcome,
        Some(Outcome::Errored(error))
            if error.runtime_error() == Some(&RuntimeError::Panicked(message.to_string()))
    ));
}

#[rstest]
fn test_panic_is_recoverable(context: TestContext) {
    let io = IO::delay(|| -> i32 { panic!("oops") }).handle_error(|_| 0);
    assert_eq!(context.run(io), Some(Outcome::Succeeded(0)));
}

// =============================================================================
// Stack safety
// =============================================================================

#[rstest]
fn test_left_associated_flat_map_chain(context: TestContext) {
    let io = (0..1_000_000).fold(IO::pure(0_u64), |io, _| io.flat_map(|n| IO::pure(n + 1)));
    assert_eq!(context.run(io), Some(Outcome::Succeeded(1_000_000)));
}

#[rstest]
fn test_left_associated_map_chain(context: TestContext) {
    let io = (0..1_000_000).fold(IO::pure(0_u64), |io, _| io.fmap(|n| n + 1));
    assert_eq!(context.run(io), Some(Outcome::Succeeded(1_000_000)));
}

fn count_down(n: u64) -> IO<u64> {
    IO::pure(n).flat_map(|n| if n == 0 { IO::pure(0) } else { count_down(n - 1) })
}

#[rstest]
fn test_right_associated_recursion(context: TestContext) {
    assert_eq!(context.run(count_down(1_000_000)), Some(Outcome::Succeeded(0)));
}

#[rstest]
fn test_deep_handler_chain(context: TestContext) {
    let io = (0..100_000).fold(IO::<u32>::raise_error("start"), |io, _| {
        io.handle_error_with(|_| IO::raise_error("again"))
    });
    assert_eq!(context.run(io), Some(Outcome::Errored(IoError::msg("again"))));
}

#[rstest]
fn test_tail_rec_m(context: TestContext) {
    let io = IO::tail_rec_m(0_u64, |n| {
        IO::pure(if n < 1_000_000 {
            Either::Left(n + 1)
        } else {
            Either::Right(n)
        })
    });
    assert_eq!(context.run(io), Some(Outcome::Succeeded(1_000_000)));
}

// =============================================================================
// Traversals
// =============================================================================

#[rstest]
fn test_traverse_preserves_order(context: TestContext) {
    let io = traverse(vec![1, 2, 3], |n| IO::delay(move || n * n));
    assert_eq!(context.run(io), Some(Outcome::Succeeded(vec![1, 4, 9])));
}

#[rstest]
fn test_sequence_stops_at_first_error(context: TestContext) {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let io = sequence(vec![
        IO::pure(1),
        IO::raise_error("second"),
        IO::delay(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            3
        }),
    ]);
    assert_eq!(context.run(io), Some(Outcome::Errored(IoError::msg("second"))));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Time
// =============================================================================

#[rstest]
fn test_sleep_advances_virtual_clock(context: TestContext) {
    let io = IO::monotonic().flat_map(|start| {
        IO::sleep(Duration::from_secs(90)).then(IO::monotonic().fmap(move |end| end - start))
    });
    assert_eq!(context.run(io), Some(Outcome::Succeeded(Duration::from_secs(90))));
}

#[rstest]
fn test_delay_by(context: TestContext) {
    let io = IO::pure("late").delay_by(Duration::from_millis(250));
    assert_eq!(context.run(io), Some(Outcome::Succeeded("late")));
    assert_eq!(context.now(), Duration::from_millis(250));
}

#[rstest]
fn test_real_time_reads_context_clock(context: TestContext) {
    context.advance(Duration::from_secs(2));
    assert_eq!(
        context.run(IO::real_time()),
        Some(Outcome::Succeeded(Duration::from_secs(2)))
    );
}

#[rstest]
fn test_cede_lets_other_fibers_run(context: TestContext) {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (background, foreground) = (Arc::clone(&log), Arc::clone(&log));
    let program = IO::delay(move || background.lock().push("child"))
        .fork()
        .flat_map(move |_fiber| IO::cede().then(IO::delay(move || foreground.lock().push("parent"))));

    context.run(program);
    assert_eq!(*log.lock(), vec!["child", "parent"]);
}
