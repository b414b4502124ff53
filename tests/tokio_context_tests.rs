#![cfg(feature = "async")]
//! Tests running fibers on tokio through `TokioContext`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rstest::rstest;
use strand::control::Either;
use strand::effect::async_io::runtime;
use strand::effect::{IO, IoError, Outcome, Ref, TokioContext, par_traverse};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Virtual time (paused tokio clock)
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_race_uses_tokio_timers() {
    init_tracing();
    let runtime = TokioContext::current().runtime();
    let start = tokio::time::Instant::now();

    let io = IO::race(
        IO::sleep(Duration::from_secs(10)).then(IO::pure("slow")),
        IO::sleep(Duration::from_secs(1)).then(IO::pure("fast")),
    );

    assert_eq!(
        io.unsafe_to_future(&runtime).await,
        Outcome::Succeeded(Either::Right("fast"))
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_monotonic_follows_sleep() {
    let runtime = TokioContext::current().runtime();
    let io = IO::monotonic().flat_map(|before| {
        IO::sleep(Duration::from_secs(2)).then(IO::monotonic().fmap(move |after| after - before))
    });

    let Outcome::Succeeded(elapsed) = io.unsafe_to_future(&runtime).await else {
        panic!("measuring should succeed");
    };
    assert!(elapsed >= Duration::from_secs(2));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_from_future_awaits_tokio_sleep() {
    let runtime = TokioContext::current().runtime();
    let io = IO::from_future(|| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        5
    })
    .fmap(|n| n + 1);

    assert_eq!(io.unsafe_to_future(&runtime).await, Outcome::Succeeded(6));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_try_from_future_raises_error() {
    let runtime = TokioContext::current().runtime();
    let io = IO::<i32>::try_from_future(|| async { Err(IoError::msg("remote refused")) });

    assert_eq!(
        io.unsafe_to_future(&runtime).await,
        Outcome::Errored(IoError::msg("remote refused"))
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_timeout_cancels_future() {
    let runtime = TokioContext::current().runtime();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dropped);

    let io = IO::from_future(|| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        "too late"
    })
    .on_cancel(IO::delay(move || flag.store(true, Ordering::SeqCst)))
    .timeout_to(Duration::from_secs(1), IO::pure("fallback"));

    assert_eq!(io.unsafe_to_future(&runtime).await, Outcome::Succeeded("fallback"));
    assert!(dropped.load(Ordering::SeqCst));
}

// =============================================================================
// IoFuture cancellation
// =============================================================================

async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..100 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    flag.load(Ordering::SeqCst)
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_dropping_future_cancels_fiber() {
    let runtime = TokioContext::current().runtime();
    let finalized = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finalized);

    let future = IO::<()>::never()
        .on_cancel(IO::delay(move || flag.store(true, Ordering::SeqCst)))
        .unsafe_to_future(&runtime);
    tokio::time::sleep(Duration::from_millis(1)).await;
    drop(future);

    assert!(wait_for(&finalized).await);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_cancel_resolves_future_as_canceled() {
    let runtime = TokioContext::current().runtime();
    let future = IO::<i32>::never().unsafe_to_future(&runtime);
    tokio::time::sleep(Duration::from_millis(1)).await;

    future.cancel();

    assert_eq!(future.await, Outcome::Canceled);
}

// =============================================================================
// Multi-thread workers
// =============================================================================

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ref_updates_on_worker_threads() {
    init_tracing();
    let runtime = TokioContext::current().runtime();
    let io = Ref::of(0_usize).flat_map(|counter| {
        let workers = counter.clone();
        par_traverse((0..500).collect(), move |_: usize| {
            let counter = workers.clone();
            IO::cede().then(counter.update(|n| n + 1))
        })
        .then(counter.get())
    });

    assert_eq!(io.unsafe_to_future(&runtime).await, Outcome::Succeeded(500));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fork_join_on_worker_threads() {
    let runtime = TokioContext::current().runtime();
    let io = IO::sleep(Duration::from_millis(20))
        .then(IO::pure(7))
        .fork()
        .flat_map(|fiber| fiber.join_with_never());

    assert_eq!(io.unsafe_to_future(&runtime).await, Outcome::Succeeded(7));
}

#[rstest]
fn test_global_runtime_outside_tokio() {
    let context = TokioContext::global();
    let io = IO::from_future(|| async { 40 }).fmap(|n| n + 2);

    let outcome = runtime::global().block_on(io.unsafe_to_future(&context.runtime()));

    assert_eq!(outcome, Outcome::Succeeded(42));
}
