//! Tokio integration.
//!
//! - [`TokioContext`]: an [`ExecutionContext`] that runs fiber tasks and
//!   timers on a tokio runtime
//! - [`IO::from_future`] / [`IO::try_from_future`]: suspend a fiber on a
//!   Rust future
//! - [`IO::unsafe_to_future`]: run an `IO` and await its [`Outcome`] from
//!   async code
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::{IO, Outcome, TokioContext};
//!
//! #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! async fn main() {
//!     let runtime = TokioContext::current().runtime();
//!     let io = IO::from_future(|| async { 20 }).fmap(|n| n + 1);
//!     assert_eq!(io.unsafe_to_future(&runtime).await, Outcome::Succeeded(21));
//! }
//! ```

pub mod runtime;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll as TaskPoll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::task::{ArcWake, waker_ref};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::runtime::Handle;
use tokio::time::Instant;

use super::io::Callback;
use super::{
    CancelToken, ConfigError, ContextRef, ExecutionContext, IO, IoError, Outcome, Runtime,
    RuntimeConfig, Task, TimerHandle,
};

// =============================================================================
// TokioContext
// =============================================================================

/// Schedules fiber tasks on a tokio runtime.
///
/// Each task becomes a tokio task, and each timer a task that sleeps and
/// then runs. Canceling a timer aborts its task.
#[derive(Clone)]
pub struct TokioContext {
    handle: Handle,
    epoch: Instant,
}

impl TokioContext {
    /// Creates a context spawning onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            epoch: Instant::now(),
        }
    }

    /// A context on the current tokio runtime, or on the global runtime
    /// when called outside of tokio.
    pub fn current() -> Self {
        Self::new(runtime::handle())
    }

    /// A context on the global runtime.
    pub fn global() -> Self {
        Self::new(runtime::global().handle().clone())
    }

    /// The tokio handle tasks are spawned onto.
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Wraps this context in a [`Runtime`] with the default configuration.
    pub fn runtime(self) -> Runtime {
        Runtime::with_context(Arc::new(self))
    }

    /// Wraps this context in a [`Runtime`] with `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` is invalid.
    pub fn runtime_with(self, config: RuntimeConfig) -> Result<Runtime, ConfigError> {
        Runtime::new(Arc::new(self), config)
    }
}

impl ExecutionContext for TokioContext {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn(async move { task() }));
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TimerHandle::new(move || timer.abort())
    }

    fn current_time_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }

    fn monotonic(&self) -> Duration {
        self.epoch.elapsed()
    }
}

impl fmt::Debug for TokioContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokioContext")
            .field("flavor", &self.handle.runtime_flavor())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Futures as IO
// =============================================================================

/// Polls a future on an execution context, resuming a fiber on completion.
struct FutureDriver<A> {
    future: Mutex<Option<BoxFuture<'static, Result<A, IoError>>>>,
    callback: Callback<A>,
    context: ContextRef,
    scheduled: AtomicBool,
}

impl<A: Send + 'static> FutureDriver<A> {
    fn poll(self: &Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };
        let waker = waker_ref(self);
        let mut context = Context::from_waker(&waker);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut context)));
        let result = match polled {
            Ok(TaskPoll::Pending) => return,
            Ok(TaskPoll::Ready(result)) => result,
            Err(payload) => Err(IoError::from_panic(payload.as_ref())),
        };
        *slot = None;
        drop(slot);
        self.callback.complete(result);
    }

    fn cancel(&self) {
        self.future.lock().take();
    }
}

impl<A: Send + 'static> ArcWake for FutureDriver<A> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if !arc_self.scheduled.swap(true, Ordering::AcqRel) {
            let driver = Arc::clone(arc_self);
            arc_self
                .context
                .execute(Box::new(move || driver.poll()));
        }
    }
}

impl<A: Send + 'static> IO<A> {
    /// Suspends on a future built by `make` when the `IO` runs.
    ///
    /// The future is polled on the fiber's execution context, so it must not
    /// depend on a specific reactor unless that context provides one. If the
    /// fiber is canceled while waiting, the future is dropped.
    pub fn from_future<F, Fut>(make: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = A> + Send + 'static,
    {
        Self::try_from_future(move || {
            let future = make();
            async move { Ok::<A, IoError>(future.await) }
        })
    }

    /// Like [`IO::from_future`] for a fallible future; its error is raised
    /// in the error channel.
    pub fn try_from_future<F, Fut, E>(make: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
        E: Into<IoError>,
    {
        IO::execution_context().flat_map(move |context| {
            Self::async_(move |callback| {
                IO::delay(move || {
                    let future = make();
                    let driver = Arc::new(FutureDriver {
                        future: Mutex::new(Some(Box::pin(async move {
                            future.await.map_err(Into::into)
                        }))),
                        callback,
                        context,
                        scheduled: AtomicBool::new(false),
                    });
                    ArcWake::wake_by_ref(&driver);
                    Some(IO::delay(move || driver.cancel()))
                })
            })
        })
    }

    /// Runs `self` on a new root fiber of `runtime` and returns a future of
    /// its outcome.
    ///
    /// The fiber starts immediately, whether or not the future is polled.
    /// Dropping the future before it resolves cancels the fiber.
    pub fn unsafe_to_future(self, runtime: &Runtime) -> IoFuture<A> {
        let (sender, receiver) = oneshot::channel();
        let token = self.unsafe_run_async(runtime, move |outcome| {
            let _ = sender.send(outcome);
        });
        IoFuture {
            receiver,
            guard: CancelOnDrop { token: Some(token) },
        }
    }
}

// =============================================================================
// IoFuture
// =============================================================================

struct CancelOnDrop {
    token: Option<CancelToken>,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take()
            && !token.is_completed()
        {
            tracing::debug!(fiber = %token.fiber_id(), "future dropped, canceling fiber");
            token.cancel();
        }
    }
}

pin_project! {
    /// Future returned by [`IO::unsafe_to_future`].
    ///
    /// Resolves to the fiber's [`Outcome`]. If the runtime discards the
    /// fiber without ever completing it, resolves to `Outcome::Canceled`.
    #[must_use = "dropping an IoFuture cancels its fiber"]
    pub struct IoFuture<A> {
        #[pin]
        receiver: oneshot::Receiver<Outcome<A>>,
        guard: CancelOnDrop,
    }
}

impl<A> IoFuture<A> {
    /// Requests cancellation of the fiber without dropping the future.
    pub fn cancel(&self) {
        if let Some(token) = &self.guard.token {
            token.cancel();
        }
    }
}

impl<A> Future for IoFuture<A> {
    type Output = Outcome<A>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> TaskPoll<Self::Output> {
        let this = self.project();
        match this.receiver.poll(context) {
            TaskPoll::Ready(received) => {
                this.guard.disarm();
                TaskPoll::Ready(received.unwrap_or(Outcome::Canceled))
            }
            TaskPoll::Pending => TaskPoll::Pending,
        }
    }
}

impl<A> fmt::Debug for IoFuture<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("IoFuture")
            .field("armed", &self.guard.token.is_some())
            .finish()
    }
}
