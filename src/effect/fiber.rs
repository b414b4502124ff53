//! Fibers: cooperatively scheduled, individually cancelable computations.
//!
//! A fiber is the unit the interpreter runs. It owns
//!
//! - a completion cell that records exactly one [`Outcome`]
//! - listeners notified once that outcome is recorded
//! - a cancellation latch that, once set, is never cleared
//! - the suspended run loop while it waits on an asynchronous boundary
//!
//! [`Fiber<A>`] is the typed handle returned by [`IO::fork`]. It has a single
//! owner: [`Fiber::join`] consumes it, while [`Fiber::cancel`] may be issued
//! any number of times, from any number of fibers.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use strand::effect::{IO, Outcome, TestContext};
//!
//! let context = TestContext::new();
//! let program = IO::sleep(Duration::from_millis(100))
//!     .fork()
//!     .flat_map(|fiber| fiber.cancel().flat_map(move |()| fiber.join()));
//!
//! assert_eq!(
//!     context.run(program),
//!     Some(Outcome::<Outcome<()>>::Succeeded(Outcome::Canceled))
//! );
//! assert_eq!(context.now(), Duration::ZERO);
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::io::algebra::{AsyncCell, Node, Value, downcast};
use super::io::run_loop::{RunLoop, Step};
use super::{IO, IoError, Outcome, Runtime, RuntimeError};

// =============================================================================
// FiberId
// =============================================================================

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        Self(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of this id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "fiber-{}", self.0)
    }
}

// =============================================================================
// FiberShared
// =============================================================================

pub(crate) type RawFiber = Arc<FiberShared>;

/// Called once with the fiber after its outcome has been recorded.
pub(crate) type Listener = Box<dyn FnOnce(&RawFiber) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListenerId(u64);

enum Completion {
    Running,
    /// `None` once the outcome has been handed to a consumer.
    Completed(Option<Outcome<Value>>),
}

struct Suspension {
    run_loop: Box<RunLoop>,
    cell: Arc<AsyncCell>,
    cancelable: bool,
}

struct FiberState {
    completion: Completion,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    suspended: Option<Suspension>,
}

/// The untyped state shared by a fiber's run loop, its handles and the
/// callbacks of its asynchronous boundaries.
///
/// Lock order: the fiber state is always locked before an [`AsyncCell`].
pub(crate) struct FiberShared {
    id: FiberId,
    runtime: Runtime,
    cancel_requested: AtomicBool,
    state: Mutex<FiberState>,
}

impl FiberShared {
    pub(crate) fn new(runtime: Runtime) -> RawFiber {
        Arc::new(Self {
            id: FiberId::next(),
            runtime,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(FiberState {
                completion: Completion::Running,
                listeners: Vec::new(),
                next_listener: 0,
                suspended: None,
            }),
        })
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) const fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Schedules the first step of `node` on the runtime's context.
    pub(crate) fn start(self: &Arc<Self>, node: Node) {
        tracing::trace!(fiber = %self.id, "fiber started");
        let run_loop = RunLoop::new(self.runtime.clone());
        self.schedule(run_loop, Step::Eval(node));
    }

    pub(crate) fn schedule(self: &Arc<Self>, run_loop: Box<RunLoop>, step: Step) {
        let fiber = Arc::clone(self);
        self.runtime
            .context()
            .execute(Box::new(move || run_loop.run(fiber, step)));
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Sets the latch without waking the fiber. Used by the fiber itself.
    pub(crate) fn set_cancel_latch(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Sets the latch and, if the fiber is parked at a cancelable boundary,
    /// reschedules it so the cancellation is observed.
    pub(crate) fn request_cancel(self: &Arc<Self>) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            tracing::debug!(fiber = %self.id, "cancellation requested");
        }
        let woken = {
            let mut state = self.state.lock();
            if state
                .suspended
                .as_ref()
                .is_some_and(|suspension| suspension.cancelable)
            {
                state.suspended.take()
            } else {
                None
            }
        };
        if let Some(suspension) = woken {
            tracing::trace!(fiber = %self.id, "waking suspended fiber for cancellation");
            self.schedule(suspension.run_loop, Step::Resumed(suspension.cell));
        }
    }

    /// Parks `run_loop` until `cell` is completed.
    ///
    /// Hands the loop straight back if the cell is already complete, or if
    /// the boundary is cancelable and a cancellation is pending.
    pub(crate) fn suspend(
        &self,
        run_loop: Box<RunLoop>,
        cell: Arc<AsyncCell>,
        cancelable: bool,
    ) -> Option<Box<RunLoop>> {
        let mut state = self.state.lock();
        if cell.is_ready() || (cancelable && self.is_cancel_requested()) {
            return Some(run_loop);
        }
        tracing::trace!(fiber = %self.id, cancelable, "fiber suspended");
        state.suspended = Some(Suspension {
            run_loop,
            cell,
            cancelable,
        });
        None
    }

    /// Completes `cell` and reschedules the fiber if it is parked on it.
    ///
    /// Only the first completion of a cell takes effect.
    pub(crate) fn resume(self: &Arc<Self>, cell: &Arc<AsyncCell>, result: Result<Value, IoError>) {
        let woken = {
            let mut state = self.state.lock();
            if !cell.try_complete(result) {
                drop(state);
                tracing::warn!(fiber = %self.id, "async callback invoked more than once; ignoring");
                return;
            }
            if state
                .suspended
                .as_ref()
                .is_some_and(|suspension| Arc::ptr_eq(&suspension.cell, cell))
            {
                state.suspended.take()
            } else {
                None
            }
        };
        if let Some(suspension) = woken {
            tracing::trace!(fiber = %self.id, "fiber resumed");
            self.schedule(suspension.run_loop, Step::Resumed(suspension.cell));
        }
    }

    /// Records the outcome and notifies listeners. Later calls are ignored.
    pub(crate) fn complete(self: &Arc<Self>, outcome: Outcome<Value>) {
        let listeners = {
            let mut state = self.state.lock();
            if matches!(state.completion, Completion::Completed(_)) {
                drop(state);
                tracing::warn!(fiber = %self.id, "fiber completed twice; ignoring");
                return;
            }
            tracing::debug!(
                fiber = %self.id,
                succeeded = outcome.is_succeeded(),
                errored = outcome.is_errored(),
                canceled = outcome.is_canceled(),
                "fiber completed"
            );
            state.completion = Completion::Completed(Some(outcome));
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener(self);
        }
    }

    /// Registers `listener`, or runs it right away if the fiber is done.
    ///
    /// Returns the id to deregister with, if the listener was stored.
    pub(crate) fn on_complete(self: &Arc<Self>, listener: Listener) -> Option<ListenerId> {
        let mut state = self.state.lock();
        if matches!(state.completion, Completion::Completed(_)) {
            drop(state);
            listener(self);
            return None;
        }
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, listener));
        Some(id)
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) {
        self.state
            .lock()
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }

    pub(crate) fn is_completed(&self) -> bool {
        matches!(self.state.lock().completion, Completion::Completed(_))
    }

    /// Hands the outcome to its one consumer.
    ///
    /// `None` while running; an `OutcomeConsumed` error on a second take.
    pub(crate) fn take_outcome(&self) -> Option<Outcome<Value>> {
        match &mut self.state.lock().completion {
            Completion::Running => None,
            Completion::Completed(outcome) => Some(
                outcome
                    .take()
                    .unwrap_or_else(|| Outcome::Errored(RuntimeError::OutcomeConsumed.into())),
            ),
        }
    }
}

/// Waits for `fiber` to finish and takes its outcome.
pub(crate) fn await_outcome(fiber: RawFiber) -> IO<Outcome<Value>> {
    IO::async_(move |callback| {
        IO::delay(move || {
            let listener: Listener = Box::new(move |completed: &RawFiber| {
                let outcome = completed
                    .take_outcome()
                    .unwrap_or_else(|| Outcome::Errored(RuntimeError::OutcomeConsumed.into()));
                callback.succeed(outcome);
            });
            fiber.on_complete(listener).map(|id| {
                IO::delay(move || fiber.remove_listener(id))
            })
        })
    })
}

/// Waits for `fiber` to finish without touching its outcome.
pub(crate) fn await_completion(fiber: RawFiber) -> IO<()> {
    IO::async_(move |callback| {
        IO::delay(move || {
            let listener: Listener = Box::new(move |_: &RawFiber| callback.succeed(()));
            fiber
                .on_complete(listener)
                .map(|id| IO::delay(move || fiber.remove_listener(id)))
        })
    })
}

/// Requests cancellation of `fiber` and waits until it has finished.
pub(crate) fn cancel_raw(fiber: RawFiber) -> IO<()> {
    IO::uncancelable(move |_| {
        let target = Arc::clone(&fiber);
        IO::delay(move || target.request_cancel()).then(await_completion(fiber))
    })
}

// =============================================================================
// Fiber
// =============================================================================

/// Handle to a forked computation producing `A`.
pub struct Fiber<A> {
    raw: RawFiber,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Send + 'static> Fiber<A> {
    pub(crate) const fn from_raw(raw: RawFiber) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Identity of the underlying fiber.
    pub fn id(&self) -> FiberId {
        self.raw.id()
    }

    /// Waits for the fiber to finish and returns its outcome.
    ///
    /// Canceling the joiner does not cancel the joined fiber.
    pub fn join(self) -> IO<Outcome<A>> {
        await_outcome(self.raw).fmap(|outcome| outcome.map(downcast::<A>))
    }

    /// Requests cancellation and waits until the fiber has actually finished.
    ///
    /// Resolves once the fiber has run its finalizers and recorded an
    /// outcome, which is `Canceled` unless it completed first or is still
    /// masked when it finishes. The returned `IO` itself is uncancelable.
    pub fn cancel(&self) -> IO<()> {
        cancel_raw(Arc::clone(&self.raw))
    }

    /// Joins, re-raising an error and replacing a cancellation with
    /// `on_cancel`.
    pub fn join_with(self, on_cancel: IO<A>) -> IO<A> {
        self.join().flat_map(move |outcome| outcome.embed(on_cancel))
    }

    /// Joins, re-raising an error; never completes if the fiber was canceled.
    pub fn join_with_never(self) -> IO<A> {
        self.join_with(IO::never())
    }
}

impl<A> fmt::Debug for Fiber<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fiber")
            .field("id", &self.raw.id)
            .field("completed", &self.raw.is_completed())
            .finish()
    }
}

// =============================================================================
// CancelToken
// =============================================================================

/// Returned by [`IO::unsafe_run_async`]; requests cancellation of the
/// root fiber from outside the runtime.
#[derive(Clone)]
pub struct CancelToken {
    fiber: RawFiber,
}

impl CancelToken {
    pub(crate) const fn new(fiber: RawFiber) -> Self {
        Self { fiber }
    }

    /// Requests cancellation. The completion callback still fires, with
    /// `Outcome::Canceled` unless the fiber finished first.
    pub fn cancel(&self) {
        self.fiber.request_cancel();
    }

    /// Identity of the root fiber.
    pub fn fiber_id(&self) -> FiberId {
        self.fiber.id()
    }

    /// Returns `true` once the root fiber has recorded its outcome.
    pub fn is_completed(&self) -> bool {
        self.fiber.is_completed()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CancelToken")
            .field("fiber", &self.fiber.id)
            .finish()
    }
}
