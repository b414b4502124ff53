//! The `IO` type: a description of a cancellable, possibly asynchronous,
//! possibly failing computation.
//!
//! Building an `IO` never performs a side effect. Effects happen only when
//! the description is handed to a runtime through
//! [`IO::unsafe_run_async`] (or a helper built on it, such as
//! [`TestContext::run`](super::TestContext::run)).
//!
//! # Examples
//!
//! ```rust
//! use strand::effect::{IO, IoError, Outcome, TestContext};
//!
//! let context = TestContext::new();
//!
//! let program = IO::pure(20)
//!     .fmap(|n| n + 1)
//!     .flat_map(|n| IO::delay(move || n * 2));
//! assert_eq!(context.run(program), Some(Outcome::Succeeded(42)));
//!
//! let recovered = IO::<i32>::raise_error(IoError::msg("boom"))
//!     .handle_error(|_| -1);
//! assert_eq!(context.run(recovered), Some(Outcome::Succeeded(-1)));
//! ```
//!
//! # Stack safety
//!
//! Chains of any length are interpreted, and dropped unrun, in constant
//! native stack:
//!
//! ```rust
//! use strand::effect::{IO, Outcome, TestContext};
//!
//! let program = (0..100_000).fold(IO::pure(0_u64), |io, _| io.flat_map(|n| IO::pure(n + 1)));
//! assert_eq!(TestContext::new().run(program), Some(Outcome::Succeeded(100_000)));
//! ```

pub(crate) mod algebra;
mod concurrent;
mod resource;
pub(crate) mod run_loop;
mod stack;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::control::Either;

use super::fiber::{CancelToken, Fiber, FiberId, FiberShared, RawFiber};
use super::{ContextRef, IoError, Outcome, Runtime};
use algebra::{AttemptFns, Node, NodeBox, RawCallback, Value, downcast};

pub use concurrent::{
    RacePairResult, par_sequence, par_sequence_outcome, par_traverse, par_traverse_n,
};

// =============================================================================
// Poll
// =============================================================================

/// Capability to lift the mask of one `uncancelable` region.
///
/// Handed to the body of [`IO::uncancelable`]. [`Poll::apply`] makes the
/// wrapped computation cancelable again, as it was outside the region. A
/// poll used outside its own region (in another fiber, or after a nested
/// region was entered without its own poll) has no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub(crate) fiber: FiberId,
    pub(crate) depth: u32,
}

impl Poll {
    pub(crate) const fn new(fiber: FiberId, depth: u32) -> Self {
        Self { fiber, depth }
    }

    /// Runs `io` with cancellation re-enabled.
    pub fn apply<A: Send + 'static>(&self, io: IO<A>) -> IO<A> {
        IO::from_node(Node::Unmask {
            source: NodeBox::new(io.node),
            poll: *self,
        })
    }
}

// =============================================================================
// Callback
// =============================================================================

/// Completes an asynchronous boundary created by [`IO::async_`].
///
/// Clones complete the same boundary. The first completion wins; later ones
/// are logged and ignored.
pub struct Callback<A> {
    raw: RawCallback,
    _marker: PhantomData<fn(A)>,
}

impl<A: Send + 'static> Callback<A> {
    const fn new(raw: RawCallback) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Resumes the suspended computation with `value`.
    pub fn succeed(&self, value: A) {
        self.raw.complete(Ok(Box::new(value)));
    }

    /// Resumes the suspended computation with `error`.
    pub fn fail(&self, error: impl Into<IoError>) {
        self.raw.complete(Err(error.into()));
    }

    /// Resumes with either channel.
    pub fn complete(&self, result: Result<A, IoError>) {
        match result {
            Ok(value) => self.succeed(value),
            Err(error) => self.fail(error),
        }
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Callback")
    }
}

// =============================================================================
// IO
// =============================================================================

/// A lazily evaluated effectful computation producing `A`.
///
/// An `IO` is consumed by composition and by running; it cannot be cloned.
/// Build it again (for example from a closure) to run the same effect twice.
#[must_use = "IO does nothing until it is run"]
pub struct IO<A> {
    node: Node,
    _marker: PhantomData<fn() -> A>,
}

static_assertions::assert_impl_all!(IO<i32>: Send);
static_assertions::assert_impl_all!(Fiber<String>: Send, Sync);

fn wrap_ok<A: Send + 'static>(value: Value) -> Value {
    Box::new(Ok::<A, IoError>(downcast::<A>(value)))
}

fn wrap_err<A: Send + 'static>(error: IoError) -> Value {
    Box::new(Err::<A, IoError>(error))
}

impl<A: Send + 'static> IO<A> {
    pub(crate) const fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node {
        self.node
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Lifts an already computed value.
    pub fn pure(value: A) -> Self {
        Self::from_node(Node::Pure(Box::new(value)))
    }

    /// Suspends a side effect until the `IO` runs.
    ///
    /// A panic inside `thunk` surfaces as
    /// [`RuntimeError::Panicked`](super::RuntimeError::Panicked) in the
    /// error channel.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    /// use strand::effect::{IO, TestContext};
    ///
    /// let counter = Arc::new(AtomicUsize::new(0));
    /// let shared = Arc::clone(&counter);
    /// let io = IO::delay(move || shared.fetch_add(1, Ordering::SeqCst));
    /// assert_eq!(counter.load(Ordering::SeqCst), 0);
    ///
    /// TestContext::new().run(io);
    /// assert_eq!(counter.load(Ordering::SeqCst), 1);
    /// ```
    pub fn delay<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || {
            Node::Pure(Box::new(thunk()))
        })))
    }

    /// Suspends a fallible side effect.
    pub fn try_delay<F, E>(thunk: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
        E: Into<IoError>,
    {
        Self::from_node(Node::Delay(Box::new(move || match thunk() {
            Ok(value) => Node::Pure(Box::new(value)),
            Err(error) => Node::Fail(error.into()),
        })))
    }

    /// Suspends the construction of an `IO`.
    pub fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + Send + 'static,
    {
        Self::from_node(Node::Delay(Box::new(move || thunk().node)))
    }

    /// Fails with `error`.
    pub fn raise_error(error: impl Into<IoError>) -> Self {
        Self::from_node(Node::Fail(error.into()))
    }

    /// Lifts a `Result` into the value or error channel.
    pub fn from_result(result: Result<A, IoError>) -> Self {
        match result {
            Ok(value) => Self::pure(value),
            Err(error) => Self::raise_error(error),
        }
    }

    /// Suspends until a callback is invoked.
    ///
    /// `register` receives the [`Callback`] and returns an optional
    /// cancellation action. Registration runs masked. The wait for the
    /// callback is cancelable; if it is canceled, the action runs as a
    /// finalizer before the fiber completes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::{IO, Outcome, TestContext};
    ///
    /// let io = IO::async_(|callback| {
    ///     IO::delay(move || {
    ///         callback.succeed(7);
    ///         None
    ///     })
    /// });
    /// assert_eq!(TestContext::new().run(io), Some(Outcome::Succeeded(7)));
    /// ```
    pub fn async_<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A>) -> IO<Option<IO<()>>> + Send + 'static,
    {
        Self::from_node(Node::Async(Box::new(move |raw: RawCallback| {
            let cell = raw.cell();
            let callback = Callback::new(raw);
            IO::<A>::uncancelable(move |poll| {
                register(callback).flat_map(move |finalizer| {
                    let wait = poll.apply(Self::from_node(Node::Await(cell)));
                    match finalizer {
                        Some(finalizer) => wait.on_cancel(finalizer),
                        None => wait,
                    }
                })
            })
            .node
        })))
    }

    /// Like [`IO::async_`] with no cancellation action; the registration is
    /// a plain side effect.
    pub fn async_simple<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A>) + Send + 'static,
    {
        Self::async_(move |callback| {
            IO::delay(move || {
                register(callback);
                None
            })
        })
    }

    /// Never completes. Cancelable.
    pub fn never() -> Self {
        Self::async_(|_| IO::pure(None))
    }

    /// Runs `body` with cancellation masked.
    ///
    /// Cancellation requests arriving while masked are deferred until the
    /// region exits, except inside computations wrapped with the
    /// [`Poll`] handed to `body`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::effect::{IO, Outcome, TestContext};
    ///
    /// // `canceled` inside a mask takes effect once the region ends.
    /// let io = IO::uncancelable(|_| IO::canceled().then(IO::pure(1)));
    /// assert_eq!(TestContext::new().run(io), Some(Outcome::Canceled));
    /// ```
    pub fn uncancelable<F>(body: F) -> Self
    where
        F: FnOnce(Poll) -> Self + Send + 'static,
    {
        Self::from_node(Node::Uncancelable(Box::new(move |poll| body(poll).node)))
    }

    /// Waits for `duration` on the runtime's clock, then produces `self`.
    pub fn delay_by(self, duration: Duration) -> Self {
        IO::sleep(duration).then(self)
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// Transforms the result.
    pub fn fmap<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        IO::from_node(Node::Map(
            NodeBox::new(self.node),
            Box::new(move |value| Box::new(function(downcast::<A>(value)))),
        ))
    }

    /// Sequences a computation that depends on the result.
    pub fn flat_map<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> IO<B> + Send + 'static,
    {
        IO::from_node(Node::FlatMap(
            NodeBox::new(self.node),
            Box::new(move |value| function(downcast::<A>(value)).node),
        ))
    }

    /// Alias for [`IO::flat_map`].
    pub fn and_then<B, F>(self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> IO<B> + Send + 'static,
    {
        self.flat_map(function)
    }

    /// Runs `next` after `self`, discarding `self`'s result.
    pub fn then<B: Send + 'static>(self, next: IO<B>) -> IO<B> {
        self.flat_map(move |_| next)
    }

    /// Observes the result without changing it.
    pub fn tap<F>(self, function: F) -> Self
    where
        F: FnOnce(&A) + Send + 'static,
    {
        self.fmap(move |value| {
            function(&value);
            value
        })
    }

    /// Runs an effect that observes the result, keeping the result.
    pub fn flat_tap<B, F>(self, function: F) -> Self
    where
        B: Send + 'static,
        F: FnOnce(&A) -> IO<B> + Send + 'static,
    {
        self.flat_map(move |value| function(&value).fmap(move |_| value))
    }

    /// Discards the result.
    pub fn void(self) -> IO<()> {
        self.fmap(|_| ())
    }

    /// Recovers from an error with another computation.
    pub fn handle_error_with<F>(self, handler: F) -> Self
    where
        F: FnOnce(IoError) -> Self + Send + 'static,
    {
        Self::from_node(Node::HandleErrorWith(
            NodeBox::new(self.node),
            Box::new(move |error| handler(error).node),
        ))
    }

    /// Recovers from an error with a value.
    pub fn handle_error<F>(self, handler: F) -> Self
    where
        F: FnOnce(IoError) -> A + Send + 'static,
    {
        self.handle_error_with(move |error| Self::pure(handler(error)))
    }

    /// Exposes the error channel as a `Result`.
    pub fn attempt(self) -> IO<Result<A, IoError>> {
        IO::from_node(Node::Attempt(
            NodeBox::new(self.node),
            AttemptFns {
                on_success: wrap_ok::<A>,
                on_error: wrap_err::<A>,
            },
        ))
    }

    /// Folds both channels into a value.
    pub fn redeem<B, R, S>(self, recover: R, map: S) -> IO<B>
    where
        B: Send + 'static,
        R: FnOnce(IoError) -> B + Send + 'static,
        S: FnOnce(A) -> B + Send + 'static,
    {
        self.attempt().fmap(move |result| match result {
            Ok(value) => map(value),
            Err(error) => recover(error),
        })
    }

    /// Folds both channels into a computation.
    pub fn redeem_with<B, R, S>(self, recover: R, bind: S) -> IO<B>
    where
        B: Send + 'static,
        R: FnOnce(IoError) -> IO<B> + Send + 'static,
        S: FnOnce(A) -> IO<B> + Send + 'static,
    {
        self.attempt().flat_map(move |result| match result {
            Ok(value) => bind(value),
            Err(error) => recover(error),
        })
    }

    /// Registers `finalizer` to run if `self` is canceled while it runs.
    ///
    /// The finalizer runs masked, after the finalizers registered inside
    /// `self`. It does not run on success or error.
    pub fn on_cancel(self, finalizer: IO<()>) -> Self {
        Self::from_node(Node::OnCancel(NodeBox::new(self.node), NodeBox::new(finalizer.node)))
    }

    /// Starts `self` on a new fiber and returns its handle immediately.
    pub fn fork(self) -> IO<Fiber<A>> {
        IO::from_node(Node::Fork(NodeBox::new(self.node)))
            .fmap(|raw: RawFiber| Fiber::from_raw(raw))
    }

    /// Repeats `step` until it produces `Right`, in constant stack.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strand::control::Either;
    /// use strand::effect::{IO, Outcome, TestContext};
    ///
    /// let sum = IO::tail_rec_m((0_u64, 0_u64), |(i, total)| {
    ///     IO::pure(if i == 1_000_000 {
    ///         Either::Right(total)
    ///     } else {
    ///         Either::Left((i + 1, total + i))
    ///     })
    /// });
    /// assert_eq!(
    ///     TestContext::new().run(sum),
    ///     Some(Outcome::Succeeded(499_999_500_000))
    /// );
    /// ```
    pub fn tail_rec_m<S, F>(initial: S, step: F) -> Self
    where
        S: Send + 'static,
        F: Fn(S) -> IO<Either<S, A>> + Send + Sync + 'static,
    {
        fn go<S, A, F>(state: S, step: Arc<F>) -> IO<A>
        where
            S: Send + 'static,
            A: Send + 'static,
            F: Fn(S) -> IO<Either<S, A>> + Send + Sync + 'static,
        {
            IO::defer(move || {
                step(state).flat_map(move |next| match next {
                    Either::Left(state) => go(state, step),
                    Either::Right(value) => IO::pure(value),
                })
            })
        }
        go(initial, Arc::new(step))
    }

    // =========================================================================
    // Running
    // =========================================================================

    /// Runs `self` on a new root fiber of `runtime`.
    ///
    /// Returns immediately; `callback` is invoked exactly once, on the
    /// execution context, with the fiber's outcome.
    pub fn unsafe_run_async<F>(self, runtime: &Runtime, callback: F) -> CancelToken
    where
        F: FnOnce(Outcome<A>) + Send + 'static,
    {
        let fiber = FiberShared::new(runtime.clone());
        let listener = Box::new(move |completed: &RawFiber| {
            if let Some(outcome) = completed.take_outcome() {
                callback(outcome.map(downcast::<A>));
            }
        });
        let _ = fiber.on_complete(listener);
        fiber.start(self.node);
        CancelToken::new(fiber)
    }
}

impl IO<()> {
    /// The unit computation.
    pub fn unit() -> Self {
        Self::pure(())
    }

    /// Sets the current fiber's cancellation latch.
    ///
    /// Unmasked, the fiber is canceled at the next step. Inside an
    /// `uncancelable` region, cancellation happens once the region exits.
    pub fn canceled() -> Self {
        Self::from_node(Node::Canceled)
    }

    /// Yields the worker back to the execution context.
    pub fn cede() -> Self {
        Self::from_node(Node::Cede)
    }

    /// Completes after `duration` on the runtime's clock.
    pub fn sleep(duration: Duration) -> Self {
        IO::runtime().flat_map(move |runtime| {
            Self::async_(move |callback| {
                IO::delay(move || {
                    let timer = runtime
                        .context()
                        .schedule_after(duration, Box::new(move || callback.succeed(())));
                    Some(IO::delay(move || timer.cancel()))
                })
            })
        })
    }
}

impl IO<Runtime> {
    /// The runtime the current fiber runs on.
    pub fn runtime() -> Self {
        Self::from_node(Node::ReadRuntime)
    }
}

impl IO<ContextRef> {
    /// The execution context of the current fiber.
    pub fn execution_context() -> Self {
        IO::runtime().fmap(|runtime| Arc::clone(runtime.context()))
    }
}

impl IO<Duration> {
    /// Reads the execution context's monotonic clock.
    pub fn monotonic() -> Self {
        IO::runtime().fmap(|runtime| runtime.context().monotonic())
    }

    /// Reads wall-clock time since the Unix epoch.
    pub fn real_time() -> Self {
        IO::runtime()
            .fmap(|runtime| Duration::from_millis(runtime.context().current_time_millis()))
    }
}

impl<A: Send + 'static> IO<IO<A>> {
    /// Removes one level of nesting.
    pub fn flatten(self) -> IO<A> {
        self.flat_map(|inner| inner)
    }
}

// =============================================================================
// Traversals
// =============================================================================

/// Runs `function` on every item in order and collects the results.
pub fn traverse<T, B, F>(items: Vec<T>, function: F) -> IO<Vec<B>>
where
    T: Send + 'static,
    B: Send + 'static,
    F: Fn(T) -> IO<B> + Send + Sync + 'static,
{
    let function = Arc::new(function);
    let capacity = items.len();
    items
        .into_iter()
        .fold(IO::pure(Vec::with_capacity(capacity)), |accumulated, item| {
            let function = Arc::clone(&function);
            accumulated.flat_map(move |mut values| {
                function(item).fmap(move |value| {
                    values.push(value);
                    values
                })
            })
        })
}

/// Runs every computation in order and collects the results.
pub fn sequence<A: Send + 'static>(ios: Vec<IO<A>>) -> IO<Vec<A>> {
    let capacity = ios.len();
    ios.into_iter()
        .fold(IO::pure(Vec::with_capacity(capacity)), |accumulated, io| {
            accumulated.flat_map(move |mut values| {
                io.fmap(move |value| {
                    values.push(value);
                    values
                })
            })
        })
}

impl<A> fmt::Debug for IO<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("IO")
            .field("node", &self.node)
            .finish()
    }
}
