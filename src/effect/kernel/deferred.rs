use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::super::io::Callback;
use super::super::{IO, RuntimeError};

enum State<A> {
    Unset {
        waiters: Vec<(u64, Callback<A>)>,
        next_id: u64,
    },
    Set(A),
}

/// A single-assignment cell that fibers can wait on.
///
/// `get` suspends until the cell is completed; every waiter then receives a
/// clone of the value. The cell can be completed once: a second
/// [`complete`](Deferred::complete) fails with
/// [`RuntimeError::DeferredAlreadyCompleted`], while
/// [`try_complete`](Deferred::try_complete) reports `false` instead.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{Deferred, IO, Outcome, TestContext};
///
/// let program = Deferred::<i32>::of().flat_map(|deferred| {
///     let waiter = deferred.get().fork();
///     waiter.flat_map(move |fiber| deferred.complete(42).then(fiber.join_with_never()))
/// });
///
/// assert_eq!(TestContext::new().run(program), Some(Outcome::Succeeded(42)));
/// ```
pub struct Deferred<A> {
    state: Arc<Mutex<State<A>>>,
}

impl<A> Clone for Deferred<A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<A: Clone + Send + 'static> Deferred<A> {
    /// Creates an empty cell outside of `IO`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Unset {
                waiters: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Creates an empty cell as an effect.
    pub fn of() -> IO<Self> {
        IO::delay(Self::new)
    }

    /// Waits for the value. Cancelable while waiting.
    pub fn get(&self) -> IO<A> {
        let state = Arc::clone(&self.state);
        IO::defer(move || {
            if let State::Set(value) = &*state.lock() {
                return IO::pure(value.clone());
            }
            IO::async_(move |callback| {
                IO::delay(move || {
                    let mut guard = state.lock();
                    match &mut *guard {
                        State::Set(value) => {
                            let value = value.clone();
                            drop(guard);
                            callback.succeed(value);
                            None
                        }
                        State::Unset { waiters, next_id } => {
                            let id = *next_id;
                            *next_id += 1;
                            waiters.push((id, callback));
                            drop(guard);
                            Some(IO::delay(move || {
                                if let State::Unset { waiters, .. } = &mut *state.lock() {
                                    waiters.retain(|(waiter, _)| *waiter != id);
                                }
                            }))
                        }
                    }
                })
            })
        })
    }

    /// Reads the value if the cell has been completed.
    pub fn try_get(&self) -> IO<Option<A>> {
        let state = Arc::clone(&self.state);
        IO::delay(move || match &*state.lock() {
            State::Set(value) => Some(value.clone()),
            State::Unset { .. } => None,
        })
    }

    /// Completes the cell and wakes every waiter, in the order they began
    /// waiting. Returns `false` without changing anything if the cell was
    /// already completed.
    pub fn try_complete(&self, value: A) -> IO<bool> {
        let this = self.clone();
        IO::delay(move || this.complete_now(value))
    }

    pub(crate) fn complete_now(&self, value: A) -> bool {
        let waiters = {
            let mut guard = self.state.lock();
            match &mut *guard {
                State::Set(_) => return false,
                State::Unset { waiters, .. } => {
                    let waiters = std::mem::take(waiters);
                    *guard = State::Set(value.clone());
                    waiters
                }
            }
        };
        for (_, callback) in waiters {
            callback.succeed(value.clone());
        }
        true
    }

    /// Completes the cell and wakes every waiter.
    ///
    /// Fails with [`RuntimeError::DeferredAlreadyCompleted`] if the cell was
    /// already completed; the stored value is kept.
    pub fn complete(&self, value: A) -> IO<()> {
        self.try_complete(value).flat_map(|completed| {
            if completed {
                IO::unit()
            } else {
                IO::raise_error(RuntimeError::DeferredAlreadyCompleted)
            }
        })
    }
}

impl<A: Clone + Send + 'static> Default for Deferred<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Send + 'static> IO<Deferred<A>> {
    /// Shorthand for [`Deferred::of`].
    pub fn deferred() -> Self {
        Deferred::of()
    }
}

impl<A> fmt::Debug for Deferred<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let completed = matches!(*self.state.lock(), State::Set(_));
        formatter
            .debug_struct("Deferred")
            .field("completed", &completed)
            .finish()
    }
}
