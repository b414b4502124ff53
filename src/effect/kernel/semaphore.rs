use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::super::io::Callback;
use super::super::IO;

struct Waiter {
    id: u64,
    wanted: usize,
    callback: Callback<()>,
}

struct State {
    available: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

impl State {
    /// Grants permits to waiters at the front of the queue while they fit.
    ///
    /// Strict FIFO: a large request at the front blocks smaller ones behind
    /// it.
    fn grant(&mut self) -> Vec<Callback<()>> {
        let mut granted = Vec::new();
        while let Some(front) = self.waiters.front() {
            if front.wanted > self.available {
                break;
            }
            self.available -= front.wanted;
            if let Some(waiter) = self.waiters.pop_front() {
                granted.push(waiter.callback);
            }
        }
        granted
    }
}

/// A counting pool of permits with a FIFO queue of waiting fibers.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{IO, Outcome, Semaphore, TestContext};
///
/// let program = Semaphore::of(2).flat_map(|semaphore| {
///     let inner = semaphore.clone();
///     semaphore
///         .with_permit(IO::defer(move || inner.available()))
/// });
///
/// assert_eq!(TestContext::new().run(program), Some(Outcome::Succeeded(1)));
/// ```
#[derive(Clone)]
pub struct Semaphore {
    state: Arc<Mutex<State>>,
}

impl Semaphore {
    /// Creates a pool with `permits` permits outside of `IO`.
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: permits,
                waiters: VecDeque::new(),
                next_id: 0,
            })),
        }
    }

    /// Creates a pool as an effect.
    pub fn of(permits: usize) -> IO<Self> {
        IO::delay(move || Self::new(permits))
    }

    /// Permits currently free.
    pub fn available(&self) -> IO<usize> {
        let state = Arc::clone(&self.state);
        IO::delay(move || state.lock().available)
    }

    /// Acquires one permit, waiting in line if none is free.
    pub fn acquire(&self) -> IO<()> {
        self.acquire_n(1)
    }

    /// Acquires `count` permits at once, waiting in line until they fit.
    ///
    /// Canceling the wait leaves the queue; permits granted to a wait that
    /// is canceled before it resumes are given back.
    pub fn acquire_n(&self, count: usize) -> IO<()> {
        let state = Arc::clone(&self.state);
        IO::async_(move |callback| {
            IO::delay(move || {
                let id = {
                    let mut guard = state.lock();
                    if guard.waiters.is_empty() && guard.available >= count {
                        guard.available -= count;
                        drop(guard);
                        callback.succeed(());
                        None
                    } else {
                        let id = guard.next_id;
                        guard.next_id += 1;
                        guard.waiters.push_back(Waiter {
                            id,
                            wanted: count,
                            callback,
                        });
                        Some(id)
                    }
                };
                let cancel = IO::delay(move || {
                    let granted = {
                        let mut guard = state.lock();
                        let queued = id.and_then(|id| {
                            guard.waiters.iter().position(|waiter| waiter.id == id)
                        });
                        match queued {
                            Some(index) => {
                                guard.waiters.remove(index);
                            }
                            None => guard.available += count,
                        }
                        guard.grant()
                    };
                    for callback in granted {
                        callback.succeed(());
                    }
                });
                Some(cancel)
            })
        })
    }

    /// Takes one permit if one is free right now.
    pub fn try_acquire(&self) -> IO<bool> {
        self.try_acquire_n(1)
    }

    /// Takes `count` permits if they are free right now and nobody is
    /// waiting ahead.
    pub fn try_acquire_n(&self, count: usize) -> IO<bool> {
        let state = Arc::clone(&self.state);
        IO::delay(move || {
            let mut guard = state.lock();
            if guard.waiters.is_empty() && guard.available >= count {
                guard.available -= count;
                true
            } else {
                false
            }
        })
    }

    /// Returns one permit.
    pub fn release(&self) -> IO<()> {
        self.release_n(1)
    }

    /// Returns `count` permits and wakes the waiters they satisfy.
    pub fn release_n(&self, count: usize) -> IO<()> {
        let state = Arc::clone(&self.state);
        IO::delay(move || {
            let granted = {
                let mut guard = state.lock();
                guard.available += count;
                guard.grant()
            };
            for callback in granted {
                callback.succeed(());
            }
        })
    }

    /// Runs `io` holding one permit. The permit is returned however `io`
    /// ends, including when the holder is canceled while still waiting.
    pub fn with_permit<A: Send + 'static>(&self, io: IO<A>) -> IO<A> {
        let acquire = self.acquire();
        let release = self.release();
        IO::uncancelable(move |poll| poll.apply(acquire).then(poll.apply(io).guarantee(release)))
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("Semaphore")
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{Outcome, TestContext};

    #[test]
    fn test_release_wakes_waiters_in_order() {
        let context = TestContext::new();
        let semaphore = Semaphore::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let log = Arc::clone(&log);
            let io = semaphore
                .acquire()
                .then(IO::delay(move || log.lock().push(label)));
            drop(io.unsafe_run_async(&context.runtime(), |_| {}));
        }
        context.tick();
        assert!(log.lock().is_empty());

        context.run(semaphore.release_n(2));
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_large_request_blocks_queue() {
        let context = TestContext::new();
        let semaphore = Semaphore::new(1);
        drop(semaphore.acquire_n(3).unsafe_run_async(&context.runtime(), |_| {}));
        context.tick();

        assert_eq!(context.run(semaphore.try_acquire()), Some(Outcome::Succeeded(false)));
        assert_eq!(context.run(semaphore.release_n(2)), Some(Outcome::Succeeded(())));
        assert_eq!(context.run(semaphore.available()), Some(Outcome::Succeeded(0)));
    }

    #[test]
    fn test_canceled_waiter_leaves_queue() {
        let context = TestContext::new();
        let semaphore = Semaphore::new(0);
        let token = semaphore.acquire().unsafe_run_async(&context.runtime(), |_| {});
        context.tick();
        token.cancel();
        context.tick();

        assert!(token.is_completed());
        assert_eq!(context.run(semaphore.release()), Some(Outcome::Succeeded(())));
        assert_eq!(context.run(semaphore.available()), Some(Outcome::Succeeded(1)));
    }
}
