//! A deterministic execution context with a virtual clock.
//!
//! Tasks are queued in FIFO order and only run when the test asks for it;
//! timers fire only when the virtual clock is advanced. Programs that sleep
//! for hours complete instantly and always interleave the same way.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use strand::effect::{IO, Outcome, TestContext};
//!
//! let context = TestContext::new();
//! let program = IO::sleep(Duration::from_secs(3600)).then(IO::monotonic());
//!
//! assert_eq!(
//!     context.run(program),
//!     Some(Outcome::Succeeded(Duration::from_secs(3600)))
//! );
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ContextRef, ExecutionContext, IO, Outcome, Runtime, RuntimeConfig, Task, TimerHandle};

type TimerKey = (Duration, u64);

#[derive(Default)]
struct TestState {
    tasks: VecDeque<Task>,
    timers: BTreeMap<TimerKey, Task>,
    now: Duration,
    next_sequence: u64,
    executed: u64,
}

/// Execution context driven by hand from a test.
///
/// Clones share the same queue and clock.
#[derive(Clone, Default)]
pub struct TestContext {
    state: Arc<Mutex<TestState>>,
}

impl TestContext {
    /// Creates a context at virtual time zero with nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// This context as a shareable [`ContextRef`].
    pub fn context_ref(&self) -> ContextRef {
        Arc::new(self.clone())
    }

    /// A runtime backed by this context with the default configuration.
    pub fn runtime(&self) -> Runtime {
        Runtime::with_context(self.context_ref())
    }

    /// A runtime backed by this context with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` does not validate.
    pub fn runtime_with(&self, config: RuntimeConfig) -> Runtime {
        Runtime::new(self.context_ref(), config).expect("invalid runtime configuration")
    }

    /// Runs the oldest queued task. Returns `false` if the queue was empty.
    pub fn tick_one(&self) -> bool {
        let task = {
            let mut state = self.state.lock();
            let task = state.tasks.pop_front();
            if task.is_some() {
                state.executed += 1;
            }
            task
        };
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks, including those they enqueue, until none are left.
    /// The clock does not move.
    pub fn tick(&self) {
        while self.tick_one() {}
    }

    /// Moves the clock forward by `duration`, firing every timer that falls
    /// due on the way in deadline order and ticking after each one.
    pub fn advance(&self, duration: Duration) {
        let target = self.state.lock().now + duration;
        self.tick();
        while self.fire_next_timer(Some(target)) {
            self.tick();
        }
        let mut state = self.state.lock();
        if state.now < target {
            state.now = target;
        }
    }

    /// Alternates ticking and jumping to the next timer until no work or
    /// timers remain.
    pub fn tick_all(&self) {
        self.tick();
        while self.fire_next_timer(None) {
            self.tick();
        }
    }

    /// Runs `io` on this context until it completes or nothing more can run.
    ///
    /// Returns `None` if the program is still suspended once the context has
    /// gone idle, for example when it waits on `IO::never`.
    pub fn run<A: Send + 'static>(&self, io: IO<A>) -> Option<Outcome<A>> {
        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        let _token = io.unsafe_run_async(&self.runtime(), move |outcome| {
            *slot.lock() = Some(outcome);
        });
        self.tick_all();
        result.lock().take()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Number of timers not yet fired or canceled.
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    /// Number of tasks run so far.
    pub fn executed_tasks(&self) -> u64 {
        self.state.lock().executed
    }

    /// Moves the earliest timer's task onto the queue, if its deadline is
    /// within `limit`.
    fn fire_next_timer(&self, limit: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        let Some((&key, _)) = state.timers.iter().next() else {
            return false;
        };
        if limit.is_some_and(|limit| key.0 > limit) {
            return false;
        }
        let Some(task) = state.timers.remove(&key) else {
            return false;
        };
        if state.now < key.0 {
            state.now = key.0;
        }
        state.tasks.push_back(task);
        true
    }
}

impl ExecutionContext for TestContext {
    fn execute(&self, task: Task) {
        self.state.lock().tasks.push_back(task);
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TimerHandle {
        let key = {
            let mut state = self.state.lock();
            let key = (state.now + delay, state.next_sequence);
            state.next_sequence += 1;
            state.timers.insert(key, task);
            key
        };
        let state = Arc::downgrade(&self.state);
        TimerHandle::new(move || {
            if let Some(state) = state.upgrade() {
                state.lock().timers.remove(&key);
            }
        })
    }

    fn current_time_millis(&self) -> u64 {
        u64::try_from(self.state.lock().now.as_millis()).unwrap_or(u64::MAX)
    }

    fn monotonic(&self) -> Duration {
        self.state.lock().now
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("TestContext")
            .field("now", &state.now)
            .field("tasks", &state.tasks.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_tasks_wait_for_tick() {
        let context = TestContext::new();
        let counter = Arc::new(AtomicUsize::new(0));
        context.execute(counting_task(&counter));
        context.execute(counting_task(&counter));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(context.pending_tasks(), 2);
        context.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(context.executed_tasks(), 2);
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let context = TestContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, millis) in [("late", 30_u64), ("early", 10), ("middle", 20)] {
            let order = Arc::clone(&order);
            drop(context.schedule_after(
                Duration::from_millis(millis),
                Box::new(move || order.lock().push(label)),
            ));
        }

        context.advance(Duration::from_millis(15));
        assert_eq!(*order.lock(), vec!["early"]);
        assert_eq!(context.now(), Duration::from_millis(15));

        context.tick_all();
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
        assert_eq!(context.now(), Duration::from_millis(30));
    }

    #[test]
    fn test_canceled_timer_never_fires() {
        let context = TestContext::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = context.schedule_after(Duration::from_secs(1), counting_task(&counter));
        handle.cancel();

        context.advance(Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(context.pending_timers(), 0);
    }
}
