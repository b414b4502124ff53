use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::super::IO;

/// A mutable cell shared between fibers.
///
/// Every operation is an `IO` and runs as one critical section: the lock is
/// taken and released within a single interpreter step, never across a
/// suspension, so concurrent `modify` calls from fibers on different
/// workers do not lose updates.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{IO, Outcome, Ref, TestContext};
///
/// let program = Ref::of(1).flat_map(|counter| {
///     counter
///         .update(|n| n + 1)
///         .then(counter.modify(|n| (n * 10, n)))
///         .flat_map(move |previous| counter.get().fmap(move |now| (previous, now)))
/// });
///
/// assert_eq!(TestContext::new().run(program), Some(Outcome::Succeeded((2, 20))));
/// ```
pub struct Ref<A> {
    value: Arc<Mutex<A>>,
}

impl<A> Clone for Ref<A> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<A: Clone + Send + 'static> Ref<A> {
    /// Creates a cell outside of `IO`.
    pub fn new(initial: A) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
        }
    }

    /// Creates a cell as an effect.
    pub fn of(initial: A) -> IO<Self> {
        IO::delay(move || Self::new(initial))
    }

    /// Reads the current value.
    pub fn get(&self) -> IO<A> {
        let value = Arc::clone(&self.value);
        IO::delay(move || value.lock().clone())
    }

    /// Replaces the current value.
    pub fn set(&self, new_value: A) -> IO<()> {
        let value = Arc::clone(&self.value);
        IO::delay(move || *value.lock() = new_value)
    }

    /// Replaces the current value and returns the previous one.
    pub fn get_and_set(&self, new_value: A) -> IO<A> {
        self.modify(move |current| (new_value, current))
    }

    /// Applies `function` to the current value.
    pub fn update<F>(&self, function: F) -> IO<()>
    where
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |current| (function(current), ()))
    }

    /// Applies `function` and returns the new value.
    pub fn update_and_get<F>(&self, function: F) -> IO<A>
    where
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |current| {
            let next = function(current);
            (next.clone(), next)
        })
    }

    /// Applies `function` and returns the previous value.
    pub fn get_and_update<F>(&self, function: F) -> IO<A>
    where
        F: FnOnce(A) -> A + Send + 'static,
    {
        self.modify(move |current| (function(current.clone()), current))
    }

    /// Replaces the value with the first component of `function`'s result
    /// and returns the second.
    ///
    /// If `function` panics the value is left unchanged.
    pub fn modify<B, F>(&self, function: F) -> IO<B>
    where
        B: Send + 'static,
        F: FnOnce(A) -> (A, B) + Send + 'static,
    {
        let value = Arc::clone(&self.value);
        IO::delay(move || {
            let mut guard = value.lock();
            let (next, output) = function(guard.clone());
            *guard = next;
            output
        })
    }
}

impl<A: Clone + Send + 'static> IO<Ref<A>> {
    /// Shorthand for [`Ref::of`].
    pub fn ref_of(initial: A) -> Self {
        Ref::of(initial)
    }
}

impl<A: fmt::Debug> fmt::Debug for Ref<A> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ref")
            .field("value", &*self.value.lock())
            .finish()
    }
}
