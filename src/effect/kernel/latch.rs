use super::super::IO;
use super::{Deferred, Ref};

/// A one-shot barrier that opens after a fixed number of releases.
///
/// # Examples
///
/// ```rust
/// use strand::effect::{CountDownLatch, IO, Outcome, TestContext};
///
/// let program = CountDownLatch::of(2).flat_map(|latch| {
///     let (first, second) = (latch.clone(), latch.clone());
///     latch
///         .await_zero()
///         .fork()
///         .flat_map(move |waiter| first.release().then(second.release()).then(waiter.join()))
/// });
///
/// assert_eq!(
///     TestContext::new().run(program),
///     Some(Outcome::Succeeded(Outcome::Succeeded(())))
/// );
/// ```
#[derive(Clone, Debug)]
pub struct CountDownLatch {
    remaining: Ref<usize>,
    opened: Deferred<()>,
}

impl CountDownLatch {
    /// Creates a latch needing `count` releases. A count of 0 starts open.
    pub fn new(count: usize) -> Self {
        let latch = Self {
            remaining: Ref::new(count),
            opened: Deferred::new(),
        };
        if count == 0 {
            latch.opened.complete_now(());
        }
        latch
    }

    /// Creates a latch as an effect.
    pub fn of(count: usize) -> IO<Self> {
        IO::delay(move || Self::new(count))
    }

    /// Counts down by one, opening the latch on the last release. Extra
    /// releases do nothing.
    pub fn release(&self) -> IO<()> {
        let opened = self.opened.clone();
        self.remaining
            .modify(|remaining| match remaining {
                0 => (0, false),
                1 => (0, true),
                more => (more - 1, false),
            })
            .flat_map(move |open| {
                if open {
                    opened.try_complete(()).void()
                } else {
                    IO::unit()
                }
            })
    }

    /// Waits until the latch is open.
    pub fn await_zero(&self) -> IO<()> {
        self.opened.get()
    }

    /// Releases still needed.
    pub fn remaining(&self) -> IO<usize> {
        self.remaining.get()
    }
}
