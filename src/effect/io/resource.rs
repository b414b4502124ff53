//! Finalization combinators: `guarantee` and the `bracket` family.

use std::sync::Arc;

use parking_lot::Mutex;

use super::super::ExitCase;
use super::{IO, Poll};

/// A finalizer shared by the success, error and cancellation paths of one
/// guarded region. Whichever path gets there first takes it.
struct FinalizerSlot<F> {
    finalizer: Arc<Mutex<Option<F>>>,
}

impl<F> Clone for FinalizerSlot<F> {
    fn clone(&self) -> Self {
        Self {
            finalizer: Arc::clone(&self.finalizer),
        }
    }
}

impl<F> FinalizerSlot<F>
where
    F: FnOnce(ExitCase) -> IO<()> + Send + 'static,
{
    fn new(finalizer: F) -> Self {
        Self {
            finalizer: Arc::new(Mutex::new(Some(finalizer))),
        }
    }

    fn run(self, exit_case: ExitCase) -> IO<()> {
        IO::defer(move || match self.finalizer.lock().take() {
            Some(finalizer) => finalizer(exit_case),
            None => IO::unit(),
        })
    }
}

impl<A: Send + 'static> IO<A> {
    /// Runs `finalizer` however `self` ends: success, error or cancellation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    /// use strand::effect::{IO, IoError, Outcome, TestContext};
    ///
    /// let released = Arc::new(AtomicBool::new(false));
    /// let flag = Arc::clone(&released);
    /// let io = IO::<i32>::raise_error(IoError::msg("boom"))
    ///     .guarantee(IO::delay(move || flag.store(true, Ordering::SeqCst)));
    ///
    /// assert!(TestContext::new().run(io).unwrap().is_errored());
    /// assert!(released.load(Ordering::SeqCst));
    /// ```
    pub fn guarantee(self, finalizer: IO<()>) -> Self {
        self.guarantee_case(move |_| finalizer)
    }

    /// Runs `finalizer` with the [`ExitCase`] of `self`.
    ///
    /// The finalizer runs masked. If it fails after `self` failed, the
    /// original error wins and the finalizer's is reported to the execution
    /// context; after a success, the finalizer's error is raised.
    pub fn guarantee_case<F>(self, finalizer: F) -> Self
    where
        F: FnOnce(ExitCase) -> IO<()> + Send + 'static,
    {
        let slot = FinalizerSlot::new(finalizer);
        IO::uncancelable(move |poll| {
            let on_cancel = slot.clone().run(ExitCase::Canceled);
            let on_error = slot.clone();
            poll.apply(self)
                .on_cancel(on_cancel)
                .handle_error_with(move |error| {
                    let raised = error.clone();
                    on_error
                        .run(ExitCase::Errored(error))
                        .handle_error_with(report_failure)
                        .then(IO::raise_error(raised))
                })
                .flat_map(move |value| slot.run(ExitCase::Succeeded).fmap(move |()| value))
        })
    }

    /// Acquires a resource, uses it, and releases it however the use ends.
    ///
    /// Acquisition and release are uncancelable; the use is cancelable.
    pub fn bracket<R, U, L>(acquire: IO<R>, use_: U, release: L) -> Self
    where
        R: Clone + Send + 'static,
        U: FnOnce(R) -> Self + Send + 'static,
        L: FnOnce(R) -> IO<()> + Send + 'static,
    {
        Self::bracket_case(acquire, use_, move |resource, _| release(resource))
    }

    /// Like [`IO::bracket`], with the release seeing the [`ExitCase`].
    pub fn bracket_case<R, U, L>(acquire: IO<R>, use_: U, release: L) -> Self
    where
        R: Clone + Send + 'static,
        U: FnOnce(R) -> Self + Send + 'static,
        L: FnOnce(R, ExitCase) -> IO<()> + Send + 'static,
    {
        Self::bracket_full(move |_| acquire, use_, release)
    }

    /// The most general bracket: `acquire` receives the region's [`Poll`]
    /// so that it can make parts of the acquisition cancelable, such as
    /// waiting for a permit.
    pub fn bracket_full<R, Q, U, L>(acquire: Q, use_: U, release: L) -> Self
    where
        R: Clone + Send + 'static,
        Q: FnOnce(Poll) -> IO<R> + Send + 'static,
        U: FnOnce(R) -> Self + Send + 'static,
        L: FnOnce(R, ExitCase) -> IO<()> + Send + 'static,
    {
        IO::uncancelable(move |poll| {
            acquire(poll).flat_map(move |resource| {
                let released = resource.clone();
                poll.apply(IO::defer(move || use_(resource)))
                    .guarantee_case(move |exit_case| release(released, exit_case))
            })
        })
    }
}

fn report_failure(error: super::super::IoError) -> IO<()> {
    IO::execution_context().fmap(move |context| context.report_failure(&error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{IoError, Outcome, TestContext};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> IO<()> + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let record = move |entry: &str| {
            let shared = Arc::clone(&shared);
            let entry = entry.to_string();
            IO::delay(move || shared.lock().push(entry))
        };
        (log, record)
    }

    #[test]
    fn test_guarantee_case_reports_each_exit() {
        let context = TestContext::new();
        let (log, _) = recorder();

        let cases: Vec<IO<i32>> = vec![
            IO::pure(1),
            IO::raise_error(IoError::msg("boom")),
            IO::canceled().then(IO::pure(3)),
        ];
        for io in cases {
            let log = Arc::clone(&log);
            let guarded = io.guarantee_case(move |exit_case| {
                IO::delay(move || log.lock().push(format!("{exit_case:?}")))
            });
            context.run(guarded);
        }

        let entries = log.lock().clone();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], "Succeeded");
        assert!(entries[1].starts_with("Errored"));
        assert_eq!(entries[2], "Canceled");
    }

    #[test]
    fn test_bracket_releases_after_use() {
        let context = TestContext::new();
        let (log, record) = recorder();
        let (use_record, release_record) = (record.clone(), record.clone());

        let io = IO::bracket(
            record("acquire").then(IO::pure(10)),
            move |resource| use_record("use").then(IO::pure(resource * 2)),
            move |_| release_record("release"),
        );

        assert_eq!(context.run(io), Some(Outcome::Succeeded(20)));
        assert_eq!(*log.lock(), vec!["acquire", "use", "release"]);
    }

    #[test]
    fn test_finalizer_error_does_not_mask_original_error() {
        let context = TestContext::new();
        let io = IO::<i32>::raise_error(IoError::msg("original"))
            .guarantee(IO::raise_error(IoError::msg("finalizer")));

        assert_eq!(
            context.run(io),
            Some(Outcome::Errored(IoError::msg("original")))
        );
    }

    #[test]
    fn test_finalizer_error_after_success_is_raised() {
        let context = TestContext::new();
        let io = IO::pure(1).guarantee(IO::raise_error(IoError::msg("finalizer")));

        assert_eq!(
            context.run(io),
            Some(Outcome::Errored(IoError::msg("finalizer")))
        );
    }
}
