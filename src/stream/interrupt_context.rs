use std::fmt;
use std::sync::Arc;

use super::ScopeId;
use crate::control::Either;
use crate::effect::{Deferred, Fiber, IO, IoError, Outcome};

/// Why an interruptible scope stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum InterruptionOutcome {
    /// The scope with this id was interrupted by its signal; every scope
    /// sharing its interrupt context stops with it.
    Interrupted(ScopeId),
    /// The interruption signal failed.
    Errored(IoError),
    /// The computation evaluated under the scope was canceled.
    Canceled,
}

impl fmt::Display for InterruptionOutcome {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted(scope) => write!(formatter, "interrupted by {scope}"),
            Self::Errored(error) => write!(formatter, "interruption failed: {error}"),
            Self::Canceled => write!(formatter, "canceled"),
        }
    }
}

/// Interruption state shared by an interruptible scope and its
/// non-interruptible descendants.
///
/// An interruptible child gets its own context, completed either by its
/// own signal or, through a watcher fiber, by its parent's interruption.
#[derive(Clone)]
pub struct InterruptContext {
    signal: Deferred<InterruptionOutcome>,
    interrupt_root: ScopeId,
    parent_watcher: Option<Arc<Fiber<()>>>,
}

impl InterruptContext {
    pub(crate) fn new(interrupt_root: ScopeId) -> Self {
        Self {
            signal: Deferred::new(),
            interrupt_root,
            parent_watcher: None,
        }
    }

    /// The scope whose signal interrupts this context.
    pub const fn interrupt_root(&self) -> ScopeId {
        self.interrupt_root
    }

    /// Derives the context of a child scope.
    ///
    /// An interruptible child gets a fresh context whose signal follows this
    /// one; a non-interruptible child shares this context.
    pub fn child_context(&self, interruptible: bool, child: ScopeId) -> IO<Self> {
        if !interruptible {
            let shared = Self {
                parent_watcher: None,
                ..self.clone()
            };
            return IO::pure(shared);
        }
        let parent_signal = self.signal.clone();
        IO::defer(move || {
            let context = Self::new(child);
            let signal = context.signal.clone();
            parent_signal
                .get()
                .flat_map(move |outcome| signal.try_complete(outcome).void())
                .fork()
                .fmap(move |watcher| Self {
                    parent_watcher: Some(Arc::new(watcher)),
                    ..context
                })
        })
    }

    /// Records `outcome` unless an interruption was already recorded.
    pub fn complete(&self, outcome: InterruptionOutcome) -> IO<()> {
        self.signal.try_complete(outcome).void()
    }

    /// The recorded interruption, if any.
    pub fn outcome(&self) -> IO<Option<InterruptionOutcome>> {
        self.signal.try_get()
    }

    /// Runs `io` unless or until the context is interrupted.
    ///
    /// When interruption wins the race, `io` is canceled and awaited, so an
    /// uncancelable acquisition in flight finishes (and registers its
    /// resource) before this returns. Errors and self-cancellation of `io`
    /// are reported as interruption outcomes.
    pub fn eval<A: Send + 'static>(&self, io: IO<A>) -> IO<Either<InterruptionOutcome, A>> {
        let signal = self.signal.clone();
        IO::defer(move || {
            let recorded = signal.try_get();
            recorded.flat_map(move |recorded| match recorded {
                Some(outcome) => IO::pure(Either::Left(outcome)),
                None => IO::race_outcome(signal.get(), io).fmap(|raced| match raced {
                    Either::Left(Outcome::Succeeded(outcome)) => Either::Left(outcome),
                    Either::Right(Outcome::Succeeded(value)) => Either::Right(value),
                    Either::Left(Outcome::Errored(error))
                    | Either::Right(Outcome::Errored(error)) => {
                        Either::Left(InterruptionOutcome::Errored(error))
                    }
                    Either::Left(Outcome::Canceled) | Either::Right(Outcome::Canceled) => {
                        Either::Left(InterruptionOutcome::Canceled)
                    }
                }),
            })
        })
    }

    /// Stops following the parent's interruption.
    pub(crate) fn cancel_parent(&self) -> IO<()> {
        match &self.parent_watcher {
            Some(watcher) => watcher.cancel(),
            None => IO::unit(),
        }
    }
}

impl fmt::Debug for InterruptContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("InterruptContext")
            .field("interrupt_root", &self.interrupt_root)
            .field("signal", &self.signal)
            .field("follows_parent", &self.parent_watcher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::TestContext;
    use rstest::rstest;

    #[rstest]
    fn eval_returns_value_when_not_interrupted() {
        let context = TestContext::new();
        let interrupt = InterruptContext::new(ScopeId::next());
        assert_eq!(
            context.run(interrupt.eval(IO::pure(3))),
            Some(Outcome::Succeeded(Either::Right(3)))
        );
    }

    #[rstest]
    fn eval_short_circuits_after_interruption() {
        let context = TestContext::new();
        let root = ScopeId::next();
        let interrupt = InterruptContext::new(root);
        context.run(interrupt.complete(InterruptionOutcome::Interrupted(root)));

        assert_eq!(
            context.run(interrupt.eval(IO::pure(3))),
            Some(Outcome::Succeeded(Either::Left(InterruptionOutcome::Interrupted(root))))
        );
    }

    #[rstest]
    fn eval_turns_errors_into_interruption_outcome() {
        let context = TestContext::new();
        let interrupt = InterruptContext::new(ScopeId::next());
        let outcome = context.run(interrupt.eval(IO::<i32>::raise_error("bad")));
        assert_eq!(
            outcome,
            Some(Outcome::Succeeded(Either::Left(InterruptionOutcome::Errored(
                IoError::msg("bad")
            ))))
        );
    }

    #[rstest]
    fn child_follows_parent_interruption() {
        let context = TestContext::new();
        let root = ScopeId::next();
        let parent = InterruptContext::new(root);
        let child = context
            .run(parent.child_context(true, ScopeId::next()))
            .and_then(|outcome| outcome.into_result())
            .and_then(Result::ok)
            .expect("child context");

        context.run(parent.complete(InterruptionOutcome::Interrupted(root)));
        assert_eq!(
            context.run(child.outcome()),
            Some(Outcome::Succeeded(Some(InterruptionOutcome::Interrupted(root))))
        );
    }

    #[rstest]
    fn canceled_watcher_stops_following_parent() {
        let context = TestContext::new();
        let root = ScopeId::next();
        let parent = InterruptContext::new(root);
        let child = context
            .run(parent.child_context(true, ScopeId::next()))
            .and_then(|outcome| outcome.into_result())
            .and_then(Result::ok)
            .expect("child context");

        context.run(child.cancel_parent());
        context.run(parent.complete(InterruptionOutcome::Interrupted(root)));
        assert_eq!(context.run(child.outcome()), Some(Outcome::Succeeded(None)));
    }
}
