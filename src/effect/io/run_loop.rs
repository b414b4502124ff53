//! The trampolined interpreter.
//!
//! A [`RunLoop`] drives one fiber. It never recurses into nested nodes:
//! `Map`/`FlatMap`/handler frames go onto the [`ContinuationStack`] and the
//! loop continues with the inner node, so arbitrarily long chains run in
//! constant native stack.
//!
//! # Cancellation
//!
//! At the top of every iteration the loop checks the fiber's cancellation
//! latch. When it is set, the loop is unmasked and not already canceling,
//! the pending stack is discarded and the registered `OnCancel` finalizers
//! run, innermost first, under a mask. Once they are done the fiber
//! completes with `Canceled`.
//!
//! # Fairness
//!
//! After `auto_yield_threshold` iterations the loop reschedules itself on
//! the execution context instead of continuing, so a long synchronous chain
//! cannot starve other fibers sharing a worker.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::super::fiber::{FiberShared, RawFiber};
use super::super::{IoError, Outcome, Runtime};
use super::Poll;
use super::algebra::{AsyncCell, Node, RawCallback, Value};
use super::stack::{ContinuationStack, ContinuationTag, Transform};

/// What the loop does next.
pub(crate) enum Step {
    Eval(Node),
    Succeed(Value),
    Fail(IoError),
    /// Suspend until the cell is completed.
    Await(Arc<AsyncCell>),
    /// Re-entered after a suspension; read the cell.
    Resumed(Arc<AsyncCell>),
    /// Hand the worker back, then continue with the inner step.
    Yield(Box<Step>),
    Done,
}

/// Interpreter state of one fiber.
///
/// The loop does not own its fiber; the fiber owns the loop while it is
/// suspended, and the loop is handed the fiber on every entry.
pub(crate) struct RunLoop {
    runtime: Runtime,
    stack: ContinuationStack,
    /// Innermost last.
    finalizers: Vec<Node>,
    masks: u32,
    canceling: bool,
    finalizer_errors: usize,
}

/// Runs `function`, turning a panic into an error.
fn guarded<T>(function: impl FnOnce() -> T) -> Result<T, IoError> {
    panic::catch_unwind(AssertUnwindSafe(function))
        .map_err(|payload| IoError::from_panic(payload.as_ref()))
}

fn eval_guarded(function: impl FnOnce() -> Node) -> Step {
    guarded(function).map_or_else(Step::Fail, Step::Eval)
}

impl RunLoop {
    pub(crate) fn new(runtime: Runtime) -> Box<Self> {
        Box::new(Self {
            runtime,
            stack: ContinuationStack::new(),
            finalizers: Vec::new(),
            masks: 0,
            canceling: false,
            finalizer_errors: 0,
        })
    }

    const fn is_cancelable(&self) -> bool {
        !self.canceling && self.masks == 0
    }

    /// Drives the fiber from `step` until it completes, suspends or yields.
    pub(crate) fn run(mut self: Box<Self>, fiber: RawFiber, mut step: Step) {
        let threshold = self.runtime.config().auto_yield_threshold;
        let mut iterations = 0_usize;

        loop {
            if matches!(step, Step::Done) {
                return;
            }
            if self.is_cancelable() && fiber.is_cancel_requested() {
                step = self.begin_cancellation(&fiber);
                continue;
            }
            iterations += 1;
            if iterations > threshold {
                tracing::trace!(fiber = %fiber.id(), "auto-yield");
                fiber.schedule(self, step);
                return;
            }

            step = match step {
                Step::Eval(node) => self.eval(node, &fiber),
                Step::Succeed(value) => self.succeed(value, &fiber),
                Step::Fail(error) => self.fail(error, &fiber),
                Step::Await(cell) => {
                    let cancelable = self.is_cancelable();
                    match fiber.suspend(self, Arc::clone(&cell), cancelable) {
                        Some(run_loop) => {
                            self = run_loop;
                            Step::Resumed(cell)
                        }
                        None => return,
                    }
                }
                Step::Resumed(cell) => match cell.take() {
                    Some(Ok(value)) => Step::Succeed(value),
                    Some(Err(error)) => Step::Fail(error),
                    None => Step::Await(cell),
                },
                Step::Yield(next) => {
                    fiber.schedule(self, *next);
                    return;
                }
                Step::Done => Step::Done,
            };
        }
    }

    fn eval(&mut self, node: Node, fiber: &RawFiber) -> Step {
        match node {
            Node::Pure(value) => Step::Succeed(value),
            Node::Fail(error) => Step::Fail(error),
            Node::Delay(thunk) => eval_guarded(thunk),
            Node::Map(source, function) => {
                self.stack.push_map(function);
                Step::Eval(source.into_inner())
            }
            Node::FlatMap(source, function) => {
                self.stack.push_flat_map(function);
                Step::Eval(source.into_inner())
            }
            Node::HandleErrorWith(source, handler) => {
                self.stack.push_handler(handler);
                Step::Eval(source.into_inner())
            }
            Node::Attempt(source, functions) => {
                self.stack.push_attempt(functions);
                Step::Eval(source.into_inner())
            }
            Node::Async(register) => {
                let callback = RawCallback::new(AsyncCell::new(), Arc::clone(fiber));
                eval_guarded(move || register(callback))
            }
            Node::Await(cell) => Step::Await(cell),
            Node::Uncancelable(body) => {
                self.masks += 1;
                let poll = Poll::new(fiber.id(), self.masks);
                self.stack.push_marker(ContinuationTag::Uncancelable);
                eval_guarded(move || body(poll))
            }
            Node::Unmask { source, poll } => {
                if poll.fiber == fiber.id() && poll.depth == self.masks {
                    self.masks -= 1;
                    self.stack.push_marker(ContinuationTag::Unmask);
                }
                Step::Eval(source.into_inner())
            }
            Node::OnCancel(source, finalizer) => {
                self.finalizers.push(finalizer.into_inner());
                self.stack.push_marker(ContinuationTag::OnCancel);
                Step::Eval(source.into_inner())
            }
            Node::Canceled => {
                fiber.set_cancel_latch();
                Step::Succeed(Box::new(()))
            }
            Node::Cede => Step::Yield(Box::new(Step::Succeed(Box::new(())))),
            Node::Fork(source) => {
                let child = self.spawn(source.into_inner(), fiber);
                Step::Succeed(Box::new(child))
            }
            Node::RacePair(left, right) => {
                let left = self.spawn(left.into_inner(), fiber);
                let right = self.spawn(right.into_inner(), fiber);
                Step::Succeed(Box::new((left, right)))
            }
            Node::ReadRuntime => Step::Succeed(Box::new(self.runtime.clone())),
        }
    }

    fn spawn(&self, node: Node, parent: &RawFiber) -> RawFiber {
        let child = FiberShared::new(self.runtime.clone());
        tracing::trace!(parent = %parent.id(), child = %child.id(), "fork");
        child.start(node);
        child
    }

    fn succeed(&mut self, value: Value, fiber: &RawFiber) -> Step {
        let Some(frame) = self.stack.pop() else {
            fiber.complete(Outcome::Succeeded(value));
            return Step::Done;
        };
        match frame.transform {
            Some(Transform::Map(function)) => {
                guarded(move || function(value)).map_or_else(Step::Fail, Step::Succeed)
            }
            Some(Transform::FlatMap(function)) => eval_guarded(move || function(value)),
            Some(Transform::Handler(_)) => Step::Succeed(value),
            Some(Transform::Attempt(functions)) => Step::Succeed((functions.on_success)(value)),
            None if frame.tag == ContinuationTag::CancelationLoop => self.next_finalizer(fiber),
            None => {
                self.exit_marker(frame.tag);
                Step::Succeed(value)
            }
        }
    }

    fn fail(&mut self, error: IoError, fiber: &RawFiber) -> Step {
        loop {
            let Some(frame) = self.stack.pop() else {
                tracing::debug!(fiber = %fiber.id(), %error, "fiber failed");
                fiber.complete(Outcome::Errored(error));
                return Step::Done;
            };
            match frame.transform {
                Some(Transform::Handler(handler)) => {
                    return eval_guarded(move || handler(error));
                }
                Some(Transform::Attempt(functions)) => {
                    return Step::Succeed((functions.on_error)(error));
                }
                Some(Transform::Map(_) | Transform::FlatMap(_)) => {}
                None if frame.tag == ContinuationTag::CancelationLoop => {
                    self.report_finalizer_error(fiber, &error);
                    return self.next_finalizer(fiber);
                }
                None => self.exit_marker(frame.tag),
            }
        }
    }

    fn exit_marker(&mut self, tag: ContinuationTag) {
        match tag {
            ContinuationTag::OnCancel => {
                self.finalizers.pop();
            }
            ContinuationTag::Uncancelable => self.masks -= 1,
            ContinuationTag::Unmask => self.masks += 1,
            _ => {}
        }
    }

    fn begin_cancellation(&mut self, fiber: &RawFiber) -> Step {
        tracing::debug!(
            fiber = %fiber.id(),
            finalizers = self.finalizers.len(),
            "fiber canceling"
        );
        self.canceling = true;
        self.masks += 1;
        self.stack.clear();
        self.next_finalizer(fiber)
    }

    fn next_finalizer(&mut self, fiber: &RawFiber) -> Step {
        match self.finalizers.pop() {
            Some(finalizer) => {
                self.stack.push_marker(ContinuationTag::CancelationLoop);
                Step::Eval(finalizer)
            }
            None => {
                fiber.complete(Outcome::Canceled);
                Step::Done
            }
        }
    }

    fn report_finalizer_error(&mut self, fiber: &RawFiber, error: &IoError) {
        self.finalizer_errors += 1;
        if self.finalizer_errors <= self.runtime.config().max_finalizer_errors_logged {
            self.runtime.context().report_failure(error);
        } else {
            tracing::debug!(fiber = %fiber.id(), %error, "finalizer failure not reported");
        }
    }
}
