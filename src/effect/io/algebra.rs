//! The type-erased computation algebra interpreted by the run loop.
//!
//! `IO<A>` is a typed shell around a [`Node`]. Values travel through the
//! interpreter as `Box<dyn Any + Send>` and are downcast back to their
//! static type at the typed boundary, the same way the freer encoding erases
//! intermediate results.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::super::fiber::RawFiber;
use super::super::IoError;
use super::Poll;

/// A type-erased value produced by some node.
pub(crate) type Value = Box<dyn Any + Send>;

pub(crate) type Thunk = Box<dyn FnOnce() -> Node + Send>;
pub(crate) type MapFn = Box<dyn FnOnce(Value) -> Value + Send>;
pub(crate) type BindFn = Box<dyn FnOnce(Value) -> Node + Send>;
pub(crate) type HandlerFn = Box<dyn FnOnce(IoError) -> Node + Send>;
pub(crate) type RegisterFn = Box<dyn FnOnce(RawCallback) -> Node + Send>;
pub(crate) type BodyFn = Box<dyn FnOnce(Poll) -> Node + Send>;

/// Wraps the value of an attempted computation on either channel.
///
/// Plain function pointers instantiated per result type, so an attempt
/// frame costs no allocation.
#[derive(Clone, Copy)]
pub(crate) struct AttemptFns {
    pub(crate) on_success: fn(Value) -> Value,
    pub(crate) on_error: fn(IoError) -> Value,
}

/// One step of a computation description.
///
/// Nodes are inert data: nothing runs until the interpreter visits them.
/// Children live in [`NodeBox`]es, so dropping a node of any depth uses
/// constant native stack.
pub(crate) enum Node {
    Pure(Value),
    Fail(IoError),
    /// Runs the thunk and continues with the node it returns.
    Delay(Thunk),
    Map(NodeBox, MapFn),
    FlatMap(NodeBox, BindFn),
    HandleErrorWith(NodeBox, HandlerFn),
    Attempt(NodeBox, AttemptFns),
    /// Allocates a completion cell and continues with the registration node.
    Async(RegisterFn),
    /// Suspends until the cell has been completed.
    Await(Arc<AsyncCell>),
    Uncancelable(BodyFn),
    /// Evaluates `source` with the mask that was active outside the
    /// `Uncancelable` region identified by `poll`.
    Unmask {
        source: NodeBox,
        poll: Poll,
    },
    OnCancel(NodeBox, NodeBox),
    /// Sets the current fiber's cancellation latch.
    Canceled,
    Cede,
    Fork(NodeBox),
    /// Forks both sides and produces the pair of raw fibers.
    RacePair(NodeBox, NodeBox),
    ReadRuntime,
}

impl Node {
    pub(crate) fn unit() -> Self {
        Self::Pure(Box::new(()))
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Pure(_) => "Pure",
            Self::Fail(_) => "Fail",
            Self::Delay(_) => "Delay",
            Self::Map(..) => "Map",
            Self::FlatMap(..) => "FlatMap",
            Self::HandleErrorWith(..) => "HandleErrorWith",
            Self::Attempt(..) => "Attempt",
            Self::Async(_) => "Async",
            Self::Await(_) => "Await",
            Self::Uncancelable(_) => "Uncancelable",
            Self::Unmask { .. } => "Unmask",
            Self::OnCancel(..) => "OnCancel",
            Self::Canceled => "Canceled",
            Self::Cede => "Cede",
            Self::Fork(_) => "Fork",
            Self::RacePair(..) => "RacePair",
            Self::ReadRuntime => "ReadRuntime",
        }
    }
}

// =============================================================================
// NodeBox
// =============================================================================

/// An owned child node.
///
/// Left-associated chains nest one box per operator, so the derived drop
/// would recurse once per level. Dropping a `NodeBox` detaches the children
/// of every node it owns onto a local worklist instead.
pub(crate) struct NodeBox(Box<Node>);

impl NodeBox {
    pub(crate) fn new(node: Node) -> Self {
        Self(Box::new(node))
    }

    pub(crate) fn into_inner(mut self) -> Node {
        self.take()
    }

    /// Moves the node out, leaving a childless placeholder behind.
    fn take(&mut self) -> Node {
        std::mem::replace(&mut *self.0, Node::Canceled)
    }
}

fn detach_children(node: &mut Node, pending: &mut Vec<Node>) {
    match node {
        Node::Map(source, _)
        | Node::FlatMap(source, _)
        | Node::HandleErrorWith(source, _)
        | Node::Attempt(source, _)
        | Node::Unmask { source, .. }
        | Node::Fork(source) => pending.push(source.take()),
        Node::OnCancel(first, second) | Node::RacePair(first, second) => {
            pending.push(first.take());
            pending.push(second.take());
        }
        _ => {}
    }
}

impl Drop for NodeBox {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.0, &mut pending);
        while let Some(mut node) = pending.pop() {
            detach_children(&mut node, &mut pending);
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Downcasts an erased value to the type the typed layer put into it.
///
/// # Panics
///
/// Panics if the value has a different type, which means the typed layer
/// and the algebra disagree.
pub(crate) fn downcast<A: 'static>(value: Value) -> A {
    *value
        .downcast::<A>()
        .expect("Internal error: type mismatch in IO algebra")
}

// =============================================================================
// AsyncCell
// =============================================================================

enum CellState {
    Empty,
    Ready(Result<Value, IoError>),
    Taken,
}

/// The completion slot of one asynchronous boundary.
///
/// The first completion wins; later ones are rejected.
pub(crate) struct AsyncCell {
    state: Mutex<CellState>,
}

impl AsyncCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CellState::Empty),
        })
    }

    /// Stores `result` unless the cell was already completed.
    pub(crate) fn try_complete(&self, result: Result<Value, IoError>) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, CellState::Empty) {
            *state = CellState::Ready(result);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), CellState::Ready(_))
    }

    /// Takes the stored result, leaving the cell spent.
    pub(crate) fn take(&self) -> Option<Result<Value, IoError>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, CellState::Taken) {
            CellState::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }
}

// =============================================================================
// RawCallback
// =============================================================================

/// Completes one asynchronous boundary of one fiber.
///
/// Clones complete the same boundary; only the first call takes effect.
#[derive(Clone)]
pub(crate) struct RawCallback {
    cell: Arc<AsyncCell>,
    fiber: RawFiber,
}

impl RawCallback {
    pub(crate) const fn new(cell: Arc<AsyncCell>, fiber: RawFiber) -> Self {
        Self { cell, fiber }
    }

    pub(crate) fn cell(&self) -> Arc<AsyncCell> {
        Arc::clone(&self.cell)
    }

    pub(crate) fn complete(&self, result: Result<Value, IoError>) {
        self.fiber.resume(&self.cell, result);
    }
}
