//! The interpreter's continuation stack.
//!
//! Two parallel stacks are kept:
//!
//! - a stack of [`ContinuationTag`]s, one per pending frame, naming what the
//!   frame does when a value or an error reaches it
//! - a stack of [`Transform`]s holding the functions of the frames that
//!   carry one (map, bind, error handler, attempt wrapper)
//!
//! Frames such as `Uncancelable` or `OnCancel` only adjust interpreter state
//! when popped and have a tag but no transform.
//!
//! # Invariants
//!
//! - Every `Map`, `FlatMap`, `HandleErrorWith` and `Attempt` tag has exactly
//!   one matching transform, pushed and popped together.
//! - Popping never allocates; tags live inline up to [`INLINE_TAGS`].

use smallvec::SmallVec;

use super::algebra::{AttemptFns, BindFn, HandlerFn, MapFn};

/// Tags kept inline before the stack spills to the heap.
pub(crate) const INLINE_TAGS: usize = 32;

/// The kind of a pending frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContinuationTag {
    Map,
    FlatMap,
    HandleErrorWith,
    Attempt,
    /// Pops the innermost registered cancellation finalizer.
    OnCancel,
    /// Leaves a masked region.
    Uncancelable,
    /// Leaves a region unmasked by `poll`.
    Unmask,
    /// Runs the next cancellation finalizer.
    CancelationLoop,
}

impl ContinuationTag {
    const fn has_transform(self) -> bool {
        matches!(
            self,
            Self::Map | Self::FlatMap | Self::HandleErrorWith | Self::Attempt
        )
    }
}

/// The function carried by a frame.
pub(crate) enum Transform {
    Map(MapFn),
    FlatMap(BindFn),
    Handler(HandlerFn),
    Attempt(AttemptFns),
}

/// A popped frame: its tag, and its function if it has one.
pub(crate) struct Frame {
    pub(crate) tag: ContinuationTag,
    pub(crate) transform: Option<Transform>,
}

/// The continuation stack of one run loop.
///
/// # Note
///
/// Not `Clone`: a stack belongs to exactly one run loop, and moves with it
/// across suspensions.
#[derive(Default)]
pub(crate) struct ContinuationStack {
    tags: SmallVec<[ContinuationTag; INLINE_TAGS]>,
    transforms: Vec<Transform>,
}

impl ContinuationStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_map(&mut self, function: MapFn) {
        self.tags.push(ContinuationTag::Map);
        self.transforms.push(Transform::Map(function));
    }

    pub(crate) fn push_flat_map(&mut self, function: BindFn) {
        self.tags.push(ContinuationTag::FlatMap);
        self.transforms.push(Transform::FlatMap(function));
    }

    pub(crate) fn push_handler(&mut self, handler: HandlerFn) {
        self.tags.push(ContinuationTag::HandleErrorWith);
        self.transforms.push(Transform::Handler(handler));
    }

    pub(crate) fn push_attempt(&mut self, functions: AttemptFns) {
        self.tags.push(ContinuationTag::Attempt);
        self.transforms.push(Transform::Attempt(functions));
    }

    /// Pushes a frame that carries no function.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `tag` is a kind that needs a transform.
    pub(crate) fn push_marker(&mut self, tag: ContinuationTag) {
        debug_assert!(!tag.has_transform(), "{tag:?} frames carry a transform");
        self.tags.push(tag);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        let tag = self.tags.pop()?;
        let transform = if tag.has_transform() {
            Some(
                self.transforms
                    .pop()
                    .expect("Internal error: continuation stacks out of sync"),
            )
        } else {
            None
        };
        Some(Frame { tag, transform })
    }

    /// Drops every pending frame.
    pub(crate) fn clear(&mut self) {
        self.tags.clear();
        self.transforms.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.tags.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
