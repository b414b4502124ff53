use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::scoped_resource::Finalizer;
use super::{InterruptContext, InterruptionOutcome, Lease, ScopedResource};
use crate::control::Either;
use crate::effect::{
    CompositeFailure, ExitCase, Fiber, IO, IoError, Outcome, Poll, RuntimeError, traverse,
};

// =============================================================================
// ScopeId
// =============================================================================

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "scope-{}", self.0)
    }
}

// =============================================================================
// Scope
// =============================================================================

enum State {
    Open {
        /// In acquisition order.
        resources: Vec<ScopedResource>,
        /// In opening order.
        children: Vec<Scope>,
    },
    Closed,
}

struct ScopeInner {
    id: ScopeId,
    level: u32,
    parent: Option<Weak<ScopeInner>>,
    interrupt: Option<InterruptContext>,
    state: Mutex<State>,
}

/// A node of the resource scope tree.
///
/// A scope owns the resources acquired in it and the child scopes opened
/// from it. Parents are referenced weakly; ownership flows from the root
/// down. Closing a scope closes its children newest first, then releases
/// its own resources in reverse acquisition order.
///
/// # Examples
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use strand::effect::{ExitCase, IO, Outcome, TestContext};
/// use strand::stream::Scope;
///
/// let context = TestContext::new();
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let root = Scope::new_root();
///
/// for name in ["a", "b", "c"] {
///     let log = Arc::clone(&log);
///     context.run(root.acquire_resource(
///         move |_| IO::pure(name),
///         move |name, _| IO::delay(move || log.lock().unwrap().push(name)),
///     ));
/// }
///
/// assert_eq!(context.run(root.close(ExitCase::Succeeded)), Some(Outcome::Succeeded(Ok(()))));
/// assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

static_assertions::assert_impl_all!(Scope: Send, Sync);

impl Scope {
    /// Creates a root scope: no parent and no interruption.
    pub fn new_root() -> Self {
        Self::from_parts(ScopeId::next(), None, None)
    }

    fn from_parts(id: ScopeId, parent: Option<&Self>, interrupt: Option<InterruptContext>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id,
                level: parent.map_or(0, |parent| parent.inner.level + 1),
                parent: parent.map(|parent| Arc::downgrade(&parent.inner)),
                interrupt,
                state: Mutex::new(State::Open {
                    resources: Vec::new(),
                    children: Vec::new(),
                }),
            }),
        }
    }

    // =========================================================================
    // Identity and lineage
    // =========================================================================

    /// Identity of this scope.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Returns `true` for a scope created with [`Scope::new_root`].
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Distance from the root; the root is level 0.
    pub fn level(&self) -> u32 {
        self.inner.level
    }

    /// The parent scope, if it is still alive.
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Ancestors from the parent up to the root.
    fn ancestors(&self) -> Vec<Self> {
        std::iter::successors(self.parent(), Self::parent).collect()
    }

    /// Returns `true` until the scope is closed.
    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Open { .. })
    }

    /// The interrupt context, present if this scope or an ancestor was
    /// opened as interruptible.
    pub fn interrupt_context(&self) -> Option<&InterruptContext> {
        self.inner.interrupt.as_ref()
    }

    fn children(&self) -> Option<Vec<Self>> {
        match &*self.inner.state.lock() {
            State::Open { children, .. } => Some(children.clone()),
            State::Closed => None,
        }
    }

    fn resources(&self) -> Vec<ScopedResource> {
        match &*self.inner.state.lock() {
            State::Open { resources, .. } => resources.clone(),
            State::Closed => Vec::new(),
        }
    }

    /// This scope and every open descendant, breadth first.
    fn subtree(&self) -> Vec<Self> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([self.clone()]);
        while let Some(scope) = queue.pop_front() {
            queue.extend(scope.children().unwrap_or_default());
            found.push(scope);
        }
        found
    }

    fn find_self_or_child_now(&self, id: ScopeId) -> Option<Self> {
        self.subtree().into_iter().find(|scope| scope.id() == id)
    }

    fn find_self_or_ancestor(&self, id: ScopeId) -> Option<Self> {
        std::iter::successors(Some(self.clone()), Self::parent).find(|scope| scope.id() == id)
    }

    /// Searches this scope and its descendants for `id`.
    pub fn find_self_or_child(&self, id: ScopeId) -> IO<Option<Self>> {
        let scope = self.clone();
        IO::delay(move || scope.find_self_or_child_now(id))
    }

    /// Searches descendants, then ancestors, for `id`.
    pub fn find_in_lineage(&self, id: ScopeId) -> IO<Option<Self>> {
        let scope = self.clone();
        IO::delay(move || {
            scope
                .find_self_or_child_now(id)
                .or_else(|| scope.find_self_or_ancestor(id))
        })
    }

    /// Locates the scope a stream step should resume in: this scope, a
    /// descendant of its parent, or failing that any scope in the tree.
    pub fn find_step_scope(&self, id: ScopeId) -> IO<Option<Self>> {
        let scope = self.clone();
        IO::delay(move || {
            if scope.id() == id {
                return Some(scope);
            }
            let Some(parent) = scope.parent() else {
                return scope.find_self_or_child_now(id);
            };
            parent.find_self_or_child_now(id).or_else(|| {
                let root = scope.ancestors().pop().unwrap_or(parent);
                root.find_self_or_child_now(id)
            })
        })
    }

    /// Returns `true` if `id` is this scope or one of its ancestors.
    pub fn descends_from(&self, id: ScopeId) -> bool {
        self.find_self_or_ancestor(id).is_some()
    }

    /// The nearest ancestor that is still open, or the root if every
    /// ancestor is closed.
    pub fn open_ancestor(&self) -> IO<Self> {
        let scope = self.clone();
        IO::delay(move || {
            let mut current = scope;
            while let Some(parent) = current.parent() {
                if parent.is_open() {
                    return parent;
                }
                current = parent;
            }
            current
        })
    }

    // =========================================================================
    // Opening and closing
    // =========================================================================

    /// Opens a child scope.
    ///
    /// An interruptible child can be interrupted with
    /// [`Scope::interrupt_when`] and is interrupted along with any
    /// interruptible ancestor. If this scope has already closed, the child is
    /// opened in the nearest ancestor instead; a closed root yields
    /// [`RuntimeError::ReopenClosedScope`].
    pub fn open(&self, interruptible: bool) -> IO<Result<Self, IoError>> {
        let scope = self.clone();
        let id = ScopeId::next();
        let interrupt = match &self.inner.interrupt {
            Some(parent) => parent.child_context(interruptible, id).fmap(Some),
            None if interruptible => IO::delay(move || Some(InterruptContext::new(id))),
            None => IO::pure(None),
        };
        interrupt.flat_map(move |interrupt| {
            let child = Self::from_parts(id, Some(&scope), interrupt);
            scope.register_child(child.clone()).flat_map(move |registered| {
                if registered {
                    tracing::debug!(scope = %child.id(), parent = %scope.id(), interruptible, "scope opened");
                    return IO::pure(Ok(child));
                }
                let unused = child.cancel_parent_watcher();
                match scope.parent() {
                    Some(parent) => unused.then(parent.open(interruptible)),
                    None => unused.then(IO::pure(Err(RuntimeError::ReopenClosedScope.into()))),
                }
            })
        })
    }

    fn register_child(&self, child: Self) -> IO<bool> {
        let scope = self.clone();
        IO::delay(move || match &mut *scope.inner.state.lock() {
            State::Open { children, .. } => {
                children.push(child);
                true
            }
            State::Closed => false,
        })
    }

    fn register_resource(&self, resource: ScopedResource) -> IO<bool> {
        let scope = self.clone();
        IO::delay(move || match &mut *scope.inner.state.lock() {
            State::Open { resources, .. } => {
                resources.push(resource);
                true
            }
            State::Closed => false,
        })
    }

    fn unregister_child(&self, id: ScopeId) -> IO<()> {
        let scope = self.clone();
        IO::delay(move || {
            if let State::Open { children, .. } = &mut *scope.inner.state.lock() {
                children.retain(|child| child.id() != id);
            }
        })
    }

    fn cancel_parent_watcher(&self) -> IO<()> {
        self.inner
            .interrupt
            .as_ref()
            .map_or_else(IO::unit, InterruptContext::cancel_parent)
    }

    /// Closes the scope. Only the first call has an effect.
    ///
    /// Child scopes are closed newest first, then this scope's resources are
    /// released newest first, each with `exit_case`. Every finalizer runs even
    /// if an earlier one fails; failures are combined into one error. Finally
    /// the scope stops following its parent's interruption and leaves its
    /// parent. The close itself cannot be canceled.
    pub fn close(&self, exit_case: ExitCase) -> IO<Result<(), IoError>> {
        let scope = self.clone();
        IO::uncancelable(move |_| {
            IO::defer(move || {
                let previous = std::mem::replace(&mut *scope.inner.state.lock(), State::Closed);
                let State::Open { resources, children } = previous else {
                    return IO::pure(Ok(()));
                };
                tracing::debug!(
                    scope = %scope.id(),
                    ?exit_case,
                    children = children.len(),
                    resources = resources.len(),
                    "closing scope"
                );
                let child_exit = exit_case.clone();
                let closed_children = traverse(
                    children.into_iter().rev().collect(),
                    move |child: Self| child.close(child_exit.clone()),
                );
                let released = traverse(
                    resources.into_iter().rev().collect(),
                    move |resource: ScopedResource| resource.release(exit_case.clone()),
                );
                closed_children.flat_map(move |child_results| {
                    released.flat_map(move |resource_results| {
                        let detach = match scope.parent() {
                            Some(parent) => parent.unregister_child(scope.id()),
                            None => IO::unit(),
                        };
                        scope.cancel_parent_watcher().then(detach).fmap(move |()| {
                            let errors: Vec<IoError> = child_results
                                .into_iter()
                                .chain(resource_results)
                                .filter_map(Result::err)
                                .collect();
                            if !errors.is_empty() {
                                tracing::warn!(failures = errors.len(), "finalizers failed while closing scope");
                            }
                            CompositeFailure::from_errors(errors).map_or(Ok(()), Err)
                        })
                    })
                })
            })
        })
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Acquires a resource into this scope.
    ///
    /// `acquire` runs uncancelably, except for what it wraps with the given
    /// [`Poll`]. Once it produces a value, `release` is registered as the
    /// value's finalizer. If the scope closed in the meantime, the value is
    /// released right away with [`ExitCase::Canceled`] and the result is
    /// `Errored` with [`RuntimeError::AcquireAfterClose`].
    ///
    /// The result is `Succeeded(Right(value))` on success,
    /// `Succeeded(Left(id))` if the scope was interrupted by the scope `id`,
    /// `Errored` if acquisition failed and `Canceled` if it was canceled.
    ///
    /// An acquisition already in flight when the scope is interrupted runs
    /// to completion first. Its resource stays in this scope and is released
    /// by [`Scope::close`] with the exit case passed there.
    pub fn acquire_resource<R, A, F>(
        &self,
        acquire: A,
        release: F,
    ) -> IO<Outcome<Either<ScopeId, R>>>
    where
        R: Clone + Send + 'static,
        A: FnOnce(Poll) -> IO<R> + Send + 'static,
        F: FnOnce(R, ExitCase) -> IO<()> + Send + 'static,
    {
        let scope = self.clone();
        let acquisition = IO::uncancelable(move |poll| {
            let resource = ScopedResource::new();
            acquire(poll).attempt().flat_map(move |acquired| match acquired {
                Err(error) => IO::pure(Err(error)),
                Ok(value) => {
                    let handle = value.clone();
                    let finalizer: Finalizer =
                        Box::new(move |exit_case| release(handle, exit_case));
                    resource
                        .acquired(finalizer)
                        .flat_map(move |installed| match installed {
                            Err(error) => IO::pure(Err(error)),
                            Ok(false) => IO::pure(Err(RuntimeError::AcquireAfterClose.into())),
                            Ok(true) => register(scope, resource, value),
                        })
                }
            })
        });
        self.interruptible_eval(acquisition)
            .fmap(|evaluated| match evaluated {
                Either::Right(Ok(value)) => Outcome::Succeeded(Either::Right(value)),
                Either::Right(Err(error)) | Either::Left(InterruptionOutcome::Errored(error)) => {
                    Outcome::Errored(error)
                }
                Either::Left(InterruptionOutcome::Canceled) => Outcome::Canceled,
                Either::Left(InterruptionOutcome::Interrupted(id)) => {
                    Outcome::Succeeded(Either::Left(id))
                }
            })
    }

    /// Leases every open resource of this scope, its descendants and its
    /// ancestors.
    ///
    /// Fails with [`RuntimeError::ScopeClosed`] if this scope is closed.
    pub fn lease(&self) -> IO<Lease> {
        let scope = self.clone();
        IO::defer(move || {
            if !scope.is_open() {
                return IO::raise_error(RuntimeError::ScopeClosed);
            }
            let mut scopes = scope.subtree();
            scopes.extend(scope.ancestors());
            let leased = scopes
                .iter()
                .flat_map(Self::resources)
                .filter(ScopedResource::try_lease)
                .collect();
            IO::pure(Lease::new(leased))
        })
    }

    // =========================================================================
    // Interruption
    // =========================================================================

    /// Interrupts this scope once `signal` completes.
    ///
    /// A successful signal records [`InterruptionOutcome::Interrupted`] with
    /// the id of the scope that owns the interrupt context; a failed one
    /// records [`InterruptionOutcome::Errored`]. The signal runs on a new
    /// fiber, which is returned. Fails with
    /// [`RuntimeError::ScopeNotInterruptible`] if the scope has no interrupt
    /// context.
    pub fn interrupt_when(&self, signal: IO<Result<(), IoError>>) -> IO<Fiber<()>> {
        let Some(context) = self.inner.interrupt.clone() else {
            return IO::raise_error(RuntimeError::ScopeNotInterruptible);
        };
        let root = context.interrupt_root();
        signal
            .fmap(move |fired| match fired {
                Ok(()) => InterruptionOutcome::Interrupted(root),
                Err(error) => InterruptionOutcome::Errored(error),
            })
            .flat_map(move |outcome| context.complete(outcome))
            .fork()
    }

    /// The recorded interruption of this scope, if any.
    pub fn is_interrupted(&self) -> IO<Option<InterruptionOutcome>> {
        match &self.inner.interrupt {
            Some(context) => context.outcome(),
            None => IO::pure(None),
        }
    }

    /// Runs `io`, stopping early if the scope is interrupted.
    ///
    /// Without an interrupt context this only moves errors into the left
    /// side.
    pub fn interruptible_eval<A: Send + 'static>(
        &self,
        io: IO<A>,
    ) -> IO<Either<InterruptionOutcome, A>> {
        match &self.inner.interrupt {
            Some(context) => context.eval(io),
            None => io.redeem(
                |error| Either::Left(InterruptionOutcome::Errored(error)),
                Either::Right,
            ),
        }
    }
}

/// Registers a freshly acquired resource, releasing it at once if `scope`
/// has closed.
fn register<R: Send + 'static>(
    scope: Scope,
    resource: ScopedResource,
    value: R,
) -> IO<Result<R, IoError>> {
    scope
        .register_resource(resource.clone())
        .flat_map(move |registered| {
            if registered {
                return IO::pure(Ok(value));
            }
            tracing::debug!(scope = %scope.id(), "resource acquired after scope closed");
            resource.release(ExitCase::Canceled).fmap(|released| {
                let mut errors = vec![IoError::from(RuntimeError::AcquireAfterClose)];
                errors.extend(released.err());
                Err(CompositeFailure::from_errors(errors)
                    .unwrap_or_else(|| RuntimeError::AcquireAfterClose.into()))
            })
        })
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("level", &self.inner.level)
            .field("open", &self.is_open())
            .field("interruptible", &self.inner.interrupt.is_some())
            .finish()
    }
}
