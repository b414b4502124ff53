use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Lease;
use crate::effect::{ExitCase, IO, IoError};

/// Release action registered for an acquired resource.
pub(crate) type Finalizer = Box<dyn FnOnce(ExitCase) -> IO<()> + Send + 'static>;

struct ResourceState {
    open: bool,
    finalizer: Option<Finalizer>,
    leases: usize,
}

impl ResourceState {
    /// Released by its scope and no longer leased by anyone.
    const fn is_finished(&self) -> bool {
        !self.open && self.leases == 0
    }
}

/// A resource registered in a [`Scope`](super::Scope).
///
/// The finalizer runs once, when the owning scope has released the resource
/// and every [`Lease`] on it has been canceled, whichever comes last.
#[derive(Clone)]
pub struct ScopedResource {
    state: Arc<Mutex<ResourceState>>,
}

impl ScopedResource {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ResourceState {
                open: true,
                finalizer: None,
                leases: 0,
            })),
        }
    }

    /// Installs the finalizer of a freshly acquired value.
    ///
    /// Produces `Ok(false)` after running the finalizer immediately if the
    /// resource was already released, and `Err` if that finalizer failed.
    pub(crate) fn acquired(&self, finalizer: Finalizer) -> IO<Result<bool, IoError>> {
        let state = Arc::clone(&self.state);
        IO::defer(move || {
            let mut guard = state.lock();
            if guard.is_finished() {
                drop(guard);
                finalizer(ExitCase::Canceled)
                    .attempt()
                    .fmap(|released| released.map(|()| false))
            } else {
                guard.finalizer = Some(finalizer);
                IO::pure(Ok(true))
            }
        })
    }

    /// Marks the resource released by its scope.
    ///
    /// Runs the finalizer with `exit_case` unless leases are outstanding, in
    /// which case the last [`Lease::cancel`] runs it with
    /// [`ExitCase::Succeeded`].
    pub fn release(&self, exit_case: ExitCase) -> IO<Result<(), IoError>> {
        let state = Arc::clone(&self.state);
        IO::defer(move || {
            let finalizer = {
                let mut guard = state.lock();
                guard.open = false;
                if guard.leases == 0 {
                    guard.finalizer.take()
                } else {
                    None
                }
            };
            run_finalizer(finalizer, exit_case)
        })
    }

    /// Leases this resource alone. `None` once it has been released.
    pub fn lease(&self) -> IO<Option<Lease>> {
        let resource = self.clone();
        IO::delay(move || {
            resource
                .try_lease()
                .then(|| Lease::new(vec![resource]))
        })
    }

    pub(crate) fn try_lease(&self) -> bool {
        let mut guard = self.state.lock();
        if guard.open {
            guard.leases += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel_lease(&self) -> IO<Result<(), IoError>> {
        let state = Arc::clone(&self.state);
        IO::defer(move || {
            let finalizer = {
                let mut guard = state.lock();
                guard.leases = guard.leases.saturating_sub(1);
                if guard.is_finished() {
                    guard.finalizer.take()
                } else {
                    None
                }
            };
            run_finalizer(finalizer, ExitCase::Succeeded)
        })
    }

    /// Returns `true` until the owning scope releases the resource.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Number of leases not yet canceled.
    pub fn outstanding_leases(&self) -> usize {
        self.state.lock().leases
    }
}

fn run_finalizer(finalizer: Option<Finalizer>, exit_case: ExitCase) -> IO<Result<(), IoError>> {
    match finalizer {
        Some(finalizer) => finalizer(exit_case).attempt(),
        None => IO::pure(Ok(())),
    }
}

impl fmt::Debug for ScopedResource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        formatter
            .debug_struct("ScopedResource")
            .field("open", &state.open)
            .field("leases", &state.leases)
            .field("finalized", &(state.is_finished() && state.finalizer.is_none()))
            .finish()
    }
}
