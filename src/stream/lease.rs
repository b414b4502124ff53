use std::fmt;

use super::ScopedResource;
use crate::effect::{CompositeFailure, IO, IoError, traverse};

/// A borrow of one or more scoped resources.
///
/// While a lease is held, closing the owning scope still marks its resources
/// released but defers their finalizers. The borrower must call
/// [`Lease::cancel`]; a lease that is simply dropped keeps its resources
/// alive until the process ends.
#[must_use = "a lease must be canceled to release its resources"]
pub struct Lease {
    resources: Vec<ScopedResource>,
}

impl Lease {
    pub(crate) const fn new(resources: Vec<ScopedResource>) -> Self {
        Self { resources }
    }

    /// Number of resources covered by the lease.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if no open resource was found when the lease was taken.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Gives up the lease, running the finalizers of resources whose scope
    /// already closed. Every finalizer runs even if an earlier one fails;
    /// failures are combined into one error.
    pub fn cancel(self) -> IO<Result<(), IoError>> {
        traverse(self.resources, |resource| resource.cancel_lease()).fmap(|results| {
            let errors = results.into_iter().filter_map(Result::err).collect();
            CompositeFailure::from_errors(errors).map_or(Ok(()), Err)
        })
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Lease")
            .field("resources", &self.resources.len())
            .finish()
    }
}
