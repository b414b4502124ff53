//! Synchronization primitives expressed as `IO` values.
//!
//! - [`Ref`]: a shared mutable cell with atomic `modify`
//! - [`Deferred`]: a single-assignment cell fibers can wait on
//! - [`Semaphore`]: a FIFO pool of permits
//! - [`CountDownLatch`]: a barrier built from `Ref` and `Deferred`
//!
//! None of them blocks a worker thread. Waiting always goes through an
//! asynchronous boundary, so waiting fibers can be canceled and other fibers
//! keep running on the same worker.

mod deferred;
mod latch;
mod ref_cell;
mod semaphore;

pub use deferred::Deferred;
pub use latch::CountDownLatch;
pub use ref_cell::Ref;
pub use semaphore::Semaphore;
