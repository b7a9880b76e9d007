//! Execution-context registry.
//!
//! A context binds resources and completion callbacks to one logical unit
//! of execution (a request, a job, a nested transaction):
//! - [`ResourceHolder`] adds reference counting and transaction flags to
//!   any bound resource
//! - [`ContextRegistry`] is the contract the bridge consumes
//! - [`ExecutionContext`] is the in-memory implementation
//! - [`TransactionSynchronization`] callbacks are fired in
//!   [`SynchronizationOrder`]

mod execution;
mod holder;
mod registry;
mod synchronization;

pub use execution::{ExecutionContext, ResumeError, SuspendedScope};
pub use holder::{downcast_holder, BoundResource, ResourceHolder};
pub use registry::{lookup_holder, ContextHandle, ContextRegistry};
pub use synchronization::{CompletionStatus, SynchronizationOrder, TransactionSynchronization};
