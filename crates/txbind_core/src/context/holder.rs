//! Reference-counted resource holders.

use crate::error::{BridgeError, BridgeResult};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mutable bookkeeping shared by every holder.
#[derive(Debug, Default, Clone, Copy)]
struct HolderState {
    reference_count: usize,
    synchronized_with_transaction: bool,
    rollback_only: bool,
    deadline: Option<Instant>,
    void: bool,
}

/// Wraps a bound resource with reference counting and transaction flags.
///
/// The same holder is reachable from the execution context and from the
/// synchronization that will clean it up, so it is shared through `Arc`
/// and its bookkeeping sits behind a mutex.
///
/// # Invariants
///
/// - `reference_count == 0 && !synchronized_with_transaction` means the
///   holder is unbound and may be dropped.
/// - Only the session manager increments/decrements the count; only
///   completion callbacks call [`ResourceHolder::reset`].
pub struct ResourceHolder<R> {
    resource: R,
    state: Mutex<HolderState>,
}

impl<R> ResourceHolder<R> {
    /// Creates an unreferenced, unsynchronized holder.
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            state: Mutex::new(HolderState::default()),
        }
    }

    /// Returns the wrapped resource.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Increments the reference count, returning the new value.
    pub fn requested(&self) -> usize {
        let mut state = self.state.lock();
        state.reference_count += 1;
        state.reference_count
    }

    /// Decrements the reference count, returning the new value.
    pub fn released(&self) -> usize {
        let mut state = self.state.lock();
        state.reference_count = state.reference_count.saturating_sub(1);
        state.reference_count
    }

    /// Returns the current reference count.
    pub fn reference_count(&self) -> usize {
        self.state.lock().reference_count
    }

    /// Returns true while at least one caller still holds the resource.
    pub fn is_open(&self) -> bool {
        self.reference_count() > 0
    }

    /// Marks the holder as synchronized with the ambient transaction.
    pub fn set_synchronized_with_transaction(&self, value: bool) {
        self.state.lock().synchronized_with_transaction = value;
    }

    /// Returns whether the holder is synchronized with a transaction.
    pub fn is_synchronized_with_transaction(&self) -> bool {
        self.state.lock().synchronized_with_transaction
    }

    /// Marks the resource's transaction as rollback-only.
    pub fn set_rollback_only(&self) {
        self.state.lock().rollback_only = true;
    }

    /// Returns whether the resource's transaction is rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }

    /// Sets a deadline `timeout` from now.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn set_timeout(&self, timeout: Duration) {
        self.state.lock().deadline = Instant::now().checked_add(timeout);
    }

    /// Sets an absolute deadline.
    pub fn set_deadline(&self, deadline: Instant) {
        self.state.lock().deadline = Some(deadline);
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.lock().deadline
    }

    /// Returns whether a deadline is set.
    pub fn has_timeout(&self) -> bool {
        self.deadline().is_some()
    }

    /// Returns the time left before the deadline.
    ///
    /// `Ok(None)` means no deadline is set. A passed deadline marks the
    /// holder rollback-only and fails with
    /// [`BridgeError::TransactionTimedOut`].
    pub fn time_to_live(&self) -> BridgeResult<Option<Duration>> {
        let mut state = self.state.lock();
        let Some(deadline) = state.deadline else {
            return Ok(None);
        };
        let now = Instant::now();
        if now >= deadline {
            state.rollback_only = true;
            return Err(BridgeError::TransactionTimedOut {
                overrun: now - deadline,
            });
        }
        Ok(Some(deadline - now))
    }

    /// Returns true if nothing references the holder and it is not
    /// synchronized with a transaction.
    pub fn is_eligible_for_removal(&self) -> bool {
        let state = self.state.lock();
        state.reference_count == 0 && !state.synchronized_with_transaction
    }

    /// Clears transactional state after completion.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.reference_count = 0;
        state.synchronized_with_transaction = false;
        state.rollback_only = false;
        state.deadline = None;
    }

    /// Marks the holder as permanently unbound.
    pub fn unbound(&self) {
        self.state.lock().void = true;
    }

    /// Returns whether the holder was permanently unbound.
    pub fn is_void(&self) -> bool {
        self.state.lock().void
    }
}

impl<R: fmt::Debug> fmt::Debug for ResourceHolder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("ResourceHolder")
            .field("resource", &self.resource)
            .field("reference_count", &state.reference_count)
            .field("synchronized", &state.synchronized_with_transaction)
            .field("rollback_only", &state.rollback_only)
            .finish()
    }
}

/// Type-erased view of a holder stored in an execution context.
///
/// Contexts hold heterogeneous holders (sessions, connections); callers
/// recover the concrete type with [`downcast_holder`].
pub trait BoundResource: Any + Send + Sync {
    /// Converts into `Any` for downcasting.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Returns true if nothing references the holder.
    fn is_eligible_for_removal(&self) -> bool;

    /// Marks the holder as permanently unbound.
    fn unbound(&self);

    /// Returns whether the holder was permanently unbound.
    fn is_void(&self) -> bool;
}

impl<R: Send + Sync + 'static> BoundResource for ResourceHolder<R> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn is_eligible_for_removal(&self) -> bool {
        ResourceHolder::is_eligible_for_removal(self)
    }

    fn unbound(&self) {
        ResourceHolder::unbound(self);
    }

    fn is_void(&self) -> bool {
        ResourceHolder::is_void(self)
    }
}

/// Recovers the concrete holder type from a bound resource.
pub fn downcast_holder<R: Send + Sync + 'static>(
    resource: Arc<dyn BoundResource>,
) -> Option<Arc<ResourceHolder<R>>> {
    resource.into_any().downcast::<ResourceHolder<R>>().ok()
}
