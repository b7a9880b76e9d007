//! Execution-context registry contract.

use crate::context::holder::{downcast_holder, BoundResource, ResourceHolder};
use crate::context::synchronization::TransactionSynchronization;
use crate::error::BridgeResult;
use crate::types::ResourceKey;
use std::sync::Arc;

/// Shared handle to the registry of one logical unit of execution.
pub type ContextHandle = Arc<dyn ContextRegistry>;

/// Per-unit-of-execution store of bound resources and synchronizations.
///
/// The bridge never looks up ambient state on its own: callers pass the
/// registry of their unit of execution explicitly. Two registries never
/// observe each other's bindings.
///
/// # Invariants
///
/// - At most one resource is bound per key.
/// - Synchronizations can only be registered while synchronization is
///   active, and are returned in [`crate::SynchronizationOrder`] order.
///
/// # Implementors
///
/// - [`super::ExecutionContext`] - in-memory implementation
pub trait ContextRegistry: Send + Sync {
    /// Returns the resource bound under `key`.
    fn get_resource(&self, key: &ResourceKey) -> Option<Arc<dyn BoundResource>>;

    /// Returns true if a resource is bound under `key`.
    fn has_resource(&self, key: &ResourceKey) -> bool {
        self.get_resource(key).is_some()
    }

    /// Binds `resource` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BridgeError::AlreadyBound`] if the key is taken.
    fn bind_resource(&self, key: ResourceKey, resource: Arc<dyn BoundResource>)
        -> BridgeResult<()>;

    /// Unbinds and returns the resource under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BridgeError::NotBound`] if nothing is bound.
    fn unbind_resource(&self, key: &ResourceKey) -> BridgeResult<Arc<dyn BoundResource>>;

    /// Unbinds the resource under `key` if there is one.
    ///
    /// Returns whether something was unbound.
    fn unbind_resource_if_possible(&self, key: &ResourceKey) -> bool;

    /// Registers a synchronization for the current transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BridgeError::SynchronizationInactive`] if
    /// synchronization is not active.
    fn register_synchronization(
        &self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> BridgeResult<()>;

    /// Returns true if synchronizations can be registered.
    fn is_synchronization_active(&self) -> bool;

    /// Returns true if a real transaction (not just a synchronization
    /// scope) is active.
    fn is_actual_transaction_active(&self) -> bool;

    /// Returns true if the current transaction is read-only.
    fn is_current_transaction_read_only(&self) -> bool {
        false
    }

    /// Returns true if the current transaction has been marked
    /// rollback-only.
    fn is_rollback_only(&self) -> bool {
        false
    }
}

/// Looks up a holder of a concrete resource type.
///
/// Returns `None` if nothing is bound or the bound holder has another type.
pub fn lookup_holder<R: Send + Sync + 'static>(
    registry: &dyn ContextRegistry,
    key: &ResourceKey,
) -> Option<Arc<ResourceHolder<R>>> {
    registry.get_resource(key).and_then(downcast_holder::<R>)
}
