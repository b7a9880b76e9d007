//! In-memory execution context.

use crate::context::holder::BoundResource;
use crate::context::registry::{ContextHandle, ContextRegistry};
use crate::context::synchronization::{CompletionStatus, TransactionSynchronization};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{ContextId, ResourceKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

type Synchronizations = Vec<Arc<dyn TransactionSynchronization>>;

#[derive(Default)]
struct ContextState {
    resources: HashMap<ResourceKey, Arc<dyn BoundResource>>,
    /// `None` while synchronization is inactive.
    synchronizations: Option<Synchronizations>,
    actual_transaction_active: bool,
    read_only: bool,
    rollback_only: bool,
    transaction_name: Option<String>,
}

/// Everything a suspended transaction scope had bound.
///
/// Returned by [`ExecutionContext::suspend`] and handed back to
/// [`ExecutionContext::resume`]. Scopes nest as a stack.
#[must_use = "a suspended scope must be resumed"]
pub struct SuspendedScope {
    resources: HashMap<ResourceKey, Arc<dyn BoundResource>>,
    synchronizations: Option<Synchronizations>,
    actual_transaction_active: bool,
    read_only: bool,
    rollback_only: bool,
    transaction_name: Option<String>,
}

impl SuspendedScope {
    /// Returns the number of resources held by the scope.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Returns the suspended transaction's name.
    #[must_use]
    pub fn transaction_name(&self) -> Option<&str> {
        self.transaction_name.as_deref()
    }
}

/// A scope [`ExecutionContext::resume`] refused, handed back with the reason.
#[derive(Debug, Error)]
#[error("could not resume suspended scope: {error}")]
pub struct ResumeError {
    /// Why the scope was refused.
    pub error: BridgeError,
    /// The untouched scope.
    pub scope: SuspendedScope,
}

impl ResumeError {
    /// Splits into the reason and the scope.
    pub fn into_parts(self) -> (BridgeError, SuspendedScope) {
        (self.error, self.scope)
    }
}

impl fmt::Debug for SuspendedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedScope")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field(
                "synchronizations",
                &self.synchronizations.as_ref().map(Vec::len),
            )
            .field("actual_transaction_active", &self.actual_transaction_active)
            .field("transaction_name", &self.transaction_name)
            .finish()
    }
}

/// The bindings of one logical unit of execution.
///
/// An `ExecutionContext` is created per request/job and passed explicitly
/// to the bridge. It stores bound resource holders, the ordered list of
/// synchronizations and the transaction flags, and it fires the
/// synchronization callbacks on behalf of whoever drives the transaction.
///
/// # Thread Safety
///
/// All state sits behind one mutex. Callbacks are fired on a snapshot of
/// the synchronization list with the lock released, so they may call back
/// into the context.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use txbind_core::{ContextRegistry, ExecutionContext};
///
/// let context = Arc::new(ExecutionContext::new());
/// context.init_synchronization().unwrap();
/// context.set_actual_transaction_active(true);
/// assert!(context.is_synchronization_active());
/// ```
pub struct ExecutionContext {
    id: ContextId,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    /// Creates an empty context with synchronization inactive.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            state: Mutex::new(ContextState::default()),
        }
    }

    /// Returns a shared registry handle to this context.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> ContextHandle {
        Arc::clone(self) as ContextHandle
    }

    /// Returns the context identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the number of bound resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Activates synchronization for a new transaction scope.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SynchronizationAlreadyActive`] if already active.
    pub fn init_synchronization(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.synchronizations.is_some() {
            return Err(BridgeError::SynchronizationAlreadyActive);
        }
        trace!(context = %self.id, "initializing transaction synchronization");
        state.synchronizations = Some(Vec::new());
        Ok(())
    }

    /// Deactivates synchronization, dropping registered callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SynchronizationInactive`] if not active.
    pub fn clear_synchronization(&self) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.synchronizations.take().is_none() {
            return Err(BridgeError::SynchronizationInactive);
        }
        trace!(context = %self.id, "clearing transaction synchronization");
        Ok(())
    }

    /// Returns a snapshot of the registered synchronizations, in order.
    #[must_use]
    pub fn synchronizations(&self) -> Vec<Arc<dyn TransactionSynchronization>> {
        self.state
            .lock()
            .synchronizations
            .clone()
            .unwrap_or_default()
    }

    /// Sets whether a real transaction is active.
    pub fn set_actual_transaction_active(&self, active: bool) {
        self.state.lock().actual_transaction_active = active;
    }

    /// Sets whether the current transaction is read-only.
    pub fn set_current_transaction_read_only(&self, read_only: bool) {
        self.state.lock().read_only = read_only;
    }

    /// Marks the current transaction rollback-only.
    pub fn set_rollback_only(&self) {
        self.state.lock().rollback_only = true;
    }

    /// Sets the current transaction's name.
    pub fn set_transaction_name(&self, name: Option<String>) {
        self.state.lock().transaction_name = name;
    }

    /// Returns the current transaction's name.
    #[must_use]
    pub fn transaction_name(&self) -> Option<String> {
        self.state.lock().transaction_name.clone()
    }

    /// Clears synchronization and transaction flags, keeping resources.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.synchronizations = None;
        state.actual_transaction_active = false;
        state.read_only = false;
        state.rollback_only = false;
        state.transaction_name = None;
    }

    /// Suspends the current scope.
    ///
    /// Every synchronization gets its `suspend` callback first (so it can
    /// unbind its own resources), then everything still bound is detached
    /// together with the synchronization list and flags. The context is
    /// left empty, ready for a nested scope.
    pub fn suspend(&self) -> SuspendedScope {
        let synchronizations = self.synchronizations();
        trace!(context = %self.id, count = synchronizations.len(), "suspending scope");
        for synchronization in &synchronizations {
            synchronization.suspend(self);
        }

        let mut state = self.state.lock();
        let taken = std::mem::take(&mut *state);
        SuspendedScope {
            resources: taken.resources,
            synchronizations: taken.synchronizations,
            actual_transaction_active: taken.actual_transaction_active,
            read_only: taken.read_only,
            rollback_only: taken.rollback_only,
            transaction_name: taken.transaction_name,
        }
    }

    /// Resumes a previously suspended scope.
    ///
    /// # Errors
    ///
    /// Fails with [`BridgeError::SynchronizationAlreadyActive`] if the
    /// nested scope has not been cleared, or [`BridgeError::AlreadyBound`]
    /// if one of the scope's keys was bound in the meantime. The context is
    /// left as it was and the scope comes back inside the [`ResumeError`],
    /// so the caller can clear the conflict and resume again.
    pub fn resume(&self, scope: SuspendedScope) -> Result<(), ResumeError> {
        let synchronizations = {
            let mut state = self.state.lock();
            let conflict = if state.synchronizations.is_some() {
                Some(BridgeError::SynchronizationAlreadyActive)
            } else {
                scope
                    .resources
                    .keys()
                    .find(|key| state.resources.contains_key(*key))
                    .map(|key| BridgeError::AlreadyBound { key: *key })
            };
            if let Some(error) = conflict {
                return Err(ResumeError { error, scope });
            }
            state.resources.extend(scope.resources);
            state.synchronizations = scope.synchronizations.clone();
            state.actual_transaction_active = scope.actual_transaction_active;
            state.read_only = scope.read_only;
            state.rollback_only = scope.rollback_only;
            state.transaction_name = scope.transaction_name;
            scope.synchronizations.unwrap_or_default()
        };

        trace!(context = %self.id, count = synchronizations.len(), "resuming scope");
        for synchronization in &synchronizations {
            synchronization.resume(self);
        }
        Ok(())
    }

    /// Fires `before_commit` on every synchronization, in order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure.
    pub fn trigger_before_commit(&self, read_only: bool) -> BridgeResult<()> {
        for synchronization in self.synchronizations() {
            synchronization.before_commit(self, read_only)?;
        }
        Ok(())
    }

    /// Fires `before_completion` on every synchronization, in order.
    pub fn trigger_before_completion(&self) {
        for synchronization in self.synchronizations() {
            synchronization.before_completion(self);
        }
    }

    /// Fires `after_commit` on every synchronization, in order.
    pub fn trigger_after_commit(&self) {
        for synchronization in self.synchronizations() {
            synchronization.after_commit(self);
        }
    }

    /// Fires `after_completion` on every synchronization, in order.
    pub fn trigger_after_completion(&self, status: CompletionStatus) {
        trace!(context = %self.id, ?status, "triggering after completion");
        for synchronization in self.synchronizations() {
            synchronization.after_completion(self, status);
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("resources", &state.resources.keys().collect::<Vec<_>>())
            .field(
                "synchronizations",
                &state.synchronizations.as_ref().map(Vec::len),
            )
            .field("actual_transaction_active", &state.actual_transaction_active)
            .finish()
    }
}

impl ContextRegistry for ExecutionContext {
    fn get_resource(&self, key: &ResourceKey) -> Option<Arc<dyn BoundResource>> {
        let mut state = self.state.lock();
        let resource = Arc::clone(state.resources.get(key)?);
        if resource.is_void() {
            state.resources.remove(key);
            return None;
        }
        Some(resource)
    }

    fn bind_resource(
        &self,
        key: ResourceKey,
        resource: Arc<dyn BoundResource>,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state.resources.get(&key) {
            if !existing.is_void() {
                return Err(BridgeError::AlreadyBound { key });
            }
        }
        trace!(context = %self.id, %key, "binding resource");
        state.resources.insert(key, resource);
        Ok(())
    }

    fn unbind_resource(&self, key: &ResourceKey) -> BridgeResult<Arc<dyn BoundResource>> {
        let mut state = self.state.lock();
        match state.resources.remove(key) {
            Some(resource) if !resource.is_void() => {
                trace!(context = %self.id, %key, "unbound resource");
                Ok(resource)
            }
            _ => Err(BridgeError::NotBound { key: *key }),
        }
    }

    fn unbind_resource_if_possible(&self, key: &ResourceKey) -> bool {
        self.unbind_resource(key).is_ok()
    }

    fn register_synchronization(
        &self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> BridgeResult<()> {
        let mut state = self.state.lock();
        let synchronizations = state
            .synchronizations
            .as_mut()
            .ok_or(BridgeError::SynchronizationInactive)?;
        let order = synchronization.order();
        let position = synchronizations.partition_point(|existing| existing.order() <= order);
        synchronizations.insert(position, synchronization);
        Ok(())
    }

    fn is_synchronization_active(&self) -> bool {
        self.state.lock().synchronizations.is_some()
    }

    fn is_actual_transaction_active(&self) -> bool {
        self.state.lock().actual_transaction_active
    }

    fn is_current_transaction_read_only(&self) -> bool {
        self.state.lock().read_only
    }

    fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::holder::ResourceHolder;
    use crate::context::registry::lookup_holder;
    use crate::context::synchronization::SynchronizationOrder;
    use crate::types::{FactoryId, PoolId};

    struct Recorder {
        name: &'static str,
        order: SynchronizationOrder,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl TransactionSynchronization for Recorder {
        fn order(&self) -> SynchronizationOrder {
            self.order
        }

        fn before_completion(&self, _registry: &dyn ContextRegistry) {
            self.log.lock().push(self.name.to_string());
        }
    }

    fn factory_key(id: u64) -> ResourceKey {
        ResourceKey::Factory(FactoryId::new(id))
    }

    fn holder(value: &'static str) -> Arc<ResourceHolder<&'static str>> {
        Arc::new(ResourceHolder::new(value))
    }

    #[test]
    fn bind_then_get_returns_same_holder() {
        let context = ExecutionContext::new();
        let bound = holder("a");
        context.bind_resource(factory_key(1), bound.clone()).unwrap();

        let found = lookup_holder::<&'static str>(&context, &factory_key(1)).unwrap();
        assert!(Arc::ptr_eq(&bound, &found));
        assert_eq!(context.resource_count(), 1);
    }

    #[test]
    fn double_bind_fails() {
        let context = ExecutionContext::new();
        context.bind_resource(factory_key(1), holder("a")).unwrap();

        let result = context.bind_resource(factory_key(1), holder("b"));
        assert!(matches!(result, Err(BridgeError::AlreadyBound { .. })));
    }

    #[test]
    fn unbind_missing_fails_but_if_possible_does_not() {
        let context = ExecutionContext::new();
        assert!(matches!(
            context.unbind_resource(&factory_key(9)),
            Err(BridgeError::NotBound { .. })
        ));
        assert!(!context.unbind_resource_if_possible(&factory_key(9)));
    }

    #[test]
    fn void_holders_are_invisible() {
        let context = ExecutionContext::new();
        let bound = holder("a");
        context.bind_resource(factory_key(1), bound.clone()).unwrap();
        bound.unbound();

        assert!(context.get_resource(&factory_key(1)).is_none());
        context.bind_resource(factory_key(1), holder("b")).unwrap();
    }

    #[test]
    fn register_requires_active_synchronization() {
        let context = ExecutionContext::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync = Arc::new(Recorder {
            name: "a",
            order: SynchronizationOrder::LOWEST,
            log,
        });

        assert!(matches!(
            context.register_synchronization(sync.clone()),
            Err(BridgeError::SynchronizationInactive)
        ));
        context.init_synchronization().unwrap();
        context.register_synchronization(sync).unwrap();
        assert_eq!(context.synchronizations().len(), 1);
    }

    #[test]
    fn init_twice_fails() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        assert!(matches!(
            context.init_synchronization(),
            Err(BridgeError::SynchronizationAlreadyActive)
        ));
        context.clear_synchronization().unwrap();
        assert!(context.clear_synchronization().is_err());
    }

    #[test]
    fn callbacks_fire_in_order_with_stable_ties() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (name, order) in [
            ("late", SynchronizationOrder::LOWEST),
            ("connection", SynchronizationOrder::CONNECTION),
            ("first-tie", SynchronizationOrder::new(5)),
            ("session", SynchronizationOrder::CONNECTION.before()),
            ("second-tie", SynchronizationOrder::new(5)),
        ] {
            context
                .register_synchronization(Arc::new(Recorder {
                    name,
                    order,
                    log: Arc::clone(&log),
                }))
                .unwrap();
        }

        context.trigger_before_completion();
        assert_eq!(
            *log.lock(),
            vec!["first-tie", "second-tie", "session", "connection", "late"]
        );
    }

    #[test]
    fn suspend_detaches_everything_and_resume_restores() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        context.set_actual_transaction_active(true);
        context.set_transaction_name(Some("outer".into()));
        let bound = holder("conn");
        context
            .bind_resource(ResourceKey::Pool(PoolId::new(1)), bound.clone())
            .unwrap();

        let scope = context.suspend();
        assert_eq!(scope.resource_count(), 1);
        assert_eq!(scope.transaction_name(), Some("outer"));
        assert_eq!(context.resource_count(), 0);
        assert!(!context.is_synchronization_active());
        assert!(!context.is_actual_transaction_active());

        context.resume(scope).unwrap();
        let found =
            lookup_holder::<&'static str>(&context, &ResourceKey::Pool(PoolId::new(1))).unwrap();
        assert!(Arc::ptr_eq(&bound, &found));
        assert!(context.is_synchronization_active());
        assert!(context.is_actual_transaction_active());
        assert_eq!(context.transaction_name().as_deref(), Some("outer"));
    }

    #[test]
    fn resume_refuses_uncleared_nested_scope() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let scope = context.suspend();

        context.init_synchronization().unwrap();
        assert!(matches!(
            context.resume(scope),
            Err(ResumeError {
                error: BridgeError::SynchronizationAlreadyActive,
                ..
            })
        ));
    }

    #[test]
    fn resume_refuses_conflicting_binding() {
        let context = ExecutionContext::new();
        context.bind_resource(factory_key(1), holder("outer")).unwrap();
        let scope = context.suspend();

        context.bind_resource(factory_key(1), holder("inner")).unwrap();
        assert!(matches!(
            context.resume(scope),
            Err(ResumeError {
                error: BridgeError::AlreadyBound { .. },
                ..
            })
        ));
    }

    #[test]
    fn refused_scope_can_be_resumed_after_the_conflict_is_cleared() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        context.set_actual_transaction_active(true);
        let outer = holder("outer");
        context.bind_resource(factory_key(1), outer.clone()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        context
            .register_synchronization(Arc::new(Recorder {
                name: "outer",
                order: SynchronizationOrder::LOWEST,
                log: Arc::clone(&log),
            }))
            .unwrap();
        let scope = context.suspend();

        context.bind_resource(factory_key(1), holder("inner")).unwrap();
        let (error, scope) = context.resume(scope).unwrap_err().into_parts();
        assert!(matches!(error, BridgeError::AlreadyBound { .. }));
        assert_eq!(scope.resource_count(), 1);
        assert!(!context.is_synchronization_active());

        context.unbind_resource(&factory_key(1)).unwrap();
        context.resume(scope).unwrap();

        let found = lookup_holder::<&'static str>(&context, &factory_key(1)).unwrap();
        assert!(Arc::ptr_eq(&outer, &found));
        assert!(context.is_actual_transaction_active());
        context.trigger_before_completion();
        assert_eq!(*log.lock(), vec!["outer".to_string()]);
    }

    #[test]
    fn clear_keeps_resources() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        context.set_actual_transaction_active(true);
        context.set_rollback_only();
        context.bind_resource(factory_key(1), holder("a")).unwrap();

        context.clear();

        assert!(!context.is_synchronization_active());
        assert!(!context.is_actual_transaction_active());
        assert!(!context.is_rollback_only());
        assert_eq!(context.resource_count(), 1);
    }
}
