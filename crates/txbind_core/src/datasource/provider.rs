//! Context-aware connection provider.

use crate::context::{
    lookup_holder, CompletionStatus, ContextRegistry, SynchronizationOrder,
    TransactionSynchronization,
};
use crate::datasource::{Connection, ConnectionHolder, ConnectionProvider, DataSource};
use crate::error::BridgeResult;
use crate::types::{PoolId, ResourceKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection provider backed by the execution context.
///
/// A connection already bound for the pool (by a transaction driver or by
/// an earlier call) is shared and reference counted. Otherwise a new
/// connection is fetched from the data source and, while synchronization
/// is active, bound for the rest of the transaction with a
/// [`ConnectionSynchronization`] to give it back on completion.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextConnectionProvider;

impl ContextConnectionProvider {
    /// Creates a provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn bind_new(
        registry: &dyn ContextRegistry,
        key: ResourceKey,
        pool: PoolId,
        connection: &Arc<dyn Connection>,
    ) -> BridgeResult<()> {
        let holder = Arc::new(ConnectionHolder::new(Arc::clone(connection)));
        holder.requested();
        holder.set_synchronized_with_transaction(true);
        registry.bind_resource(key, holder.clone())?;
        let synchronization = Arc::new(ConnectionSynchronization::new(holder, pool));
        if let Err(err) = registry.register_synchronization(synchronization) {
            registry.unbind_resource_if_possible(&key);
            return Err(err);
        }
        Ok(())
    }
}

impl ConnectionProvider for ContextConnectionProvider {
    fn get_connection(
        &self,
        registry: &dyn ContextRegistry,
        data_source: &Arc<dyn DataSource>,
    ) -> BridgeResult<Arc<dyn Connection>> {
        let pool = data_source.pool_id();
        let key = ResourceKey::Pool(pool);

        if let Some(holder) = lookup_holder::<Arc<dyn Connection>>(registry, &key) {
            holder.requested();
            debug!(%pool, "fetched connection from current transaction");
            return Ok(Arc::clone(holder.resource()));
        }

        debug!(%pool, "fetching connection from data source");
        let connection = data_source.get_connection()?;

        if registry.is_synchronization_active() {
            debug!(%pool, "registering transaction synchronization for connection");
            if let Err(err) = Self::bind_new(registry, key, pool, &connection) {
                if let Err(close_err) = connection.close() {
                    warn!(
                        %pool,
                        error = %close_err,
                        "could not close connection after failed binding"
                    );
                }
                return Err(err);
            }
        }

        Ok(connection)
    }

    fn is_connection_transactional(
        &self,
        registry: &dyn ContextRegistry,
        connection: &Arc<dyn Connection>,
        data_source: &dyn DataSource,
    ) -> bool {
        let key = ResourceKey::Pool(data_source.pool_id());
        lookup_holder::<Arc<dyn Connection>>(registry, &key)
            .is_some_and(|holder| Arc::ptr_eq(holder.resource(), connection))
    }

    fn release_connection(
        &self,
        registry: &dyn ContextRegistry,
        connection: Option<&Arc<dyn Connection>>,
        data_source: &dyn DataSource,
    ) -> BridgeResult<()> {
        let Some(connection) = connection else {
            return Ok(());
        };
        let pool = data_source.pool_id();
        let key = ResourceKey::Pool(pool);

        if let Some(holder) = lookup_holder::<Arc<dyn Connection>>(registry, &key) {
            if Arc::ptr_eq(holder.resource(), connection) {
                holder.released();
                return Ok(());
            }
        }

        debug!(%pool, "closing non transactional connection");
        connection.close()?;
        Ok(())
    }
}

/// Gives a provider-bound connection back when its transaction completes.
#[derive(Debug)]
pub struct ConnectionSynchronization {
    holder: Arc<ConnectionHolder>,
    pool: PoolId,
    holder_active: AtomicBool,
}

impl ConnectionSynchronization {
    /// Creates a synchronization for `holder` bound under `pool`.
    #[must_use]
    pub fn new(holder: Arc<ConnectionHolder>, pool: PoolId) -> Self {
        Self {
            holder,
            pool,
            holder_active: AtomicBool::new(true),
        }
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::Pool(self.pool)
    }

    fn close_connection(&self) {
        if let Err(err) = self.holder.resource().close() {
            warn!(pool = %self.pool, error = %err, "could not close connection on completion");
        }
    }
}

impl TransactionSynchronization for ConnectionSynchronization {
    fn order(&self) -> SynchronizationOrder {
        SynchronizationOrder::CONNECTION
    }

    fn suspend(&self, registry: &dyn ContextRegistry) {
        if self.holder_active.load(Ordering::SeqCst) {
            registry.unbind_resource_if_possible(&self.key());
        }
    }

    fn resume(&self, registry: &dyn ContextRegistry) {
        if self.holder_active.load(Ordering::SeqCst) {
            if let Err(err) = registry.bind_resource(self.key(), self.holder.clone()) {
                warn!(pool = %self.pool, error = %err, "could not rebind connection on resume");
            }
        }
    }

    fn before_completion(&self, registry: &dyn ContextRegistry) {
        if !self.holder.is_open() && self.holder_active.swap(false, Ordering::SeqCst) {
            registry.unbind_resource_if_possible(&self.key());
            self.close_connection();
        }
    }

    fn after_completion(&self, registry: &dyn ContextRegistry, _status: CompletionStatus) {
        if self.holder_active.swap(false, Ordering::SeqCst) {
            registry.unbind_resource_if_possible(&self.key());
            self.close_connection();
        }
        self.holder.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::test_support::FakeDataSource;

    #[test]
    fn without_synchronization_connections_are_not_bound() {
        let context = ExecutionContext::new();
        let data_source: Arc<dyn DataSource> = Arc::new(FakeDataSource::new());
        let provider = ContextConnectionProvider::new();

        let connection = provider.get_connection(&context, &data_source).unwrap();
        assert!(!provider.is_connection_transactional(&context, &connection, &*data_source));
        assert_eq!(context.resource_count(), 0);

        provider
            .release_connection(&context, Some(&connection), &*data_source)
            .unwrap();
        assert!(connection.is_closed());
    }

    #[test]
    fn synchronized_connection_is_shared_and_closed_on_completion() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let fake = Arc::new(FakeDataSource::new());
        let data_source: Arc<dyn DataSource> = fake.clone();
        let provider = ContextConnectionProvider::new();

        let first = provider.get_connection(&context, &data_source).unwrap();
        let second = provider.get_connection(&context, &data_source).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.handed_out().len(), 1);
        assert!(provider.is_connection_transactional(&context, &first, &*data_source));

        provider.release_connection(&context, Some(&first), &*data_source).unwrap();
        provider.release_connection(&context, Some(&second), &*data_source).unwrap();
        assert!(!first.is_closed());

        context.trigger_before_completion();
        context.trigger_after_completion(CompletionStatus::Committed);

        assert!(first.is_closed());
        assert_eq!(fake.last_connection().closes.load(Ordering::SeqCst), 1);
        assert_eq!(context.resource_count(), 0);
    }

    #[test]
    fn connection_still_in_use_is_closed_after_completion() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let fake = Arc::new(FakeDataSource::new());
        let data_source: Arc<dyn DataSource> = fake.clone();
        let connection = ContextConnectionProvider::new()
            .get_connection(&context, &data_source)
            .unwrap();

        context.trigger_before_completion();
        assert!(!connection.is_closed());

        context.trigger_after_completion(CompletionStatus::RolledBack);
        context.trigger_after_completion(CompletionStatus::RolledBack);
        assert_eq!(fake.last_connection().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_of_none_is_noop() {
        let context = ExecutionContext::new();
        let data_source = FakeDataSource::new();
        ContextConnectionProvider::new()
            .release_connection(&context, None, &data_source)
            .unwrap();
    }

    #[test]
    fn suspend_and_resume_move_the_connection_holder() {
        let context = ExecutionContext::new();
        context.init_synchronization().unwrap();
        let fake = Arc::new(FakeDataSource::new());
        let data_source: Arc<dyn DataSource> = fake.clone();
        ContextConnectionProvider::new()
            .get_connection(&context, &data_source)
            .unwrap();
        let key = ResourceKey::Pool(fake.pool());

        let scope = context.suspend();
        assert!(!context.has_resource(&key));
        context.resume(scope).unwrap();
        assert!(context.has_resource(&key));
    }
}
