//! Transaction that follows the ambient transaction.

use crate::context::{lookup_holder, ContextHandle};
use crate::datasource::{Connection, ConnectionProvider, ContextConnectionProvider, DataSource};
use crate::error::BridgeResult;
use crate::transaction::{Transaction, TransactionFactory, TransactionStrategy};
use crate::types::ResourceKey;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wraps one connection for the life of one session.
///
/// The connection is fetched lazily through the [`ConnectionProvider`].
/// If it belongs to the ambient transaction, or runs in auto-commit mode,
/// `commit` and `rollback` do nothing and the transaction manager stays in
/// charge. `close` always goes through the provider so a transactional
/// connection is only given back, never closed.
pub struct ManagedTransaction {
    context: ContextHandle,
    data_source: Arc<dyn DataSource>,
    provider: Arc<dyn ConnectionProvider>,
    connection: Option<Arc<dyn Connection>>,
    is_connection_transactional: bool,
    auto_commit: bool,
}

impl ManagedTransaction {
    /// Creates a transaction using the context connection provider.
    #[must_use]
    pub fn new(context: ContextHandle, data_source: Arc<dyn DataSource>) -> Self {
        Self::with_provider(context, data_source, Arc::new(ContextConnectionProvider))
    }

    /// Creates a transaction using `provider`.
    #[must_use]
    pub fn with_provider(
        context: ContextHandle,
        data_source: Arc<dyn DataSource>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            context,
            data_source,
            provider,
            connection: None,
            is_connection_transactional: false,
            auto_commit: false,
        }
    }

    /// Returns true once a connection has been obtained and it belongs to
    /// the ambient transaction.
    #[must_use]
    pub fn is_connection_transactional(&self) -> bool {
        self.is_connection_transactional
    }

    fn open_connection(&mut self) -> BridgeResult<Arc<dyn Connection>> {
        let connection = self
            .provider
            .get_connection(self.context.as_ref(), &self.data_source)?;
        let auto_commit = connection.auto_commit()?;
        self.auto_commit = auto_commit;
        self.is_connection_transactional = self.provider.is_connection_transactional(
            self.context.as_ref(),
            &connection,
            self.data_source.as_ref(),
        );
        debug!(
            pool = %self.data_source.pool_id(),
            managed = self.is_connection_transactional,
            "connection {} be managed by the ambient transaction",
            if self.is_connection_transactional { "will" } else { "will not" }
        );
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn owns_transaction(&self) -> Option<&Arc<dyn Connection>> {
        if self.is_connection_transactional || self.auto_commit {
            return None;
        }
        self.connection.as_ref()
    }
}

impl Transaction for ManagedTransaction {
    fn connection(&mut self) -> BridgeResult<Arc<dyn Connection>> {
        match &self.connection {
            Some(connection) => Ok(Arc::clone(connection)),
            None => self.open_connection(),
        }
    }

    fn commit(&mut self) -> BridgeResult<()> {
        if let Some(connection) = self.owns_transaction() {
            debug!(pool = %self.data_source.pool_id(), "committing connection");
            connection.commit()?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> BridgeResult<()> {
        if let Some(connection) = self.owns_transaction() {
            debug!(pool = %self.data_source.pool_id(), "rolling back connection");
            connection.rollback()?;
        }
        Ok(())
    }

    fn close(&mut self) -> BridgeResult<()> {
        let connection = self.connection.take();
        self.provider.release_connection(
            self.context.as_ref(),
            connection.as_ref(),
            self.data_source.as_ref(),
        )
    }

    fn timeout(&self) -> BridgeResult<Option<Duration>> {
        let key = ResourceKey::Pool(self.data_source.pool_id());
        match lookup_holder::<Arc<dyn Connection>>(self.context.as_ref(), &key) {
            Some(holder) => holder.time_to_live(),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ManagedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTransaction")
            .field("pool", &self.data_source.pool_id())
            .field("connected", &self.connection.is_some())
            .field("is_connection_transactional", &self.is_connection_transactional)
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}

/// Creates [`ManagedTransaction`]s.
#[derive(Clone)]
pub struct ManagedTransactionFactory {
    provider: Arc<dyn ConnectionProvider>,
}

impl ManagedTransactionFactory {
    /// Creates a factory using the context connection provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(Arc::new(ContextConnectionProvider))
    }

    /// Creates a factory using `provider`.
    #[must_use]
    pub fn with_provider(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { provider }
    }
}

impl Default for ManagedTransactionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManagedTransactionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTransactionFactory").finish_non_exhaustive()
    }
}

impl TransactionFactory for ManagedTransactionFactory {
    fn strategy(&self) -> TransactionStrategy {
        TransactionStrategy::Managed
    }

    fn new_transaction(
        &self,
        context: ContextHandle,
        data_source: Arc<dyn DataSource>,
    ) -> Box<dyn Transaction> {
        Box::new(ManagedTransaction::with_provider(
            context,
            data_source,
            Arc::clone(&self.provider),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CompletionStatus, ContextRegistry, ExecutionContext, ResourceHolder};
    use crate::error::BridgeError;
    use crate::test_support::{FakeConnection, FakeDataSource};
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    fn setup(auto_commit: bool) -> (Arc<ExecutionContext>, Arc<FakeDataSource>) {
        let context = Arc::new(ExecutionContext::new());
        let data_source = FakeDataSource::new().with_auto_commit(auto_commit);
        (context, Arc::new(data_source))
    }

    #[test]
    fn standalone_connection_is_committed_and_closed() {
        let (context, data_source) = setup(false);
        let mut tx = ManagedTransaction::new(context.handle(), data_source.clone());

        tx.commit().unwrap();
        assert!(data_source.handed_out().is_empty());

        tx.connection().unwrap();
        tx.connection().unwrap();
        assert_eq!(data_source.handed_out().len(), 1);
        assert!(!tx.is_connection_transactional());

        tx.commit().unwrap();
        tx.rollback().unwrap();
        tx.close().unwrap();

        let connection = data_source.last_connection();
        assert_eq!(connection.commits.load(Ordering::SeqCst), 1);
        assert_eq!(connection.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(connection.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auto_commit_connection_is_left_alone() {
        let (context, data_source) = setup(true);
        let mut tx = ManagedTransaction::new(context.handle(), data_source.clone());

        tx.connection().unwrap();
        tx.commit().unwrap();
        tx.rollback().unwrap();

        let connection = data_source.last_connection();
        assert_eq!(connection.commits.load(Ordering::SeqCst), 0);
        assert_eq!(connection.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn transactional_connection_is_never_committed_or_closed() {
        let (context, data_source) = setup(false);
        let bound = Arc::new(FakeConnection::default());
        let holder = Arc::new(ResourceHolder::new(bound.clone() as Arc<dyn Connection>));
        holder.requested();
        context
            .bind_resource(ResourceKey::Pool(data_source.pool()), holder.clone())
            .unwrap();

        let mut tx = ManagedTransaction::new(context.handle(), data_source.clone());
        let connection = tx.connection().unwrap();
        assert!(tx.is_connection_transactional());
        assert_eq!(holder.reference_count(), 2);

        tx.commit().unwrap();
        tx.close().unwrap();

        assert!(data_source.handed_out().is_empty());
        assert_eq!(bound.commits.load(Ordering::SeqCst), 0);
        assert!(!connection.is_closed());
        assert_eq!(holder.reference_count(), 1);
    }

    #[test]
    fn close_without_connection_is_noop() {
        let (context, data_source) = setup(false);
        let mut tx = ManagedTransaction::new(context.handle(), data_source);
        tx.close().unwrap();
    }

    #[test]
    fn timeout_follows_bound_connection_deadline() {
        let (context, data_source) = setup(false);
        let tx = ManagedTransaction::new(context.handle(), data_source.clone());
        assert_eq!(tx.timeout().unwrap(), None);

        let holder = Arc::new(ResourceHolder::new(
            Arc::new(FakeConnection::default()) as Arc<dyn Connection>
        ));
        holder.set_timeout(Duration::from_secs(60));
        context
            .bind_resource(ResourceKey::Pool(data_source.pool()), holder.clone())
            .unwrap();
        let left = tx.timeout().unwrap().unwrap();
        assert!(left <= Duration::from_secs(60));

        holder.set_deadline(Instant::now() - Duration::from_millis(5));
        assert!(matches!(
            tx.timeout(),
            Err(BridgeError::TransactionTimedOut { .. })
        ));
        assert!(holder.is_rollback_only());
    }

    #[test]
    fn synchronized_connection_is_released_on_completion() {
        let (context, data_source) = setup(false);
        context.init_synchronization().unwrap();
        let factory = ManagedTransactionFactory::new();
        assert_eq!(factory.strategy(), TransactionStrategy::Managed);

        let mut tx = factory.new_transaction(context.handle(), data_source.clone());
        tx.connection().unwrap();
        tx.commit().unwrap();
        tx.close().unwrap();

        let connection = data_source.last_connection();
        assert_eq!(connection.commits.load(Ordering::SeqCst), 0);
        assert!(!connection.is_closed());

        context.trigger_before_completion();
        context.trigger_after_completion(CompletionStatus::Committed);
        assert!(connection.is_closed());
    }
}
