//! Scripted ambient transactions.
//!
//! [`TransactionDriver`] plays the transaction manager: it binds a
//! connection for the pool, activates synchronization, fires the callbacks
//! on commit or rollback, and suspends the outer scope when a nested
//! transaction begins. [`BridgeHarness`] wires a driver, a session factory
//! and a session manager over one execution context.

use crate::fixtures::{managed_factory, EventLog, MockConnection, MockDataSource, MockEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use txbind_core::{
    BridgeError, BridgeResult, CompletionStatus, ConfiguredSessionFactory, Connection,
    ConnectionHolder, ContextHandle, ContextRegistry, ExecutionContext, ResourceKey,
    SessionManager, SqlSession, SuspendedScope,
};

struct Frame {
    /// `None` for synchronization-only scopes.
    connection: Option<(Arc<MockConnection>, Arc<ConnectionHolder>)>,
    suspended: Option<SuspendedScope>,
}

/// Drives ambient transactions on one execution context.
pub struct TransactionDriver {
    context: Arc<ExecutionContext>,
    data_source: Arc<MockDataSource>,
    frames: Vec<Frame>,
}

impl TransactionDriver {
    /// Creates a driver for `data_source` on `context`.
    pub fn new(context: Arc<ExecutionContext>, data_source: Arc<MockDataSource>) -> Self {
        Self {
            context,
            data_source,
            frames: Vec::new(),
        }
    }

    /// Returns the context.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Returns the number of open transactions, suspended ones included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Returns the connection of the innermost transaction.
    pub fn connection(&self) -> Option<Arc<MockConnection>> {
        self.frames
            .last()
            .and_then(|frame| frame.connection.as_ref())
            .map(|(connection, _)| Arc::clone(connection))
    }

    fn pool_key(&self) -> ResourceKey {
        ResourceKey::Pool(self.data_source.pool())
    }

    /// Begins a transaction, suspending the current one if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be bound.
    pub fn begin(&mut self) -> BridgeResult<()> {
        self.begin_with(None)
    }

    /// Begins a transaction with a deadline `timeout` from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be bound.
    pub fn begin_with_timeout(&mut self, timeout: Duration) -> BridgeResult<()> {
        self.begin_with(Some(timeout))
    }

    fn begin_with(&mut self, timeout: Option<Duration>) -> BridgeResult<()> {
        let suspended = if self.context.is_synchronization_active() {
            debug!(depth = self.frames.len(), "suspending current transaction");
            Some(self.context.suspend())
        } else {
            None
        };

        let connection = self.data_source.open();
        connection.set_auto_commit(false)?;
        let holder = Arc::new(ConnectionHolder::new(
            Arc::clone(&connection) as Arc<dyn Connection>
        ));
        holder.requested();
        holder.set_synchronized_with_transaction(true);
        if let Some(timeout) = timeout {
            holder.set_timeout(timeout);
        }
        self.context.bind_resource(self.pool_key(), holder.clone())?;
        self.context.init_synchronization()?;
        self.context.set_actual_transaction_active(true);

        debug!(depth = self.frames.len() + 1, connection = connection.id(), "began transaction");
        self.frames.push(Frame {
            connection: Some((connection, holder)),
            suspended,
        });
        Ok(())
    }

    /// Activates synchronization without a real transaction or connection.
    ///
    /// # Errors
    ///
    /// Returns an error if synchronization is already active.
    pub fn begin_synchronization_only(&mut self) -> BridgeResult<()> {
        let suspended = if self.context.is_synchronization_active() {
            Some(self.context.suspend())
        } else {
            None
        };
        self.context.init_synchronization()?;
        self.frames.push(Frame {
            connection: None,
            suspended,
        });
        Ok(())
    }

    /// Marks the innermost transaction rollback-only.
    pub fn set_rollback_only(&self) {
        self.context.set_rollback_only();
    }

    /// Commits the innermost transaction.
    ///
    /// A rollback-only transaction is rolled back instead. A failing
    /// `before_commit` callback rolls the transaction back and its error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SynchronizationInactive`] if no transaction
    /// is open, or the first `before_commit` failure.
    pub fn commit(&mut self) -> BridgeResult<()> {
        if self.frames.is_empty() {
            return Err(BridgeError::SynchronizationInactive);
        }
        if self.context.is_rollback_only() {
            debug!("transaction is rollback-only, rolling back");
            return self.rollback();
        }

        let read_only = self.context.is_current_transaction_read_only();
        if let Err(err) = self.context.trigger_before_commit(read_only) {
            debug!(error = %err, "before commit failed, rolling back");
            self.rollback()?;
            return Err(err);
        }

        self.context.trigger_before_completion();
        if let Some((connection, _)) = self.frames.last().and_then(|f| f.connection.as_ref()) {
            connection.commit()?;
        }
        self.context.trigger_after_commit();
        self.context.trigger_after_completion(CompletionStatus::Committed);
        self.cleanup()
    }

    /// Rolls back the innermost transaction.
    ///
    /// If the outer transaction could not be resumed on the last commit or
    /// rollback, it is still waiting on the stack; once the conflict is
    /// cleared, a rollback resumes it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SynchronizationInactive`] if no transaction
    /// is open.
    pub fn rollback(&mut self) -> BridgeResult<()> {
        if self.frames.is_empty() {
            return Err(BridgeError::SynchronizationInactive);
        }
        self.context.trigger_before_completion();
        if let Some((connection, _)) = self.frames.last().and_then(|f| f.connection.as_ref()) {
            connection.rollback()?;
        }
        self.context
            .trigger_after_completion(CompletionStatus::RolledBack);
        self.cleanup()
    }

    fn cleanup(&mut self) -> BridgeResult<()> {
        let Some(frame) = self.frames.pop() else {
            return Err(BridgeError::SynchronizationInactive);
        };
        self.context.clear();
        if let Some((connection, holder)) = frame.connection {
            self.context.unbind_resource_if_possible(&self.pool_key());
            holder.reset();
            connection.set_auto_commit(true)?;
            connection.close()?;
        }
        if let Some(scope) = frame.suspended {
            debug!(depth = self.frames.len(), "resuming suspended transaction");
            if let Err(err) = self.context.resume(scope) {
                let (error, scope) = err.into_parts();
                self.frames.push(Frame {
                    connection: None,
                    suspended: Some(scope),
                });
                return Err(error);
            }
        }
        Ok(())
    }
}

/// A context, a driver, a managed session factory and a session manager.
pub struct BridgeHarness {
    /// The execution context.
    pub context: Arc<ExecutionContext>,
    /// The data source.
    pub data_source: Arc<MockDataSource>,
    /// The session engine.
    pub engine: Arc<MockEngine>,
    /// A factory with managed transactions.
    pub factory: Arc<ConfiguredSessionFactory>,
    /// The session manager.
    pub manager: SessionManager,
    /// The transaction driver.
    pub driver: TransactionDriver,
    /// Log shared by connections and sessions.
    pub log: EventLog,
}

impl BridgeHarness {
    /// Creates a harness with a fresh context.
    pub fn new() -> Self {
        Self::with_context(Arc::new(ExecutionContext::new()))
    }

    /// Creates a harness over `context`.
    pub fn with_context(context: Arc<ExecutionContext>) -> Self {
        let log = EventLog::new();
        let data_source = Arc::new(MockDataSource::with_log(log.clone()));
        let engine = Arc::new(MockEngine::with_log(log.clone()));
        let factory = managed_factory(Arc::clone(&data_source), Arc::clone(&engine));
        let driver = TransactionDriver::new(Arc::clone(&context), Arc::clone(&data_source));
        Self {
            context,
            data_source,
            engine,
            factory,
            manager: SessionManager::new(),
            driver,
            log,
        }
    }

    /// Returns the context as a registry handle.
    pub fn handle(&self) -> ContextHandle {
        self.context.handle()
    }

    /// Acquires a session with the factory's defaults.
    pub fn acquire(&self) -> BridgeResult<Arc<dyn SqlSession>> {
        self.manager.acquire_default(&self.handle(), self.factory.as_ref())
    }

    /// Releases a session.
    pub fn release(&self, session: &Arc<dyn SqlSession>) -> BridgeResult<()> {
        self.manager
            .release(self.context.as_ref(), session, self.factory.as_ref())
    }

    /// Returns true if `session` is bound to the current transaction.
    pub fn is_managed(&self, session: &Arc<dyn SqlSession>) -> bool {
        self.manager
            .is_managed(self.context.as_ref(), session, self.factory.as_ref())
    }
}

impl Default for BridgeHarness {
    fn default() -> Self {
        Self::new()
    }
}
