//! Test doubles for the bridge's external contracts.
//!
//! Provides an in-memory data source and connection, a session engine whose
//! sessions drive a real [`Transaction`], a standalone transaction factory,
//! and an [`EventLog`] that records the order in which things happen.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use txbind_core::{
    CompletionStatus, Config, ConfiguredSessionFactory, Connection, ContextHandle,
    ContextRegistry, DataSource, ExecutionMode, PersistenceError, PoolId, SessionEngine,
    SessionFactoryBuilder, SqlError, SqlSession, SynchronizationOrder, Transaction,
    TransactionFactory, TransactionStrategy, TransactionSynchronization,
};

/// Shared, ordered record of events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Returns a copy of all events.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns the events starting with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the position of the first occurrence of `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// Removes all events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// In-memory connection with call counters.
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    auto_commit: AtomicBool,
    closed: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,
    log: EventLog,
}

impl MockConnection {
    fn new(id: usize, auto_commit: bool, log: EventLog) -> Self {
        Self {
            id,
            auto_commit: AtomicBool::new(auto_commit),
            closed: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            log,
        }
    }

    /// Returns the connection number within its data source.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns how many times the connection was committed.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns how many times the connection was rolled back.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Returns how many times the connection was closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn auto_commit(&self) -> Result<bool, SqlError> {
        Ok(self.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlError> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<(), SqlError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("connection-{}:commit", self.id));
        Ok(())
    }

    fn rollback(&self) -> Result<(), SqlError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("connection-{}:rollback", self.id));
        Ok(())
    }

    fn close(&self) -> Result<(), SqlError> {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("connection-{}:close", self.id));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory data source handing out [`MockConnection`]s.
#[derive(Debug)]
pub struct MockDataSource {
    pool: PoolId,
    product: Option<String>,
    auto_commit: bool,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    log: EventLog,
}

impl MockDataSource {
    /// Creates an H2 data source whose connections start with auto-commit off.
    pub fn new() -> Self {
        Self::with_log(EventLog::new())
    }

    /// Creates a data source recording connection events into `log`.
    pub fn with_log(log: EventLog) -> Self {
        Self {
            pool: PoolId::next(),
            product: Some("H2".to_string()),
            auto_commit: false,
            connections: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Sets the reported database product; `None` makes the lookup fail.
    pub fn product(mut self, product: Option<&str>) -> Self {
        self.product = product.map(str::to_string);
        self
    }

    /// Sets the auto-commit flag of new connections.
    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Returns the pool identifier.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Returns the event log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Returns every connection handed out so far.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    /// Returns the number of connections handed out.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns the number of connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections
            .lock()
            .iter()
            .filter(|connection| !connection.is_closed())
            .count()
    }

    /// Hands out a connection and keeps its concrete type.
    pub fn open(&self) -> Arc<MockConnection> {
        let mut connections = self.connections.lock();
        let connection = Arc::new(MockConnection::new(
            connections.len() + 1,
            self.auto_commit,
            self.log.clone(),
        ));
        connections.push(Arc::clone(&connection));
        connection
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSource for MockDataSource {
    fn pool_id(&self) -> PoolId {
        self.pool
    }

    fn get_connection(&self) -> Result<Arc<dyn Connection>, SqlError> {
        Ok(self.open())
    }

    fn database_product_name(&self) -> Result<String, SqlError> {
        self.product
            .clone()
            .ok_or_else(|| SqlError::new("database metadata unavailable"))
    }
}

/// Session that drives a [`Transaction`] the way a statement executor
/// would.
pub struct MockSession {
    id: usize,
    mode: ExecutionMode,
    transaction: Mutex<Box<dyn Transaction>>,
    open: AtomicBool,
    statements: Mutex<Vec<String>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,
    commit_failure: Mutex<Option<PersistenceError>>,
    log: EventLog,
}

impl MockSession {
    /// Returns the session number within its engine.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs a statement on the session's connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or has no connection.
    pub fn execute(&self, statement: &str) -> Result<(), PersistenceError> {
        if !self.is_open() {
            return Err(PersistenceError::new("session is closed"));
        }
        self.transaction
            .lock()
            .connection()
            .map_err(|err| PersistenceError::other("could not get connection", err))?;
        self.statements.lock().push(statement.to_string());
        Ok(())
    }

    /// Returns the time left for statements, as the transaction reports it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction deadline has passed.
    pub fn timeout(&self) -> txbind_core::BridgeResult<Option<std::time::Duration>> {
        self.transaction.lock().timeout()
    }

    /// Returns the statements run so far.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Makes the next commit fail with `error`.
    pub fn fail_next_commit(&self, error: PersistenceError) {
        *self.commit_failure.lock() = Some(error);
    }

    /// Returns how many times the session was committed.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns how many times the session was rolled back.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Returns how many times the session was closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SqlSession for MockSession {
    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn commit(&self) -> Result<(), PersistenceError> {
        if let Some(error) = self.commit_failure.lock().take() {
            return Err(error);
        }
        self.transaction
            .lock()
            .commit()
            .map_err(|err| PersistenceError::other("could not commit", err))?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("session-{}:commit", self.id));
        Ok(())
    }

    fn rollback(&self) -> Result<(), PersistenceError> {
        self.transaction
            .lock()
            .rollback()
            .map_err(|err| PersistenceError::other("could not roll back", err))?;
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("session-{}:rollback", self.id));
        Ok(())
    }

    fn close(&self) -> Result<(), PersistenceError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("session-{}:close", self.id));
        self.transaction
            .lock()
            .close()
            .map_err(|err| PersistenceError::other("could not close", err))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSession")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Engine opening [`MockSession`]s and keeping track of them.
#[derive(Debug, Default)]
pub struct MockEngine {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    log: EventLog,
}

impl MockEngine {
    /// Creates an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine recording session events into `log`.
    pub fn with_log(log: EventLog) -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            log,
        }
    }

    /// Returns every session opened so far.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    /// Returns the number of sessions opened.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns the most recently opened session.
    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }
}

impl SessionEngine for MockEngine {
    fn open(
        &self,
        transaction: Box<dyn Transaction>,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn SqlSession>, PersistenceError> {
        let mut sessions = self.sessions.lock();
        let session = Arc::new(MockSession {
            id: sessions.len() + 1,
            mode,
            transaction: Mutex::new(transaction),
            open: AtomicBool::new(true),
            statements: Mutex::new(Vec::new()),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            commit_failure: Mutex::new(None),
            log: self.log.clone(),
        });
        sessions.push(Arc::clone(&session));
        Ok(session)
    }
}

/// Transaction that owns its connection outright, ignoring any ambient
/// transaction.
#[derive(Debug)]
pub struct StandaloneTransaction {
    data_source: Arc<dyn DataSource>,
    connection: Option<Arc<dyn Connection>>,
}

impl Transaction for StandaloneTransaction {
    fn connection(&mut self) -> txbind_core::BridgeResult<Arc<dyn Connection>> {
        if let Some(connection) = &self.connection {
            return Ok(Arc::clone(connection));
        }
        let connection = self.data_source.get_connection()?;
        connection.set_auto_commit(false)?;
        self.connection = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn commit(&mut self) -> txbind_core::BridgeResult<()> {
        if let Some(connection) = &self.connection {
            connection.commit()?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> txbind_core::BridgeResult<()> {
        if let Some(connection) = &self.connection {
            connection.rollback()?;
        }
        Ok(())
    }

    fn close(&mut self) -> txbind_core::BridgeResult<()> {
        if let Some(connection) = self.connection.take() {
            connection.close()?;
        }
        Ok(())
    }

    fn timeout(&self) -> txbind_core::BridgeResult<Option<std::time::Duration>> {
        Ok(None)
    }
}

/// Creates [`StandaloneTransaction`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneTransactionFactory;

impl TransactionFactory for StandaloneTransactionFactory {
    fn strategy(&self) -> TransactionStrategy {
        TransactionStrategy::Standalone
    }

    fn new_transaction(
        &self,
        _context: ContextHandle,
        data_source: Arc<dyn DataSource>,
    ) -> Box<dyn Transaction> {
        Box::new(StandaloneTransaction {
            data_source,
            connection: None,
        })
    }
}

/// Builds a factory with managed transactions over `data_source`.
pub fn managed_factory(
    data_source: Arc<MockDataSource>,
    engine: Arc<MockEngine>,
) -> Arc<ConfiguredSessionFactory> {
    managed_factory_with_config(data_source, engine, Config::default())
}

/// Builds a factory with managed transactions and a custom configuration.
pub fn managed_factory_with_config(
    data_source: Arc<MockDataSource>,
    engine: Arc<MockEngine>,
    config: Config,
) -> Arc<ConfiguredSessionFactory> {
    SessionFactoryBuilder::new()
        .data_source(data_source)
        .engine(engine)
        .config(config)
        .build()
        .expect("Failed to build session factory")
}

/// Builds a factory with standalone transactions over `data_source`.
pub fn standalone_factory(
    data_source: Arc<MockDataSource>,
    engine: Arc<MockEngine>,
) -> Arc<ConfiguredSessionFactory> {
    SessionFactoryBuilder::new()
        .data_source(data_source)
        .engine(engine)
        .transaction_factory(Arc::new(StandaloneTransactionFactory))
        .build()
        .expect("Failed to build session factory")
}

/// Synchronization that records each callback into an [`EventLog`].
#[derive(Debug)]
pub struct RecordingSynchronization {
    name: String,
    order: SynchronizationOrder,
    log: EventLog,
}

impl RecordingSynchronization {
    /// Creates a recorder firing at `order`.
    pub fn new(name: impl Into<String>, order: SynchronizationOrder, log: EventLog) -> Self {
        Self {
            name: name.into(),
            order,
            log,
        }
    }

    fn record(&self, callback: &str) {
        self.log.record(format!("{}:{callback}", self.name));
    }
}

impl TransactionSynchronization for RecordingSynchronization {
    fn order(&self) -> SynchronizationOrder {
        self.order
    }

    fn suspend(&self, _registry: &dyn ContextRegistry) {
        self.record("suspend");
    }

    fn resume(&self, _registry: &dyn ContextRegistry) {
        self.record("resume");
    }

    fn before_commit(
        &self,
        _registry: &dyn ContextRegistry,
        _read_only: bool,
    ) -> txbind_core::BridgeResult<()> {
        self.record("before_commit");
        Ok(())
    }

    fn before_completion(&self, _registry: &dyn ContextRegistry) {
        self.record("before_completion");
    }

    fn after_commit(&self, _registry: &dyn ContextRegistry) {
        self.record("after_commit");
    }

    fn after_completion(&self, _registry: &dyn ContextRegistry, status: CompletionStatus) {
        self.record(&format!("after_completion({status:?})"));
    }
}
