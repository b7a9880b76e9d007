//! In-crate doubles for unit tests.

use crate::config::Config;
use crate::context::ContextHandle;
use crate::datasource::{Connection, DataSource};
use crate::error::{BridgeResult, PersistenceError, SqlError};
use crate::session::{SessionFactory, SqlSession};
use crate::transaction::TransactionStrategy;
use crate::types::{ExecutionMode, FactoryId, PoolId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct FakeConnection {
    auto_commit: AtomicBool,
    closed: AtomicBool,
    pub(crate) commits: AtomicUsize,
    pub(crate) rollbacks: AtomicUsize,
    pub(crate) closes: AtomicUsize,
}

impl Connection for FakeConnection {
    fn auto_commit(&self) -> Result<bool, SqlError> {
        Ok(self.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlError> {
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    fn commit(&self) -> Result<(), SqlError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<(), SqlError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), SqlError> {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub(crate) struct FakeDataSource {
    pool: PoolId,
    product: Option<String>,
    auto_commit: bool,
    handed_out: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeDataSource {
    pub(crate) fn new() -> Self {
        Self {
            pool: PoolId::next(),
            product: Some("H2".to_string()),
            auto_commit: false,
            handed_out: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_product(mut self, product: Option<&str>) -> Self {
        self.product = product.map(str::to_string);
        self
    }

    pub(crate) fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub(crate) fn pool(&self) -> PoolId {
        self.pool
    }

    pub(crate) fn handed_out(&self) -> Vec<Arc<FakeConnection>> {
        self.handed_out.lock().clone()
    }

    pub(crate) fn last_connection(&self) -> Arc<FakeConnection> {
        self.handed_out
            .lock()
            .last()
            .cloned()
            .expect("no connection handed out")
    }
}

impl DataSource for FakeDataSource {
    fn pool_id(&self) -> PoolId {
        self.pool
    }

    fn get_connection(&self) -> Result<Arc<dyn Connection>, SqlError> {
        let connection = Arc::new(FakeConnection::default());
        connection.set_auto_commit(self.auto_commit)?;
        self.handed_out.lock().push(Arc::clone(&connection));
        Ok(connection)
    }

    fn database_product_name(&self) -> Result<String, SqlError> {
        self.product
            .clone()
            .ok_or_else(|| SqlError::new("metadata unavailable"))
    }
}

#[derive(Debug)]
pub(crate) struct FakeSession {
    mode: ExecutionMode,
    open: AtomicBool,
    pub(crate) commits: AtomicUsize,
    pub(crate) closes: AtomicUsize,
    commit_failure: Mutex<Option<PersistenceError>>,
}

impl FakeSession {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            open: AtomicBool::new(true),
            commits: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            commit_failure: Mutex::new(None),
        }
    }

    pub(crate) fn fail_next_commit(&self, error: PersistenceError) {
        *self.commit_failure.lock() = Some(error);
    }
}

impl SqlSession for FakeSession {
    fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    fn commit(&self) -> Result<(), PersistenceError> {
        if let Some(error) = self.commit_failure.lock().take() {
            return Err(error);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn close(&self) -> Result<(), PersistenceError> {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeFactory {
    id: FactoryId,
    config: Config,
    strategy: TransactionStrategy,
    data_source: Arc<dyn DataSource>,
    opened: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeFactory {
    pub(crate) fn new(strategy: TransactionStrategy) -> Self {
        Self::with_data_source(strategy, Arc::new(FakeDataSource::new()))
    }

    pub(crate) fn with_data_source(
        strategy: TransactionStrategy,
        data_source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            id: FactoryId::next(),
            config: Config::default(),
            strategy,
            data_source,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn opened(&self) -> Vec<Arc<FakeSession>> {
        self.opened.lock().clone()
    }
}

impl SessionFactory for FakeFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn strategy(&self) -> TransactionStrategy {
        self.strategy
    }

    fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    fn open_session(
        &self,
        _context: &ContextHandle,
        mode: ExecutionMode,
    ) -> BridgeResult<Arc<dyn SqlSession>> {
        let session = Arc::new(FakeSession::new(mode));
        self.opened.lock().push(Arc::clone(&session));
        Ok(session)
    }
}
