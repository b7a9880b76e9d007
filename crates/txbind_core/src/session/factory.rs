//! Session factory assembly.

use crate::config::Config;
use crate::context::ContextHandle;
use crate::datasource::DataSource;
use crate::error::{BridgeError, BridgeResult, PersistenceError};
use crate::session::{SessionFactory, SqlSession};
use crate::transaction::{
    ManagedTransactionFactory, Transaction, TransactionFactory, TransactionStrategy,
};
use crate::types::{ExecutionMode, FactoryId};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds sessions on top of a transaction. This is where the statement
/// executor lives; the bridge only manages the result.
pub trait SessionEngine: Send + Sync {
    /// Opens a session driving `transaction` with `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be created.
    fn open(
        &self,
        transaction: Box<dyn Transaction>,
        mode: ExecutionMode,
    ) -> Result<Arc<dyn SqlSession>, PersistenceError>;
}

/// Builder for [`ConfiguredSessionFactory`].
///
/// ```rust,ignore
/// let factory = SessionFactoryBuilder::new()
///     .data_source(data_source)
///     .engine(engine)
///     .config(Config::new().default_execution_mode(ExecutionMode::Reuse))
///     .build()?;
/// ```
#[derive(Default)]
pub struct SessionFactoryBuilder {
    data_source: Option<Arc<dyn DataSource>>,
    transaction_factory: Option<Arc<dyn TransactionFactory>>,
    engine: Option<Arc<dyn SessionEngine>>,
    config: Config,
}

impl SessionFactoryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data source. Required.
    #[must_use]
    pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    /// Sets the transaction factory. Defaults to
    /// [`ManagedTransactionFactory`].
    #[must_use]
    pub fn transaction_factory(mut self, factory: Arc<dyn TransactionFactory>) -> Self {
        self.transaction_factory = Some(factory);
        self
    }

    /// Sets the session engine. Required.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn SessionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Builds the factory.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Precondition`] if the data source or the
    /// engine is missing.
    pub fn build(self) -> BridgeResult<Arc<ConfiguredSessionFactory>> {
        let data_source = self
            .data_source
            .ok_or_else(|| BridgeError::precondition("No DataSource specified"))?;
        let engine = self
            .engine
            .ok_or_else(|| BridgeError::precondition("No SessionEngine specified"))?;
        let transaction_factory: Arc<dyn TransactionFactory> = match self.transaction_factory {
            Some(factory) => factory,
            None => Arc::new(ManagedTransactionFactory::new()),
        };

        let factory = ConfiguredSessionFactory {
            id: FactoryId::next(),
            config: self.config,
            data_source,
            transaction_factory,
            engine,
        };
        debug!(
            factory = %factory.id,
            environment = %factory.config.environment_id,
            strategy = %factory.transaction_factory.strategy(),
            "built session factory"
        );
        Ok(Arc::new(factory))
    }
}

/// Session factory over one environment: a data source, a transaction
/// factory and an engine.
pub struct ConfiguredSessionFactory {
    id: FactoryId,
    config: Config,
    data_source: Arc<dyn DataSource>,
    transaction_factory: Arc<dyn TransactionFactory>,
    engine: Arc<dyn SessionEngine>,
}

impl ConfiguredSessionFactory {
    /// Returns the transaction factory.
    pub fn transaction_factory(&self) -> &Arc<dyn TransactionFactory> {
        &self.transaction_factory
    }
}

impl SessionFactory for ConfiguredSessionFactory {
    fn id(&self) -> FactoryId {
        self.id
    }

    fn config(&self) -> &Config {
        &self.config
    }

    fn strategy(&self) -> TransactionStrategy {
        self.transaction_factory.strategy()
    }

    fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.data_source
    }

    fn open_session(
        &self,
        context: &ContextHandle,
        mode: ExecutionMode,
    ) -> BridgeResult<Arc<dyn SqlSession>> {
        let transaction = self
            .transaction_factory
            .new_transaction(Arc::clone(context), Arc::clone(&self.data_source));
        Ok(self.engine.open(transaction, mode)?)
    }
}

impl fmt::Debug for ConfiguredSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredSessionFactory")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("data_source", &self.data_source)
            .field("transaction_factory", &self.transaction_factory)
            .finish_non_exhaustive()
    }
}
