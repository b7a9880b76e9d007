//! Connection resources.
//!
//! The bridge never pools or opens physical connections itself. It talks
//! to a [`DataSource`] for raw connections and to a [`ConnectionProvider`]
//! that knows whether a connection is owned by the ambient transaction.

mod provider;

pub use provider::{ConnectionSynchronization, ContextConnectionProvider};

use crate::context::{ContextRegistry, ResourceHolder};
use crate::error::{BridgeResult, SqlError};
use crate::types::PoolId;
use std::fmt;
use std::sync::Arc;

/// A physical database connection.
pub trait Connection: Send + Sync + fmt::Debug {
    /// Returns the auto-commit setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot report it.
    fn auto_commit(&self) -> Result<bool, SqlError>;

    /// Changes the auto-commit setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver rejects the change.
    fn set_auto_commit(&self, auto_commit: bool) -> Result<(), SqlError>;

    /// Commits the connection's current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    fn commit(&self) -> Result<(), SqlError>;

    /// Rolls back the connection's current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&self) -> Result<(), SqlError>;

    /// Closes the connection (or returns it to its pool).
    ///
    /// # Errors
    ///
    /// Returns an error if the close fails.
    fn close(&self) -> Result<(), SqlError>;

    /// Returns true once the connection is closed.
    fn is_closed(&self) -> bool;
}

/// A source of physical connections, typically a pool.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Returns the pool identifier, used as the connection-holder key.
    fn pool_id(&self) -> PoolId;

    /// Obtains a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained.
    fn get_connection(&self) -> Result<Arc<dyn Connection>, SqlError>;

    /// Returns the database product name (e.g. `"PostgreSQL"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    fn database_product_name(&self) -> Result<String, SqlError>;
}

/// Holder of a connection bound to an execution context.
pub type ConnectionHolder = ResourceHolder<Arc<dyn Connection>>;

/// Hands out connections that are aware of the ambient transaction.
pub trait ConnectionProvider: Send + Sync {
    /// Returns the transaction's connection for `data_source`, or a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if a new connection cannot be obtained.
    fn get_connection(
        &self,
        registry: &dyn ContextRegistry,
        data_source: &Arc<dyn DataSource>,
    ) -> BridgeResult<Arc<dyn Connection>>;

    /// Returns true if `connection` is the one bound to the ambient
    /// transaction for `data_source`.
    fn is_connection_transactional(
        &self,
        registry: &dyn ContextRegistry,
        connection: &Arc<dyn Connection>,
        data_source: &dyn DataSource,
    ) -> bool;

    /// Gives a connection back: decrements the bound holder if it is the
    /// transaction's connection, closes it otherwise. `None` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if closing an unbound connection fails.
    fn release_connection(
        &self,
        registry: &dyn ContextRegistry,
        connection: Option<&Arc<dyn Connection>>,
        data_source: &dyn DataSource,
    ) -> BridgeResult<()>;
}
