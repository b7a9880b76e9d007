//! Transaction adapters.
//!
//! A session talks to its connection through a [`Transaction`]. Which
//! implementation it gets is decided by the factory's
//! [`TransactionFactory`]: the managed one defers to the ambient
//! transaction, any other strategy is treated as foreign.

mod managed;

pub use managed::{ManagedTransaction, ManagedTransactionFactory};

use crate::context::ContextHandle;
use crate::datasource::{Connection, DataSource};
use crate::error::BridgeResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How a session factory's transactions relate to the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStrategy {
    /// Connections come from the context and follow the ambient transaction.
    Managed,
    /// Sessions drive their own connection transactions.
    Standalone,
}

impl fmt::Display for TransactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => f.write_str("managed"),
            Self::Standalone => f.write_str("standalone"),
        }
    }
}

/// Connection-level transaction used by one session.
pub trait Transaction: Send + fmt::Debug {
    /// Returns the connection, obtaining it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained.
    fn connection(&mut self) -> BridgeResult<Arc<dyn Connection>>;

    /// Commits, unless the connection is owned by someone else.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection commit fails.
    fn commit(&mut self) -> BridgeResult<()>;

    /// Rolls back, unless the connection is owned by someone else.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection rollback fails.
    fn rollback(&mut self) -> BridgeResult<()>;

    /// Gives the connection back.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the connection fails.
    fn close(&mut self) -> BridgeResult<()>;

    /// Returns the time left in the ambient transaction, if it has a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BridgeError::TransactionTimedOut`] once the deadline
    /// has passed.
    fn timeout(&self) -> BridgeResult<Option<Duration>>;
}

/// Creates the [`Transaction`] for each new session.
pub trait TransactionFactory: Send + Sync + fmt::Debug {
    /// Returns the strategy of the transactions this factory creates.
    fn strategy(&self) -> TransactionStrategy;

    /// Creates a transaction over `data_source` in `context`.
    fn new_transaction(
        &self,
        context: ContextHandle,
        data_source: Arc<dyn DataSource>,
    ) -> Box<dyn Transaction>;
}
