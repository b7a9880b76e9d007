//! # txbind Core
//!
//! Binds persistence sessions to an ambient transaction.
//!
//! A session (an ORM-style handle that executes statements) must be
//! committed, rolled back and closed exactly once per logical transaction,
//! while the transaction itself is driven by someone else. This crate sits
//! between the two:
//! - an execution-context registry that binds resources and completion
//!   callbacks to one logical unit of execution
//! - a session manager that reuses the bound session or opens a new one
//! - a synchronization that commits and closes the session in step with
//!   the transaction, including suspend/resume of nested scopes
//! - a transaction adapter that lets a connection either join the ambient
//!   transaction or run standalone
//! - exception translation into a portable error taxonomy
//!
//! ## Design Principles
//!
//! - Context is passed explicitly; nothing is looked up from thread-locals
//! - Connection pools, transaction managers and statement execution are
//!   consumed through traits
//! - Completion callbacks are idempotent
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use txbind_core::{CompletionStatus, ContextRegistry, ExecutionContext};
//!
//! let context = Arc::new(ExecutionContext::new());
//! context.init_synchronization().unwrap();
//! context.set_actual_transaction_active(true);
//!
//! // ... acquire and release sessions through a SessionManager ...
//!
//! context.trigger_before_commit(false).unwrap();
//! context.trigger_before_completion();
//! context.trigger_after_completion(CompletionStatus::Committed);
//! assert!(context.is_synchronization_active());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod datasource;
mod error;
mod session;
mod stats;
mod transaction;
mod translate;
mod types;

#[cfg(test)]
mod test_support;

pub use config::{Config, DEFAULT_ENVIRONMENT_ID};
pub use context::{
    downcast_holder, lookup_holder, BoundResource, CompletionStatus, ContextHandle,
    ContextRegistry, ExecutionContext, ResourceHolder, ResumeError, SuspendedScope,
    SynchronizationOrder, TransactionSynchronization,
};
pub use datasource::{
    Connection, ConnectionHolder, ConnectionProvider, ConnectionSynchronization,
    ContextConnectionProvider, DataSource,
};
pub use error::{
    BridgeError, BridgeResult, DataAccessKind, PersistenceCause, PersistenceError, SqlError,
    TransactionError,
};
pub use session::{
    ConfiguredSessionFactory, SessionEngine, SessionFactory, SessionFactoryBuilder,
    SessionHolder, SessionManager, SessionResource, SessionSyncState, SessionSynchronization,
    SessionTemplate, SessionTemplateBuilder, SqlSession,
};
pub use stats::{BridgeStats, StatsSnapshot};
pub use transaction::{
    ManagedTransaction, ManagedTransactionFactory, Transaction, TransactionFactory,
    TransactionStrategy,
};
pub use translate::{
    sql_state_kind, ErrorCodes, PersistenceExceptionTranslator, SessionExceptionTranslator,
    SqlErrorCodeTranslator, Translation,
};
pub use types::{ContextId, ExecutionMode, FactoryId, PoolId, ResourceKey};
