//! Persistence sessions and their lifecycle.
//!
//! - [`SessionManager`] hands out sessions, reusing the one bound to the
//!   ambient transaction when there is one
//! - [`SessionSynchronization`] commits and closes a bound session when
//!   its transaction completes
//! - [`SessionFactoryBuilder`] assembles a factory from a data source, a
//!   transaction factory and a [`SessionEngine`]
//! - [`SessionTemplate`] runs closures against a managed session

mod factory;
mod manager;
mod synchronization;
mod template;

pub use factory::{ConfiguredSessionFactory, SessionEngine, SessionFactoryBuilder};
pub use manager::SessionManager;
pub use synchronization::{SessionSyncState, SessionSynchronization};
pub use template::{SessionTemplate, SessionTemplateBuilder};

use crate::config::Config;
use crate::context::{ContextHandle, ResourceHolder};
use crate::datasource::DataSource;
use crate::error::{BridgeResult, PersistenceError};
use crate::transaction::TransactionStrategy;
use crate::translate::PersistenceExceptionTranslator;
use crate::types::{ExecutionMode, FactoryId, ResourceKey};
use std::fmt;
use std::sync::Arc;

/// A persistence session: executes statements on one connection and must
/// be committed, rolled back and closed once per logical transaction.
pub trait SqlSession: Send + Sync + fmt::Debug {
    /// Returns the mode the session was opened with.
    fn execution_mode(&self) -> ExecutionMode;

    /// Flushes pending statements and commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the commit fails.
    fn commit(&self) -> Result<(), PersistenceError>;

    /// Discards pending statements and rolls back.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    fn rollback(&self) -> Result<(), PersistenceError>;

    /// Closes the session and gives its connection back.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be closed cleanly.
    fn close(&self) -> Result<(), PersistenceError>;

    /// Returns false once the session is closed.
    fn is_open(&self) -> bool;
}

/// Opens sessions.
pub trait SessionFactory: Send + Sync {
    /// Returns the factory identifier.
    fn id(&self) -> FactoryId;

    /// Returns the factory configuration.
    fn config(&self) -> &Config;

    /// Returns the strategy of the factory's transactions.
    fn strategy(&self) -> TransactionStrategy;

    /// Returns the data source sessions run against.
    fn data_source(&self) -> &Arc<dyn DataSource>;

    /// Opens a new session in `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened.
    fn open_session(
        &self,
        context: &ContextHandle,
        mode: ExecutionMode,
    ) -> BridgeResult<Arc<dyn SqlSession>>;

    /// Returns the key the factory's session is bound under.
    fn key(&self) -> ResourceKey {
        ResourceKey::Factory(self.id())
    }
}

/// What a session holder carries.
#[derive(Clone)]
pub struct SessionResource {
    session: Arc<dyn SqlSession>,
    execution_mode: ExecutionMode,
    translator: Option<Arc<dyn PersistenceExceptionTranslator>>,
}

impl SessionResource {
    /// Creates a session resource.
    pub fn new(
        session: Arc<dyn SqlSession>,
        execution_mode: ExecutionMode,
        translator: Option<Arc<dyn PersistenceExceptionTranslator>>,
    ) -> Self {
        Self {
            session,
            execution_mode,
            translator,
        }
    }

    /// Returns the session.
    pub fn session(&self) -> &Arc<dyn SqlSession> {
        &self.session
    }

    /// Returns the execution mode.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Returns the exception translator.
    pub fn translator(&self) -> Option<&Arc<dyn PersistenceExceptionTranslator>> {
        self.translator.as_ref()
    }
}

impl fmt::Debug for SessionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResource")
            .field("session", &self.session)
            .field("execution_mode", &self.execution_mode)
            .field("translator", &self.translator.is_some())
            .finish()
    }
}

/// Holder of a session bound to an execution context.
pub type SessionHolder = ResourceHolder<SessionResource>;

/// Returns true if `a` and `b` are the same session.
pub(crate) fn same_session(a: &Arc<dyn SqlSession>, b: &Arc<dyn SqlSession>) -> bool {
    Arc::ptr_eq(a, b)
}
