//! Error types for the session bridge.
//!
//! Three layers of failure meet here:
//! - [`SqlError`] is what a raw connection reports.
//! - [`PersistenceError`] is what a session reports; it may wrap a SQL
//!   failure, a transaction-layer failure or another persistence error.
//! - [`BridgeError`] is what the bridge itself surfaces, including the
//!   normalized translations of the two above.

use crate::types::ResourceKey;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced by the session bridge.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A bound session was requested with a different execution mode.
    #[error("configuration conflict: {message}")]
    ConfigurationConflict {
        /// Description of the conflict.
        message: String,
    },

    /// The session factory cannot take part in the active transaction.
    #[error("incompatible transaction strategy: {message}")]
    IncompatibleTransactionStrategy {
        /// Description of the incompatibility.
        message: String,
    },

    /// A required input was missing.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Which input was missing.
        message: String,
    },

    /// A low-level failure mapped onto a portable data-access category.
    #[error("{kind}: {message}")]
    TranslatedPersistence {
        /// The data-access category.
        kind: DataAccessKind,
        /// Context of the failing operation.
        message: String,
        /// The underlying SQL failure.
        #[source]
        cause: SqlError,
    },

    /// A persistence failure with no specific mapping.
    #[error("uncategorized persistence failure: {cause}")]
    UnmappedSystem {
        /// The original persistence failure.
        #[source]
        cause: PersistenceError,
    },

    /// An untranslated persistence failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A transaction-layer failure, passed through unwrapped.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A connection-level failure.
    #[error("connection error: {0}")]
    Sql(#[from] SqlError),

    /// A resource is already bound under this key.
    #[error("resource already bound for key {key}")]
    AlreadyBound {
        /// The key that was already taken.
        key: ResourceKey,
    },

    /// No resource is bound under this key.
    #[error("no resource bound for key {key}")]
    NotBound {
        /// The key that was looked up.
        key: ResourceKey,
    },

    /// Transaction synchronization is not active for the context.
    #[error("transaction synchronization is not active")]
    SynchronizationInactive,

    /// Transaction synchronization is already active for the context.
    #[error("transaction synchronization is already active")]
    SynchronizationAlreadyActive,

    /// The transaction deadline has passed.
    #[error("transaction timed out: deadline exceeded by {overrun:?}")]
    TransactionTimedOut {
        /// How far past the deadline the check happened.
        overrun: Duration,
    },
}

impl BridgeError {
    /// Creates a configuration conflict error.
    pub fn configuration_conflict(message: impl Into<String>) -> Self {
        Self::ConfigurationConflict {
            message: message.into(),
        }
    }

    /// Creates an incompatible transaction strategy error.
    pub fn incompatible_strategy(message: impl Into<String>) -> Self {
        Self::IncompatibleTransactionStrategy {
            message: message.into(),
        }
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Returns the data-access category if this is a translated failure.
    #[must_use]
    pub fn data_access_kind(&self) -> Option<DataAccessKind> {
        match self {
            Self::TranslatedPersistence { kind, .. } => Some(*kind),
            Self::UnmappedSystem { .. } => Some(DataAccessKind::Uncategorized),
            _ => None,
        }
    }
}

/// Portable data-access failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataAccessKind {
    /// Invalid SQL or reference to a missing object.
    BadSqlGrammar,
    /// Unique constraint violation.
    DuplicateKey,
    /// Any other integrity constraint violation.
    DataIntegrityViolation,
    /// The database or connection is unavailable.
    DataAccessResourceFailure,
    /// A resource failure that may succeed on retry.
    TransientDataAccessResource,
    /// A lock could not be acquired.
    CannotAcquireLock,
    /// The transaction could not be serialized.
    CannotSerializeTransaction,
    /// The transaction was chosen as a deadlock victim.
    DeadlockLoser,
    /// Generic concurrency failure.
    ConcurrencyFailure,
    /// Insufficient privileges.
    PermissionDenied,
    /// No specific category applies.
    Uncategorized,
}

impl DataAccessKind {
    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::TransientDataAccessResource
                | Self::CannotAcquireLock
                | Self::CannotSerializeTransaction
                | Self::DeadlockLoser
                | Self::ConcurrencyFailure
        )
    }
}

impl fmt::Display for DataAccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadSqlGrammar => "bad SQL grammar",
            Self::DuplicateKey => "duplicate key",
            Self::DataIntegrityViolation => "data integrity violation",
            Self::DataAccessResourceFailure => "data access resource failure",
            Self::TransientDataAccessResource => "transient data access resource failure",
            Self::CannotAcquireLock => "cannot acquire lock",
            Self::CannotSerializeTransaction => "cannot serialize transaction",
            Self::DeadlockLoser => "deadlock loser",
            Self::ConcurrencyFailure => "concurrency failure",
            Self::PermissionDenied => "permission denied",
            Self::Uncategorized => "uncategorized data access failure",
        };
        f.write_str(name)
    }
}

/// A failure reported by a database connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// Driver message.
    pub message: String,
    /// Five-character SQLSTATE, when the driver reports one.
    pub sql_state: Option<String>,
    /// Vendor-specific error code (0 when unknown).
    pub error_code: i32,
}

impl SqlError {
    /// Creates a SQL error with no state or vendor code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            error_code: 0,
        }
    }

    /// Sets the SQLSTATE.
    #[must_use]
    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    /// Sets the vendor error code.
    #[must_use]
    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = code;
        self
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        match &self.sql_state {
            Some(state) => write!(f, " [SQLSTATE {state}, code {}]", self.error_code),
            None => write!(f, " [code {}]", self.error_code),
        }
    }
}

impl StdError for SqlError {}

/// A failure raised by the transaction layer itself.
///
/// These are never wrapped by the translator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction error: {message}")]
pub struct TransactionError {
    /// Description of the failure.
    pub message: String,
}

impl TransactionError {
    /// Creates a transaction error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What caused a [`PersistenceError`].
#[derive(Debug, Clone)]
pub enum PersistenceCause {
    /// A nested persistence failure.
    Persistence(Box<PersistenceError>),
    /// A SQL failure from the connection.
    Sql(SqlError),
    /// A transaction-layer failure.
    Transaction(TransactionError),
    /// Anything else.
    Other(Arc<dyn StdError + Send + Sync>),
}

impl PersistenceCause {
    fn as_error(&self) -> &(dyn StdError + 'static) {
        match self {
            Self::Persistence(inner) => inner.as_ref(),
            Self::Sql(err) => err,
            Self::Transaction(err) => err,
            Self::Other(err) => err.as_ref(),
        }
    }
}

/// A failure reported by a persistence session.
#[derive(Debug, Clone)]
pub struct PersistenceError {
    message: String,
    cause: Option<PersistenceCause>,
}

impl PersistenceError {
    /// Creates a persistence error with no cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a persistence error caused by a SQL failure.
    pub fn sql(message: impl Into<String>, cause: SqlError) -> Self {
        Self::new(message).caused_by(PersistenceCause::Sql(cause))
    }

    /// Creates a persistence error caused by a transaction-layer failure.
    pub fn transaction(message: impl Into<String>, cause: TransactionError) -> Self {
        Self::new(message).caused_by(PersistenceCause::Transaction(cause))
    }

    /// Creates a persistence error wrapping another one.
    pub fn wrapping(message: impl Into<String>, inner: PersistenceError) -> Self {
        Self::new(message).caused_by(PersistenceCause::Persistence(Box::new(inner)))
    }

    /// Creates a persistence error caused by an arbitrary error.
    pub fn other(
        message: impl Into<String>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::new(message).caused_by(PersistenceCause::Other(Arc::new(cause)))
    }

    /// Sets the cause.
    #[must_use]
    pub fn caused_by(mut self, cause: PersistenceCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the direct cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&PersistenceCause> {
        self.cause.as_ref()
    }

    /// Follows nested persistence causes down to the innermost one.
    #[must_use]
    pub fn innermost(&self) -> &PersistenceError {
        let mut current = self;
        while let Some(PersistenceCause::Persistence(inner)) = &current.cause {
            current = inner;
        }
        current
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(PersistenceCause::as_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_follows_nested_persistence() {
        let sql = SqlError::new("duplicate").with_error_code(1062);
        let inner = PersistenceError::sql("insert failed", sql);
        let outer = PersistenceError::wrapping("flush failed", inner);

        let innermost = outer.innermost();
        assert_eq!(innermost.message(), "insert failed");
        assert!(matches!(innermost.cause(), Some(PersistenceCause::Sql(_))));
    }

    #[test]
    fn source_chain_reaches_sql_error() {
        let err = PersistenceError::sql("boom", SqlError::new("bad table"));
        let source = err.source().expect("has source");
        assert!(source.downcast_ref::<SqlError>().is_some());
    }

    #[test]
    fn sql_error_display() {
        let err = SqlError::new("unique violation").with_sql_state("23505");
        assert_eq!(err.to_string(), "unique violation [SQLSTATE 23505, code 0]");
    }

    #[test]
    fn translated_kind_is_exposed() {
        let err = BridgeError::TranslatedPersistence {
            kind: DataAccessKind::DeadlockLoser,
            message: "update".into(),
            cause: SqlError::new("deadlock"),
        };
        assert_eq!(err.data_access_kind(), Some(DataAccessKind::DeadlockLoser));
        assert!(DataAccessKind::DeadlockLoser.is_transient());
        assert!(!DataAccessKind::DuplicateKey.is_transient());
    }
}
