//! Transaction synchronization callbacks.

use crate::context::ContextRegistry;
use crate::error::BridgeResult;
use std::fmt;

/// Priority of a synchronization; lower values fire first.
///
/// Contexts keep their synchronizations sorted by this value when they
/// are registered. Equal values fire in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SynchronizationOrder(i32);

impl SynchronizationOrder {
    /// Fires before everything else.
    pub const HIGHEST: Self = Self(i32::MIN);

    /// Fires after everything else; the default.
    pub const LOWEST: Self = Self(i32::MAX);

    /// Order of the connection-resource synchronization.
    ///
    /// Session work must run strictly before it so that statements are
    /// flushed before the connection commits.
    pub const CONNECTION: Self = Self(1000);

    /// Creates an order from a raw value.
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Returns the order that fires immediately before this one.
    #[must_use]
    pub const fn before(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl Default for SynchronizationOrder {
    fn default() -> Self {
        Self::LOWEST
    }
}

impl fmt::Display for SynchronizationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the owning transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
    /// The outcome is unknown (e.g. a heuristic failure).
    Unknown,
}

/// Callbacks fired at well-defined points of a transaction's lifecycle.
///
/// The context passes itself to every callback so implementations can
/// unbind or rebind their resources without holding a reference to it.
///
/// Completion callbacks may be invoked twice or from another thread;
/// implementations must make them idempotent.
pub trait TransactionSynchronization: Send + Sync {
    /// Returns the firing priority.
    fn order(&self) -> SynchronizationOrder {
        SynchronizationOrder::LOWEST
    }

    /// The transaction is being suspended; unbind resources.
    fn suspend(&self, _registry: &dyn ContextRegistry) {}

    /// The transaction is being resumed; rebind resources.
    fn resume(&self, _registry: &dyn ContextRegistry) {}

    /// Called before commit, after the commit decision was made.
    ///
    /// An error here aborts the commit.
    ///
    /// # Errors
    ///
    /// Returns the failure that should abort the commit.
    fn before_commit(
        &self,
        _registry: &dyn ContextRegistry,
        _read_only: bool,
    ) -> BridgeResult<()> {
        Ok(())
    }

    /// Called before commit or rollback.
    fn before_completion(&self, _registry: &dyn ContextRegistry) {}

    /// Called after a successful commit.
    fn after_commit(&self, _registry: &dyn ContextRegistry) {}

    /// Called after commit or rollback. Must not fail.
    fn after_completion(&self, _registry: &dyn ContextRegistry, _status: CompletionStatus) {}
}
