//! Completion callbacks for a bound session.

use crate::context::{
    lookup_holder, CompletionStatus, ContextRegistry, SynchronizationOrder,
    TransactionSynchronization,
};
use crate::error::{BridgeError, BridgeResult, PersistenceError};
use crate::session::{SessionHolder, SessionResource};
use crate::stats::BridgeStats;
use crate::translate::translate_persistence_error;
use crate::types::ResourceKey;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of a [`SessionSynchronization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSyncState {
    /// Built, not yet bound.
    Created,
    /// Holder bound to the context.
    Active,
    /// Holder detached while an inner transaction runs.
    Suspended,
    /// Transaction completing, session still bound.
    Completing,
    /// Session closed. Terminal.
    Closed,
}

impl fmt::Display for SessionSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Completing => "completing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Commits and closes a bound session in step with its transaction.
///
/// Registered by [`crate::SessionManager`] for every session it binds. It
/// runs just before the connection synchronization so the session is
/// flushed and closed while its connection is still usable.
///
/// Every callback checks and advances [`SessionSyncState`] under a lock,
/// so a callback fired twice (or from two threads) acts once.
pub struct SessionSynchronization {
    holder: Arc<SessionHolder>,
    key: ResourceKey,
    state: Mutex<SessionSyncState>,
    stats: Arc<BridgeStats>,
}

impl SessionSynchronization {
    /// Creates a synchronization for `holder`, bound under `key`.
    pub fn new(holder: Arc<SessionHolder>, key: ResourceKey, stats: Arc<BridgeStats>) -> Self {
        Self {
            holder,
            key,
            state: Mutex::new(SessionSyncState::Created),
            stats,
        }
    }

    /// Marks the holder as bound.
    pub fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SessionSyncState::Created {
            *state = SessionSyncState::Active;
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionSyncState {
        *self.state.lock()
    }

    /// Returns the session holder.
    pub fn holder(&self) -> &Arc<SessionHolder> {
        &self.holder
    }

    fn close_session(&self) {
        debug!(factory = %self.key, "closing transactional session");
        match self.holder.resource().session().close() {
            Ok(()) => self.stats.record_session_closed(),
            Err(err) => {
                self.stats.record_cleanup_failure();
                warn!(factory = %self.key, error = %err, "could not close session on completion");
            }
        }
    }

    /// Unbinds the key only while it still holds this session's holder.
    fn unbind_own(&self, registry: &dyn ContextRegistry) -> bool {
        let ours = lookup_holder::<SessionResource>(registry, &self.key)
            .is_some_and(|bound| Arc::ptr_eq(&bound, &self.holder));
        ours && registry.unbind_resource_if_possible(&self.key)
    }

    fn translate_commit_failure(&self, err: PersistenceError) -> BridgeError {
        translate_persistence_error(self.holder.resource().translator(), err, &self.stats)
    }
}

impl TransactionSynchronization for SessionSynchronization {
    fn order(&self) -> SynchronizationOrder {
        SynchronizationOrder::CONNECTION.before()
    }

    fn suspend(&self, registry: &dyn ContextRegistry) {
        let mut state = self.state.lock();
        if *state == SessionSyncState::Active {
            debug!(factory = %self.key, "suspending session");
            self.unbind_own(registry);
            *state = SessionSyncState::Suspended;
        }
    }

    fn resume(&self, registry: &dyn ContextRegistry) {
        let mut state = self.state.lock();
        if *state == SessionSyncState::Suspended {
            debug!(factory = %self.key, "resuming session");
            match registry.bind_resource(self.key, self.holder.clone()) {
                Ok(()) => *state = SessionSyncState::Active,
                Err(err) => warn!(
                    factory = %self.key,
                    error = %err,
                    "could not rebind session on resume, leaving it suspended"
                ),
            }
        }
    }

    fn before_commit(&self, registry: &dyn ContextRegistry, _read_only: bool) -> BridgeResult<()> {
        if !registry.is_actual_transaction_active()
            || registry.is_rollback_only()
            || self.holder.is_rollback_only()
            || self.state() == SessionSyncState::Closed
        {
            return Ok(());
        }
        debug!(factory = %self.key, "committing transactional session");
        self.holder
            .resource()
            .session()
            .commit()
            .map_err(|err| self.translate_commit_failure(err))?;
        self.stats.record_session_commit();
        Ok(())
    }

    fn before_completion(&self, registry: &dyn ContextRegistry) {
        {
            let mut state = self.state.lock();
            if *state == SessionSyncState::Closed {
                return;
            }
            *state = SessionSyncState::Completing;
            if self.holder.is_open() {
                return;
            }
            if !self.unbind_own(registry) {
                debug!(factory = %self.key, "session already unbound");
            }
            *state = SessionSyncState::Closed;
        }
        self.close_session();
    }

    fn after_completion(&self, registry: &dyn ContextRegistry, _status: CompletionStatus) {
        let closing = {
            let mut state = self.state.lock();
            if *state == SessionSyncState::Closed {
                false
            } else {
                if !self.unbind_own(registry) {
                    self.holder.unbound();
                }
                *state = SessionSyncState::Closed;
                true
            }
        };
        if closing {
            self.close_session();
        }
        self.holder.reset();
    }
}

impl fmt::Debug for SessionSynchronization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSynchronization")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("reference_count", &self.holder.reference_count())
            .finish()
    }
}
