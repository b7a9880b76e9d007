//! Session acquisition and release.

use crate::context::{lookup_holder, ContextHandle, ContextRegistry};
use crate::error::{BridgeError, BridgeResult};
use crate::session::{
    same_session, SessionFactory, SessionHolder, SessionResource, SessionSynchronization,
    SqlSession,
};
use crate::stats::BridgeStats;
use crate::transaction::TransactionStrategy;
use crate::translate::PersistenceExceptionTranslator;
use crate::types::{ExecutionMode, ResourceKey};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides whether a caller gets the session bound to the ambient
/// transaction or a fresh one.
///
/// # Example
///
/// ```rust,ignore
/// let manager = SessionManager::new();
/// let session = manager.acquire(&context, &*factory, ExecutionMode::Simple, None)?;
/// // ... run statements ...
/// manager.release(context.as_ref(), &session, &*factory)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    stats: Arc<BridgeStats>,
}

impl SessionManager {
    /// Creates a manager with its own statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager recording into `stats`.
    #[must_use]
    pub fn with_stats(stats: Arc<BridgeStats>) -> Self {
        Self { stats }
    }

    /// Returns the statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<BridgeStats> {
        &self.stats
    }

    /// Returns a session for `factory` in `context`.
    ///
    /// A session already bound to the ambient transaction is reused. A new
    /// session is bound to the transaction when synchronization is active
    /// and the factory uses managed transactions; otherwise it is returned
    /// unmanaged and the caller must release it.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::ConfigurationConflict`] if the bound session was
    ///   opened with another execution mode
    /// - [`BridgeError::IncompatibleTransactionStrategy`] if the factory
    ///   uses a foreign strategy while the ambient transaction already owns
    ///   a connection of its data source
    /// - any error from opening or binding the session; nothing stays bound
    pub fn acquire(
        &self,
        context: &ContextHandle,
        factory: &dyn SessionFactory,
        mode: ExecutionMode,
        translator: Option<Arc<dyn PersistenceExceptionTranslator>>,
    ) -> BridgeResult<Arc<dyn SqlSession>> {
        let registry = context.as_ref();
        let key = factory.key();

        if let Some(holder) = lookup_holder::<SessionResource>(registry, &key) {
            if holder.is_synchronized_with_transaction() {
                let bound_mode = holder.resource().execution_mode();
                if bound_mode != mode {
                    return Err(BridgeError::configuration_conflict(format!(
                        "cannot change the execution mode from {bound_mode} to {mode} \
                         when there is an existing transaction"
                    )));
                }
                holder.requested();
                self.stats.record_session_reused();
                debug!(factory = %key, %mode, "fetched session from current transaction");
                return Ok(Arc::clone(holder.resource().session()));
            }
        }

        let synchronizing = registry.is_synchronization_active();
        let managed = factory.strategy() == TransactionStrategy::Managed;
        if synchronizing && !managed {
            let pool = ResourceKey::Pool(factory.data_source().pool_id());
            if registry.has_resource(&pool) {
                return Err(BridgeError::incompatible_strategy(format!(
                    "factory {} uses {} transactions but the current transaction \
                     already holds a connection of {pool}",
                    factory.id(),
                    factory.strategy()
                )));
            }
        }

        debug!(factory = %key, %mode, "creating a new session");
        let session = factory.open_session(context, mode)?;
        self.stats.record_session_opened();

        if !synchronizing {
            debug!(factory = %key, "session was not registered for synchronization");
            return Ok(session);
        }
        if !managed {
            debug!(
                factory = %key,
                "session was not registered for synchronization: data source is not transactional"
            );
            return Ok(session);
        }

        self.bind(registry, key, &session, mode, translator)?;
        Ok(session)
    }

    /// Same as [`SessionManager::acquire`] with the factory's default
    /// execution mode and no translator.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::acquire`].
    pub fn acquire_default(
        &self,
        context: &ContextHandle,
        factory: &dyn SessionFactory,
    ) -> BridgeResult<Arc<dyn SqlSession>> {
        let mode = factory.config().default_execution_mode;
        self.acquire(context, factory, mode, None)
    }

    /// Gives a session back.
    ///
    /// A session bound to the ambient transaction only has its reference
    /// count decremented; the synchronization closes it later. Anything
    /// else is closed now.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Persistence`] if closing an unmanaged session
    /// fails.
    pub fn release(
        &self,
        context: &dyn ContextRegistry,
        session: &Arc<dyn SqlSession>,
        factory: &dyn SessionFactory,
    ) -> BridgeResult<()> {
        let key = factory.key();
        if let Some(holder) = bound_holder(context, &key, session) {
            debug!(factory = %key, "releasing transactional session");
            holder.released();
            self.stats.record_session_released();
            return Ok(());
        }

        debug!(factory = %key, "closing non transactional session");
        session.close()?;
        self.stats.record_session_closed();
        Ok(())
    }

    /// Returns true if `session` is the one bound to the ambient
    /// transaction for `factory`.
    pub fn is_managed(
        &self,
        context: &dyn ContextRegistry,
        session: &Arc<dyn SqlSession>,
        factory: &dyn SessionFactory,
    ) -> bool {
        bound_holder(context, &factory.key(), session).is_some()
    }

    fn bind(
        &self,
        registry: &dyn ContextRegistry,
        key: ResourceKey,
        session: &Arc<dyn SqlSession>,
        mode: ExecutionMode,
        translator: Option<Arc<dyn PersistenceExceptionTranslator>>,
    ) -> BridgeResult<()> {
        debug!(factory = %key, "registering transaction synchronization for session");
        let holder = Arc::new(SessionHolder::new(SessionResource::new(
            Arc::clone(session),
            mode,
            translator,
        )));
        let synchronization = Arc::new(SessionSynchronization::new(
            Arc::clone(&holder),
            key,
            Arc::clone(&self.stats),
        ));

        if let Err(err) = registry.bind_resource(key, holder.clone()) {
            close_quietly(key, session);
            return Err(err);
        }
        synchronization.activate();
        if let Err(err) = registry.register_synchronization(synchronization) {
            registry.unbind_resource_if_possible(&key);
            close_quietly(key, session);
            return Err(err);
        }

        holder.set_synchronized_with_transaction(true);
        holder.requested();
        Ok(())
    }
}

fn close_quietly(key: ResourceKey, session: &Arc<dyn SqlSession>) {
    if let Err(err) = session.close() {
        warn!(factory = %key, error = %err, "could not close session after failed binding");
    }
}

fn bound_holder(
    context: &dyn ContextRegistry,
    key: &ResourceKey,
    session: &Arc<dyn SqlSession>,
) -> Option<Arc<SessionHolder>> {
    lookup_holder::<SessionResource>(context, key)
        .filter(|holder| same_session(holder.resource().session(), session))
}
