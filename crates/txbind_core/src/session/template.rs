//! Run work against a context-managed session.

use crate::context::ContextHandle;
use crate::error::{BridgeError, BridgeResult, PersistenceError};
use crate::session::{SessionFactory, SessionManager, SqlSession};
use crate::translate::{
    translate_persistence_error, PersistenceExceptionTranslator, SessionExceptionTranslator,
};
use crate::types::ExecutionMode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs closures against the session of the current context.
///
/// Each call acquires the session (reusing the transaction's one when
/// bound), runs the closure, commits when nobody else owns the session,
/// and always releases. Failures come back translated.
///
/// A template is cheap to clone and can be shared between threads; the
/// context passed to [`SessionTemplate::execute`] decides which session
/// is used.
#[derive(Clone)]
pub struct SessionTemplate {
    factory: Arc<dyn SessionFactory>,
    manager: SessionManager,
    execution_mode: ExecutionMode,
    translator: Arc<dyn PersistenceExceptionTranslator>,
}

impl SessionTemplate {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SessionTemplateBuilder {
        SessionTemplateBuilder::default()
    }

    /// Creates a template with the factory's defaults.
    ///
    /// # Errors
    ///
    /// See [`SessionTemplateBuilder::build`].
    pub fn new(factory: Arc<dyn SessionFactory>) -> BridgeResult<Self> {
        Self::builder().factory(factory).build()
    }

    /// Returns the session factory.
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    /// Returns the execution mode sessions are acquired with.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// Returns the session manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Runs `work` with the context's session.
    ///
    /// # Errors
    ///
    /// Returns acquisition failures as they are, and failures of `work` or
    /// of the commit after translation.
    pub fn execute<T, F>(&self, context: &ContextHandle, work: F) -> BridgeResult<T>
    where
        F: FnOnce(&dyn SqlSession) -> Result<T, PersistenceError>,
    {
        let factory = self.factory.as_ref();
        let session = self.manager.acquire(
            context,
            factory,
            self.execution_mode,
            Some(Arc::clone(&self.translator)),
        )?;

        let outcome = work(session.as_ref()).and_then(|value| {
            if self.factory.config().commit_unmanaged_sessions
                && !self.manager.is_managed(context.as_ref(), &session, factory)
            {
                debug!(factory = %factory.key(), "committing unmanaged session");
                session.commit()?;
            }
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                self.manager.release(context.as_ref(), &session, factory)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(release_err) = self.manager.release(context.as_ref(), &session, factory)
                {
                    warn!(
                        factory = %factory.key(),
                        error = %release_err,
                        "could not release session"
                    );
                }
                Err(self.translate(err))
            }
        }
    }

    fn translate(&self, err: PersistenceError) -> BridgeError {
        translate_persistence_error(Some(&self.translator), err, self.manager.stats())
    }
}

impl fmt::Debug for SessionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTemplate")
            .field("factory", &self.factory.id())
            .field("execution_mode", &self.execution_mode)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionTemplate`].
#[derive(Default)]
pub struct SessionTemplateBuilder {
    factory: Option<Arc<dyn SessionFactory>>,
    execution_mode: Option<ExecutionMode>,
    translator: Option<Arc<dyn PersistenceExceptionTranslator>>,
    manager: Option<SessionManager>,
}

impl SessionTemplateBuilder {
    /// Sets the session factory. Required.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the execution mode. Defaults to the factory's.
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Sets the exception translator. Defaults to a
    /// [`SessionExceptionTranslator`] for the factory's data source.
    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn PersistenceExceptionTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Sets the session manager, to share its statistics.
    #[must_use]
    pub fn manager(mut self, manager: SessionManager) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Builds the template.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Precondition`] if no factory was set.
    pub fn build(self) -> BridgeResult<SessionTemplate> {
        let factory = self
            .factory
            .ok_or_else(|| BridgeError::precondition("No SessionFactory specified"))?;
        let config = factory.config();
        let execution_mode = self
            .execution_mode
            .unwrap_or(config.default_execution_mode);
        let translator: Arc<dyn PersistenceExceptionTranslator> = match self.translator {
            Some(translator) => translator,
            None => Arc::new(SessionExceptionTranslator::new(
                Arc::clone(factory.data_source()),
                config.translator_lazy_init,
            )),
        };
        Ok(SessionTemplate {
            manager: self.manager.unwrap_or_default(),
            execution_mode,
            translator,
            factory,
        })
    }
}
