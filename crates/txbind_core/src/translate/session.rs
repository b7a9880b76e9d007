//! Translator for session failures.

use crate::datasource::DataSource;
use crate::error::{BridgeError, PersistenceCause, PersistenceError};
use crate::translate::codes::SqlErrorCodeTranslator;
use crate::translate::{PersistenceExceptionTranslator, Translation};
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Translates [`PersistenceError`]s raised by sessions.
///
/// SQL causes go through a [`SqlErrorCodeTranslator`] for the data source,
/// built at most once: on first use by default, or right away when lazy
/// initialization is off. Transaction-layer causes are passed through
/// untouched. Anything else becomes [`BridgeError::UnmappedSystem`].
pub struct SessionExceptionTranslator {
    data_source: Arc<dyn DataSource>,
    sql_translator: OnceLock<SqlErrorCodeTranslator>,
}

impl SessionExceptionTranslator {
    /// Creates a translator for `data_source`.
    pub fn new(data_source: Arc<dyn DataSource>, lazy_init: bool) -> Self {
        let translator = Self {
            data_source,
            sql_translator: OnceLock::new(),
        };
        if !lazy_init {
            translator.sql_translator();
        }
        translator
    }

    /// Returns true once the SQL error-code translator has been built.
    pub fn is_initialized(&self) -> bool {
        self.sql_translator.get().is_some()
    }

    fn sql_translator(&self) -> &SqlErrorCodeTranslator {
        self.sql_translator
            .get_or_init(|| SqlErrorCodeTranslator::new(self.data_source.as_ref()))
    }

    fn translate_persistence(&self, error: &PersistenceError) -> Translation {
        let innermost = error.innermost();
        match innermost.cause() {
            Some(PersistenceCause::Sql(sql)) => Translation::Translated(
                self.sql_translator().translate(innermost.message(), sql),
            ),
            Some(PersistenceCause::Transaction(inner)) => Translation::Unwrapped(inner.clone()),
            _ => Translation::Translated(BridgeError::UnmappedSystem {
                cause: error.clone(),
            }),
        }
    }
}

impl PersistenceExceptionTranslator for SessionExceptionTranslator {
    fn translate(&self, error: &(dyn StdError + 'static)) -> Translation {
        let persistence = error.downcast_ref::<PersistenceError>().or_else(|| {
            match error.downcast_ref::<BridgeError>() {
                Some(BridgeError::Persistence(inner)) => Some(inner),
                _ => None,
            }
        });
        match persistence {
            Some(err) => {
                trace!(error = %err, "translating persistence error");
                self.translate_persistence(err)
            }
            None => Translation::NotApplicable,
        }
    }
}

impl fmt::Debug for SessionExceptionTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionExceptionTranslator")
            .field("pool", &self.data_source.pool_id())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
