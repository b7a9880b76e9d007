//! Exception translation.
//!
//! Raw persistence failures are mapped onto [`crate::DataAccessKind`]
//! through a [`PersistenceExceptionTranslator`]. The translator answers
//! with an explicit [`Translation`] rather than an optional error, so
//! "not mine", "translated" and "pass the inner error through" stay
//! distinct.

mod codes;
mod session;

pub use codes::{sql_state_kind, ErrorCodes, SqlErrorCodeTranslator};
pub use session::SessionExceptionTranslator;

use crate::error::{BridgeError, PersistenceError, TransactionError};
use crate::stats::BridgeStats;
use std::error::Error as StdError;
use std::sync::Arc;

/// Outcome of a translation attempt.
#[derive(Debug, Clone)]
pub enum Translation {
    /// The translator does not handle this kind of error.
    NotApplicable,
    /// The error maps to this bridge error.
    Translated(BridgeError),
    /// The error wraps a transaction-layer failure that must surface as is.
    Unwrapped(TransactionError),
}

impl Translation {
    /// Returns true unless the translator declined the error.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Self::NotApplicable)
    }
}

/// Maps low-level failures to the portable error taxonomy.
pub trait PersistenceExceptionTranslator: Send + Sync {
    /// Translates `error`.
    fn translate(&self, error: &(dyn StdError + 'static)) -> Translation;
}

/// Runs `err` through `translator`, keeping the raw error when there is
/// nothing to translate with or the translator declines.
pub(crate) fn translate_persistence_error(
    translator: Option<&Arc<dyn PersistenceExceptionTranslator>>,
    err: PersistenceError,
    stats: &BridgeStats,
) -> BridgeError {
    let Some(translator) = translator else {
        return BridgeError::Persistence(err);
    };
    match translator.translate(&err) {
        Translation::Translated(translated) => {
            stats.record_translation();
            translated
        }
        Translation::Unwrapped(inner) => BridgeError::Transaction(inner),
        Translation::NotApplicable => BridgeError::Persistence(err),
    }
}
