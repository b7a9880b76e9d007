//! SQL error-code translation.

use crate::datasource::DataSource;
use crate::error::{BridgeError, DataAccessKind, SqlError};
use tracing::{debug, warn};

/// Vendor error codes grouped by data-access category, for one family of
/// database products.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodes {
    database_products: Vec<String>,
    use_sql_state: bool,
    categories: Vec<(DataAccessKind, Vec<String>)>,
}

impl ErrorCodes {
    /// Creates an empty table for the given product names.
    #[must_use]
    pub fn new(database_products: &[&str]) -> Self {
        Self {
            database_products: database_products.iter().map(|p| (*p).to_string()).collect(),
            use_sql_state: false,
            categories: Vec::new(),
        }
    }

    /// Matches SQLSTATE values instead of vendor codes.
    #[must_use]
    pub fn use_sql_state(mut self, value: bool) -> Self {
        self.use_sql_state = value;
        self
    }

    /// Adds the codes of one category. Categories are tried in the order
    /// they were added.
    #[must_use]
    pub fn with_codes(mut self, kind: DataAccessKind, codes: &[&str]) -> Self {
        self.categories
            .push((kind, codes.iter().map(|c| (*c).to_string()).collect()));
        self
    }

    /// H2.
    #[must_use]
    pub fn h2() -> Self {
        Self::new(&["H2"])
            .with_codes(
                DataAccessKind::BadSqlGrammar,
                &[
                    "42000", "42001", "42101", "42102", "42111", "42112", "42121", "42122",
                    "42132",
                ],
            )
            .with_codes(DataAccessKind::DuplicateKey, &["23001", "23505"])
            .with_codes(
                DataAccessKind::DataIntegrityViolation,
                &[
                    "22001", "22003", "22012", "22018", "22025", "23000", "23002", "23003",
                    "23502", "23503", "23506", "23507", "23513",
                ],
            )
            .with_codes(
                DataAccessKind::DataAccessResourceFailure,
                &["90046", "90100", "90117", "90121", "90126"],
            )
            .with_codes(DataAccessKind::CannotAcquireLock, &["50200"])
    }

    /// MySQL and MariaDB.
    #[must_use]
    pub fn mysql() -> Self {
        Self::new(&["MySQL", "MariaDB"])
            .with_codes(DataAccessKind::BadSqlGrammar, &["1054", "1064", "1146"])
            .with_codes(DataAccessKind::DuplicateKey, &["1062"])
            .with_codes(
                DataAccessKind::DataIntegrityViolation,
                &[
                    "630", "839", "840", "893", "1169", "1215", "1216", "1217", "1364", "1451",
                    "1452", "1557",
                ],
            )
            .with_codes(DataAccessKind::DataAccessResourceFailure, &["1"])
            .with_codes(DataAccessKind::CannotAcquireLock, &["1205", "3572"])
            .with_codes(DataAccessKind::DeadlockLoser, &["1213"])
    }

    /// PostgreSQL, keyed by SQLSTATE.
    #[must_use]
    pub fn postgresql() -> Self {
        Self::new(&["PostgreSQL"])
            .use_sql_state(true)
            .with_codes(
                DataAccessKind::BadSqlGrammar,
                &["03000", "42000", "42601", "42602", "42622", "42804", "42P01"],
            )
            .with_codes(DataAccessKind::DuplicateKey, &["21000", "23505"])
            .with_codes(
                DataAccessKind::DataIntegrityViolation,
                &["23000", "23502", "23503", "23514"],
            )
            .with_codes(
                DataAccessKind::DataAccessResourceFailure,
                &["53000", "53100", "53200", "53300"],
            )
            .with_codes(DataAccessKind::CannotAcquireLock, &["55P03"])
            .with_codes(DataAccessKind::CannotSerializeTransaction, &["40001"])
            .with_codes(DataAccessKind::DeadlockLoser, &["40P01"])
    }

    /// Returns the built-in tables.
    #[must_use]
    pub fn builtin() -> Vec<Self> {
        vec![Self::h2(), Self::mysql(), Self::postgresql()]
    }

    /// Returns the built-in table for a database product name.
    #[must_use]
    pub fn for_product(name: &str) -> Option<Self> {
        Self::builtin()
            .into_iter()
            .find(|codes| codes.matches_product(name))
    }

    /// Returns true if this table applies to `name`.
    #[must_use]
    pub fn matches_product(&self, name: &str) -> bool {
        self.database_products.iter().any(|product| product == name)
    }

    /// Returns the category of `error`, if its code is listed.
    #[must_use]
    pub fn kind_for(&self, error: &SqlError) -> Option<DataAccessKind> {
        let code = if self.use_sql_state {
            error.sql_state.clone()?
        } else {
            error.error_code.to_string()
        };
        self.categories
            .iter()
            .find(|(_, codes)| codes.contains(&code))
            .map(|(kind, _)| *kind)
    }
}

/// Maps [`SqlError`]s to [`DataAccessKind`]s using the error-code table of
/// the data source's database product, falling back to SQLSTATE classes.
#[derive(Debug, Clone)]
pub struct SqlErrorCodeTranslator {
    codes: Option<ErrorCodes>,
}

impl SqlErrorCodeTranslator {
    /// Creates a translator for the product behind `data_source`.
    ///
    /// If the product cannot be determined only the SQLSTATE fallback is
    /// used.
    pub fn new(data_source: &dyn DataSource) -> Self {
        let codes = match data_source.database_product_name() {
            Ok(product) => {
                let codes = ErrorCodes::for_product(&product);
                debug!(%product, known = codes.is_some(), "loaded SQL error codes");
                codes
            }
            Err(err) => {
                warn!(
                    pool = %data_source.pool_id(),
                    error = %err,
                    "could not determine database product; using SQLSTATE translation only"
                );
                None
            }
        };
        Self { codes }
    }

    /// Creates a translator with an explicit table.
    #[must_use]
    pub fn with_codes(codes: ErrorCodes) -> Self {
        Self { codes: Some(codes) }
    }

    /// Returns the error-code table in use.
    #[must_use]
    pub fn codes(&self) -> Option<&ErrorCodes> {
        self.codes.as_ref()
    }

    /// Returns the category of `error`.
    #[must_use]
    pub fn kind_for(&self, error: &SqlError) -> DataAccessKind {
        self.codes
            .as_ref()
            .and_then(|codes| codes.kind_for(error))
            .unwrap_or_else(|| sql_state_kind(error))
    }

    /// Translates `error`, raised while running `task`.
    #[must_use]
    pub fn translate(&self, task: &str, error: &SqlError) -> BridgeError {
        BridgeError::TranslatedPersistence {
            kind: self.kind_for(error),
            message: task.to_string(),
            cause: error.clone(),
        }
    }
}

/// Classifies `error` by the first two characters of its SQLSTATE.
#[must_use]
pub fn sql_state_kind(error: &SqlError) -> DataAccessKind {
    let class = error
        .sql_state
        .as_deref()
        .and_then(|state| state.get(..2));
    match class {
        Some("07" | "37" | "42") => DataAccessKind::BadSqlGrammar,
        Some("21" | "22" | "23" | "27" | "44") => DataAccessKind::DataIntegrityViolation,
        Some("08" | "53" | "54" | "57" | "58") => DataAccessKind::DataAccessResourceFailure,
        Some("40") => DataAccessKind::ConcurrencyFailure,
        _ => DataAccessKind::Uncategorized,
    }
}
