//! Session factory configuration.

use crate::types::ExecutionMode;

/// Default environment identifier for factories built by
/// [`crate::SessionFactoryBuilder`].
pub const DEFAULT_ENVIRONMENT_ID: &str = "SessionFactoryBuilder";

/// Configuration for a session factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the environment (data source + transaction strategy).
    pub environment_id: String,

    /// Execution mode used when a caller does not ask for one.
    pub default_execution_mode: ExecutionMode,

    /// Whether the SQL error-code translator is built on first use
    /// rather than when the exception translator is created.
    pub translator_lazy_init: bool,

    /// Whether a template commits sessions that are not bound to a
    /// transaction after each successful operation.
    pub commit_unmanaged_sessions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment_id: DEFAULT_ENVIRONMENT_ID.to_string(),
            default_execution_mode: ExecutionMode::Simple,
            translator_lazy_init: true,
            commit_unmanaged_sessions: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the environment identifier.
    #[must_use]
    pub fn environment_id(mut self, id: impl Into<String>) -> Self {
        self.environment_id = id.into();
        self
    }

    /// Sets the default execution mode.
    #[must_use]
    pub const fn default_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.default_execution_mode = mode;
        self
    }

    /// Sets whether the SQL error-code translator is built lazily.
    #[must_use]
    pub const fn translator_lazy_init(mut self, value: bool) -> Self {
        self.translator_lazy_init = value;
        self
    }

    /// Sets whether templates commit unmanaged sessions.
    #[must_use]
    pub const fn commit_unmanaged_sessions(mut self, value: bool) -> Self {
        self.commit_unmanaged_sessions = value;
        self
    }
}
