// Error types for the suite-execution core.
//
// One variant per row of the error-kind table (spec.md S7). Each carries a
// constructor helper and maps to the user-visible behavior described there;
// the workflow runtime and engine decide retry/terminal-status policy based
// on the variant, not on string matching.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, RocketshipError>;

#[derive(Debug, Error)]
pub enum RocketshipError {
    /// Suite YAML failed validation (unknown plugin, duplicate names, bad syntax).
    #[error("suite invalid: {0}")]
    PlanInvalid(String),

    /// A template reference named a key that isn't in scope.
    #[error("undefined template key '{key}' (available: [{available}])")]
    TemplateUndefined { key: String, available: String },

    /// A plugin's config block didn't match its expected schema.
    #[error("invalid config for plugin '{plugin}': {message}")]
    PluginConfigInvalid { plugin: String, message: String },

    /// An assertion did not hold.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// Network/DNS/5xx/timeout - retried by the workflow runtime.
    #[error("transient error: {0}")]
    Transient(String),

    /// Context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Engine/store/runtime failure unrelated to suite content.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RocketshipError {
    pub fn plan_invalid(msg: impl Into<String>) -> Self {
        RocketshipError::PlanInvalid(msg.into())
    }

    pub fn template_undefined(key: impl Into<String>, available: &[String]) -> Self {
        let mut sorted = available.to_vec();
        sorted.sort();
        RocketshipError::TemplateUndefined {
            key: key.into(),
            available: sorted.join(", "),
        }
    }

    pub fn plugin_config_invalid(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        RocketshipError::PluginConfigInvalid {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn assertion_failed(msg: impl Into<String>) -> Self {
        RocketshipError::AssertionFailed(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        RocketshipError::Transient(msg.into())
    }

    /// Whether the workflow runtime should retry this failure (spec.md S4.4/S7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RocketshipError::Transient(_))
    }
}
