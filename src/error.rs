use thiserror::Error;
use uuid::Uuid;

use crate::adapters::Action;
use crate::lifecycle::Stage;

/// Result alias used across the crate.
pub type Result<T, E = CuratorError> = std::result::Result<T, E>;

/// Every failure the curation core can report.
#[derive(Debug, Error)]
pub enum CuratorError {
    /// Network failure or timeout reaching an external adapter.
    /// `permanent` marks failures that will not heal on retry (bad credentials).
    #[error("adapter unavailable: {message}")]
    AdapterUnavailable { message: String, permanent: bool },

    #[error("malformed adapter response: {0}")]
    MalformedResponse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("pipeline timed out after {completed_steps}/{total_steps} steps")]
    ExecutionTimeout {
        completed_steps: usize,
        total_steps: usize,
    },

    #[error("critical step {step} failed: {message}")]
    CriticalStepFailure { step: usize, message: String },

    #[error("permission denied: {actor} may not {action}")]
    PermissionDenied { actor: String, action: Action },

    #[error("duplicate url {url} (already held by record {existing})")]
    Duplicate { url: String, existing: Uuid },

    #[error("cannot {action} a record in stage {from}")]
    InvalidTransition { from: Stage, action: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CuratorError {
    pub fn adapter(message: impl Into<String>) -> Self {
        CuratorError::AdapterUnavailable {
            message: message.into(),
            permanent: false,
        }
    }

    /// Adapter failures and unparsable responses are healed locally
    /// (fallback scorer or retry queue). Everything else reaches the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CuratorError::AdapterUnavailable { .. } | CuratorError::MalformedResponse(_)
        )
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CuratorError::AdapterUnavailable {
                permanent: true,
                ..
            }
        )
    }
}
