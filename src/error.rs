//! Stable, user-visible error kinds for the engine.

use thiserror::Error;

/// The engine's top-level, user-visible error type.
///
/// Every variant corresponds to one of the error kinds a caller can match on; the display
/// message carries the underlying diagnostic where one exists.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("engine is closed")]
    EngineClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("no rules found for business code {0:?}")]
    RuleNotFound(String),

    #[error("rule store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("evaluate error: {0}")]
    Evaluate(String),

    #[error("input could not be normalised: {0}")]
    InputInvalid(String),

    #[error("result projection failed: {0}")]
    Projection(String),
}

impl EngineError {
    /// Stable machine-readable kind, for callers that want to match without depending on
    /// message text.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ConfigInvalid(_) => "config-invalid",
            EngineError::EngineClosed => "engine-closed",
            EngineError::Cancelled => "cancelled",
            EngineError::RuleNotFound(_) => "rule-not-found",
            EngineError::Store(_) => "store",
            EngineError::Compile(_) => "compile",
            EngineError::Evaluate(_) => "evaluate",
            EngineError::InputInvalid(_) => "input-invalid",
            EngineError::Projection(_) => "projection",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
