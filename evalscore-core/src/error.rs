//! Error types for the evalscore-core crate.

use thiserror::Error;

/// Top-level error type for evaluation scoring.
///
/// Nothing in this crate retries: every variant is surfaced to the caller as
/// soon as it is detected.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The caller configured the run in a way the protocol cannot honor.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Collective error: {0}")]
    Collective(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EvalError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn batch(msg: impl Into<String>) -> Self {
        Self::Batch(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn collective(msg: impl Into<String>) -> Self {
        Self::Collective(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<Box<figment::Error>> for EvalError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::Config(err.to_string())
    }
}
