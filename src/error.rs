//! Error types for the Colloquy feedback engine
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for propagation at the edges.
//!
//! Note that the data-plane entry point (`evaluate_statement`) never
//! surfaces these errors to callers; every pipeline stage degrades to a
//! documented fallback value. Errors here are for initialization,
//! configuration, and internal stage boundaries.

use thiserror::Error;

/// Main error type for Colloquy operations
#[derive(Error, Debug)]
pub enum ColloquyError {
    /// An individual evaluator failed to score an utterance
    #[error("Evaluator '{evaluator}' failed: {reason}")]
    EvaluatorFailed { evaluator: String, reason: String },

    /// Every registered evaluator failed for one utterance
    #[error("All evaluators failed: {0}")]
    AllEvaluatorsFailed(String),

    /// Graph/weight optimization failed internally
    #[error("Optimization error: {0}")]
    Optimization(String),

    /// Feedback aggregation failed internally
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Event bus operation failed
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// Unknown participant referenced
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordinator used in the wrong lifecycle state
    #[error("Invalid lifecycle state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Colloquy operations
pub type Result<T> = std::result::Result<T, ColloquyError>;

/// Convert anyhow::Error to ColloquyError
impl From<anyhow::Error> for ColloquyError {
    fn from(err: anyhow::Error) -> Self {
        ColloquyError::Other(err.to_string())
    }
}
