//! Utterance evaluation: pluggable scorers, concurrent chain, history.
//!
//! # Architecture
//!
//! - **Evaluator**: stateless per-call scorer for one or more quality
//!   dimensions, behind an async trait
//! - **EvaluatorChain**: ordered, copy-on-write registry that fans
//!   evaluators out concurrently and degrades gracefully on failure
//! - **HistoryStore**: bounded per-participant log deriving trend,
//!   consistency, and strength/weakness statistics
//!
//! The chain never surfaces an error: evaluator faults are excluded
//! from the weighted aggregate, and a total failure produces the
//! canonical fallback score vector with a diagnostic breakdown.

pub mod chain;
pub mod evaluator;
pub mod history;

pub use chain::{EvaluatorChain, EvaluatorEntry};
pub use evaluator::{
    alignment_ratio, extract_keywords, AlignmentEvaluator, ContentQualityEvaluator,
    EngagementEvaluator, Evaluator, EvaluatorKind, EvaluatorVerdict, PerformanceEvaluator,
    PsychologicalEvaluator,
};
pub use history::{HistoryRecord, HistoryStore, ParticipantStats, Trend, RETENTION_CAP};
