//! Colloquy - Evaluation and Feedback Engine for Simulated Discussions
//!
//! Scores utterances from independent simulated discussion participants,
//! aggregates multi-dimensional quality scores, derives per-participant
//! weight adjustments and a latent interaction graph, and feeds both
//! back into subsequent utterance generation.
//!
//! # Architecture
//!
//! The engine is an evaluation-optimization-feedback loop:
//! - **Evaluation**: pluggable evaluators behind a concurrent chain,
//!   plus a bounded per-participant history store
//! - **Optimization**: a graph/weight optimizer refining participant
//!   embeddings and edge weights to convergence or an iteration cap
//! - **Feedback**: aggregation of scores, optimizer output, and history
//!   into structured feedback and adaptive prompts
//! - **Events**: an in-process bus decoupling side effects from the
//!   evaluation path
//! - **Coordination**: a facade owning lifecycle and sequencing, with
//!   fallback-on-failure semantics end to end
//!
//! The text-generation backend is an external collaborator: callers
//! pass already-generated utterance text in, and the guidance strings
//! this engine produces are intended to be re-submitted to that
//! backend by the caller.
//!
//! # Example
//!
//! ```ignore
//! use colloquy_core::{EvaluationContext, DiscussionPhase, FeedbackConfig, FeedbackCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = FeedbackCoordinator::new(FeedbackConfig::default())?;
//!     coordinator.initialize().await?;
//!
//!     let result = coordinator
//!         .evaluate_statement(EvaluationContext::new(
//!             "I think we should start with the evidence.",
//!             "energy policy",
//!             "participant-1",
//!             DiscussionPhase::Initial,
//!         ))
//!         .await;
//!
//!     println!("{}", result.feedback.adaptive_prompt);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordination;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod feedback;
pub mod health;
pub mod optimization;
pub mod types;

// Re-export commonly used types
pub use config::{
    AdaptiveLearning, EvaluatorWeights, FeedbackConfig, FeedbackConfigPatch, OptimizationStrategy,
    QualityThresholds,
};
pub use coordination::{
    FeedbackCoordinator, FeedbackResult, LifecycleState, ParticipantInfo, SystemMetrics,
};
pub use error::{ColloquyError, Result};
pub use evaluation::{
    Evaluator, EvaluatorChain, EvaluatorKind, EvaluatorVerdict, HistoryRecord, HistoryStore,
    ParticipantStats, Trend,
};
pub use events::{Event, EventBus, EventPayload, EventType, SubscribeOptions};
pub use feedback::{AdaptivePromptParams, DetailedFeedback, FeedbackAggregator};
pub use health::{CheckStatus, ComponentHealth, HealthReport};
pub use optimization::{
    GraphWeightOptimizer, LatentGraph, OptimizationResult, WeightAdjustment,
};
pub use types::{
    DiscussionPhase, EvaluationContext, HistorySnapshot, ParticipantProfile, PhaseWeights,
    QualityDimension, QualityScores, ScoreBreakdown, Temperament,
};
