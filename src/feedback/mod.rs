//! Feedback construction from pipeline outputs.
//!
//! - **FeedbackAggregator**: merges quality scores, optimizer output,
//!   and history statistics into one structured feedback object
//! - **prompts**: phrase and prompt templates shared with the adaptive
//!   prompt generator
//!
//! Aggregation never fails outward; the coordinator always receives a
//! well-formed `DetailedFeedback`.

pub mod aggregator;
pub mod prompts;

pub use aggregator::{
    AdaptivePromptParams, AlignmentReport, DetailedFeedback, FeedbackAggregator, ProgressReport,
};
pub use prompts::ScoreBand;
