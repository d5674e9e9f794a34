//! Coordination layer: the facade that sequences the pipeline.
//!
//! The coordinator owns the optimizer and history store instances for
//! its process lifetime (explicit init/shutdown, no ambient global
//! state) and exposes the external request/response contract.

pub mod coordinator;

pub use coordinator::{
    FeedbackCoordinator, FeedbackResult, LifecycleState, ParticipantInfo, SystemMetrics,
};
