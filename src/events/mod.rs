//! Event-driven side channel for the evaluation pipeline.
//!
//! The bus keeps alerting, metrics, and logging out of the main
//! evaluation path: the coordinator emits lifecycle events and
//! subscribers react asynchronously. Queue and history are both
//! bounded with oldest-drop-first eviction.

pub mod bus;

pub use bus::{
    Event, EventBus, EventFilter, EventMetadata, EventPayload, EventPriority, EventType,
    Listener, SubscribeOptions, HISTORY_CAP, QUEUE_CAP,
};
