//! In-process publish/subscribe with priority ordering
//!
//! Decouples side effects (alerting, metrics, logging) from the main
//! evaluation path. Emission enqueues onto a bounded queue; a single
//! drain loop, guarded by an in-flight flag, dispatches one event fully
//! (every listener invoked in priority order and awaited, failures
//! caught per listener) before dequeuing the next. Events are retained
//! in a bounded ring history for introspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded pending queue; oldest events are dropped first when full
pub const QUEUE_CAP: usize = 100;
/// Bounded ring history for introspection
pub const HISTORY_CAP: usize = 1000;

/// Closed set of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EvaluationStarted,
    EvaluationCompleted,
    OptimizationCompleted,
    QualityThresholdCrossed,
    ConfigurationUpdated,
    SystemError,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::EvaluationStarted => write!(f, "evaluation_started"),
            EventType::EvaluationCompleted => write!(f, "evaluation_completed"),
            EventType::OptimizationCompleted => write!(f, "optimization_completed"),
            EventType::QualityThresholdCrossed => write!(f, "quality_threshold_crossed"),
            EventType::ConfigurationUpdated => write!(f, "configuration_updated"),
            EventType::SystemError => write!(f, "system_error"),
        }
    }
}

/// Tagged event payload; the event type is derived from the variant, so
/// a payload can never travel under the wrong tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    EvaluationStarted {
        participant_id: String,
        turn_number: u32,
    },
    EvaluationCompleted {
        participant_id: String,
        overall_score: f64,
        degraded: bool,
        latency_ms: u64,
    },
    OptimizationCompleted {
        iterations: usize,
        converged: bool,
        system_efficiency: f64,
    },
    QualityAlert {
        participant_id: String,
        overall_score: f64,
        threshold: f64,
    },
    ConfigurationUpdated {
        fields: Vec<String>,
    },
    SystemError {
        source: String,
        message: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::EvaluationStarted { .. } => EventType::EvaluationStarted,
            EventPayload::EvaluationCompleted { .. } => EventType::EvaluationCompleted,
            EventPayload::OptimizationCompleted { .. } => EventType::OptimizationCompleted,
            EventPayload::QualityAlert { .. } => EventType::QualityThresholdCrossed,
            EventPayload::ConfigurationUpdated { .. } => EventType::ConfigurationUpdated,
            EventPayload::SystemError { .. } => EventType::SystemError,
        }
    }

    fn priority(&self) -> EventPriority {
        match self {
            EventPayload::SystemError { .. } => EventPriority::Critical,
            EventPayload::QualityAlert { .. } => EventPriority::High,
            EventPayload::EvaluationCompleted { .. }
            | EventPayload::OptimizationCompleted { .. }
            | EventPayload::ConfigurationUpdated { .. } => EventPriority::Normal,
            EventPayload::EvaluationStarted { .. } => EventPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub priority: EventPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
    pub metadata: EventMetadata,
}

impl Event {
    fn new(payload: EventPayload, source: &str) -> Self {
        Self {
            event_type: payload.event_type(),
            metadata: EventMetadata {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                source: source.to_string(),
                priority: payload.priority(),
            },
            payload,
        }
    }
}

type ListenerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// Boxed async listener callback
pub type Listener = Arc<dyn Fn(Event) -> ListenerFuture + Send + Sync>;
/// Predicate deciding whether a subscription sees an event
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Options for [`EventBus::subscribe`]
#[derive(Default)]
pub struct SubscribeOptions {
    /// Remove the subscription after its first delivery
    pub once: bool,
    /// Higher priority listeners run first; default 0
    pub priority: i32,
    pub filter: Option<EventFilter>,
}

#[derive(Clone)]
struct Subscription {
    id: Uuid,
    priority: i32,
    once: bool,
    fired: Arc<AtomicBool>,
    filter: Option<EventFilter>,
    listener: Listener,
}

struct BusInner {
    listeners: RwLock<HashMap<EventType, Vec<Subscription>>>,
    queue: Mutex<VecDeque<Event>>,
    /// In-flight flag guarding the single drain loop
    draining: AtomicBool,
    history: Mutex<VecDeque<Event>>,
}

/// Cheap-to-clone handle onto one shared bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Register a listener; returns the subscription id for `unsubscribe`
    pub async fn subscribe(
        &self,
        event_type: EventType,
        listener: Listener,
        options: SubscribeOptions,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let subscription = Subscription {
            id,
            priority: options.priority,
            once: options.once,
            fired: Arc::new(AtomicBool::new(false)),
            filter: options.filter,
            listener,
        };
        let mut guard = self.inner.listeners.write().await;
        guard.entry(event_type).or_default().push(subscription);
        debug!("Subscribed {} to {}", id, event_type);
        id
    }

    /// Convenience wrapper boxing an async closure into a [`Listener`]
    pub async fn subscribe_fn<F, Fut>(
        &self,
        event_type: EventType,
        options: SubscribeOptions,
        f: F,
    ) -> Uuid
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |event| Box::pin(f(event)));
        self.subscribe(event_type, listener, options).await
    }

    /// Remove a subscription; false when the id is not registered
    pub async fn unsubscribe(&self, event_type: EventType, id: Uuid) -> bool {
        let mut guard = self.inner.listeners.write().await;
        if let Some(subs) = guard.get_mut(&event_type) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            return subs.len() < before;
        }
        false
    }

    /// Queue an event and drain, unless another drain is already active
    pub async fn emit(&self, payload: EventPayload, source: &str) {
        let event = Event::new(payload, source);
        self.remember(event.clone()).await;
        {
            let mut queue = self.inner.queue.lock().await;
            if queue.len() >= QUEUE_CAP {
                let dropped = queue.pop_front();
                warn!(
                    "Event queue full, dropping oldest event: {:?}",
                    dropped.map(|e| e.event_type)
                );
            }
            queue.push_back(event);
        }
        self.drain().await;
    }

    /// Dispatch immediately, bypassing the queue; for the few cases that
    /// need same-tick delivery
    pub async fn emit_sync(&self, payload: EventPayload, source: &str) {
        let event = Event::new(payload, source);
        self.remember(event.clone()).await;
        self.dispatch(event).await;
    }

    async fn remember(&self, event: Event) {
        let mut history = self.inner.history.lock().await;
        if history.len() >= HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Single-consumer drain loop: Idle -> Draining -> Idle
    async fn drain(&self) {
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another caller is draining; it will pick our event up
                return;
            }
            loop {
                let next = self.inner.queue.lock().await.pop_front();
                let Some(event) = next else {
                    break;
                };
                self.dispatch(event).await;
            }
            self.inner.draining.store(false, Ordering::Release);
            // An emit may have raced the flag release; loop back if so
            if self.inner.queue.lock().await.is_empty() {
                return;
            }
        }
    }

    /// Invoke listeners in priority order, each fully awaited; failures
    /// are caught per listener and never abort the batch
    async fn dispatch(&self, event: Event) {
        let mut subscriptions: Vec<Subscription> = {
            let guard = self.inner.listeners.read().await;
            guard
                .get(&event.event_type)
                .map(|subs| subs.to_vec())
                .unwrap_or_default()
        };
        subscriptions.sort_by_key(|s| std::cmp::Reverse(s.priority));

        let mut any_once_fired = false;
        for subscription in subscriptions {
            if let Some(filter) = &subscription.filter {
                if !filter(&event) {
                    continue;
                }
            }
            if subscription.once
                && subscription
                    .fired
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                continue;
            }
            if subscription.once {
                any_once_fired = true;
            }

            // Spawned so a panicking listener is isolated from the batch
            let future = (subscription.listener)(event.clone());
            if let Err(join_err) = tokio::spawn(future).await {
                warn!(
                    "Listener {} for {} failed: {}",
                    subscription.id, event.event_type, join_err
                );
            }
        }

        if any_once_fired {
            let mut guard = self.inner.listeners.write().await;
            if let Some(subs) = guard.get_mut(&event.event_type) {
                subs.retain(|s| !(s.once && s.fired.load(Ordering::Acquire)));
            }
        }
    }

    /// Most recent events, newest last
    pub async fn recent_events(&self, n: usize) -> Vec<Event> {
        let history = self.inner.history.lock().await;
        history.iter().rev().take(n).rev().cloned().collect()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.listeners.read().await.values().map(|v| v.len()).sum()
    }

    /// Drop every subscription; used at coordinator shutdown
    pub async fn clear_listeners(&self) {
        self.inner.listeners.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(participant: &str) -> EventPayload {
        EventPayload::EvaluationStarted {
            participant_id: participant.to_string(),
            turn_number: 1,
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_listener() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        bus.subscribe_fn(
            EventType::EvaluationStarted,
            SubscribeOptions::default(),
            move |event| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().await.push(event.event_type);
                }
            },
        )
        .await;

        bus.emit(started("alice"), "test").await;
        assert_eq!(seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_once_listener_fires_exactly_once() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));
        let count_clone = count.clone();
        bus.subscribe_fn(
            EventType::EvaluationStarted,
            SubscribeOptions {
                once: true,
                ..Default::default()
            },
            move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().await += 1;
                }
            },
        )
        .await;

        bus.emit(started("alice"), "test").await;
        bus.emit(started("alice"), "test").await;
        assert_eq!(*count.lock().await, 1);
        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [("low", -5), ("high", 10), ("mid", 0)] {
            let order = order.clone();
            bus.subscribe_fn(
                EventType::EvaluationStarted,
                SubscribeOptions {
                    priority,
                    ..Default::default()
                },
                move |_| {
                    let order = order.clone();
                    async move {
                        order.lock().await.push(label);
                    }
                },
            )
            .await;
        }

        bus.emit(started("alice"), "test").await;
        assert_eq!(*order.lock().await, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_filter_skips_unmatched_events() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));
        let count_clone = count.clone();
        let filter: EventFilter = Arc::new(|event| {
            matches!(
                &event.payload,
                EventPayload::EvaluationStarted { participant_id, .. } if participant_id == "bob"
            )
        });
        bus.subscribe_fn(
            EventType::EvaluationStarted,
            SubscribeOptions {
                filter: Some(filter),
                ..Default::default()
            },
            move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().await += 1;
                }
            },
        )
        .await;

        bus.emit(started("alice"), "test").await;
        bus.emit(started("bob"), "test").await;
        assert_eq!(*count.lock().await, 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_abort_batch() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));
        bus.subscribe_fn(
            EventType::EvaluationStarted,
            SubscribeOptions {
                priority: 10,
                ..Default::default()
            },
            move |_| async move {
                panic!("listener fault");
            },
        )
        .await;
        let count_clone = count.clone();
        bus.subscribe_fn(
            EventType::EvaluationStarted,
            SubscribeOptions::default(),
            move |_| {
                let count = count_clone.clone();
                async move {
                    *count.lock().await += 1;
                }
            },
        )
        .await;

        bus.emit(started("alice"), "test").await;
        assert_eq!(*count.lock().await, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::new();
        for i in 0..(HISTORY_CAP + 25) {
            bus.emit(started(&format!("p{}", i)), "test").await;
        }
        let recent = bus.recent_events(HISTORY_CAP + 100).await;
        assert_eq!(recent.len(), HISTORY_CAP);
        // Oldest were evicted first
        match &recent[0].payload {
            EventPayload::EvaluationStarted { participant_id, .. } => {
                assert_eq!(participant_id, "p25");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0u32));
        let count_clone = count.clone();
        let id = bus
            .subscribe_fn(
                EventType::SystemError,
                SubscribeOptions::default(),
                move |_| {
                    let count = count_clone.clone();
                    async move {
                        *count.lock().await += 1;
                    }
                },
            )
            .await;

        assert!(bus.unsubscribe(EventType::SystemError, id).await);
        assert!(!bus.unsubscribe(EventType::SystemError, id).await);
        bus.emit(
            EventPayload::SystemError {
                source: "test".to_string(),
                message: "boom".to_string(),
            },
            "test",
        )
        .await;
        assert_eq!(*count.lock().await, 0);
    }

    #[tokio::test]
    async fn test_emit_from_listener_is_processed() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0u32));
        let bus_clone = bus.clone();
        bus.subscribe_fn(
            EventType::EvaluationCompleted,
            SubscribeOptions::default(),
            move |event| {
                let bus = bus_clone.clone();
                async move {
                    if let EventPayload::EvaluationCompleted { overall_score, participant_id, .. } =
                        event.payload
                    {
                        if overall_score < 0.5 {
                            bus.emit(
                                EventPayload::QualityAlert {
                                    participant_id,
                                    overall_score,
                                    threshold: 0.5,
                                },
                                "listener",
                            )
                            .await;
                        }
                    }
                }
            },
        )
        .await;
        let seen_clone = seen.clone();
        bus.subscribe_fn(
            EventType::QualityThresholdCrossed,
            SubscribeOptions::default(),
            move |_| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock().await += 1;
                }
            },
        )
        .await;

        bus.emit(
            EventPayload::EvaluationCompleted {
                participant_id: "alice".to_string(),
                overall_score: 0.2,
                degraded: false,
                latency_ms: 4,
            },
            "test",
        )
        .await;

        assert_eq!(*seen.lock().await, 1);
    }

    #[test]
    fn test_payload_type_derivation() {
        let payload = EventPayload::SystemError {
            source: "chain".to_string(),
            message: "x".to_string(),
        };
        assert_eq!(payload.event_type(), EventType::SystemError);
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"kind\":\"system_error\""));
    }
}
