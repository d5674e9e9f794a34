//! Feedback coordinator: lifecycle, sequencing, and the external contract
//!
//! Owns the single optimizer and history store for its process lifetime
//! and sequences the pipeline for each incoming utterance:
//! chain → history → optimizer → aggregator → events. Any unexpected
//! failure inside the pipeline degrades to a fallback result and a
//! `system_error` event; no caller of `evaluate_statement` ever
//! observes an error.

use crate::config::{FeedbackConfig, FeedbackConfigPatch};
use crate::error::{ColloquyError, Result};
use crate::evaluation::{EvaluatorChain, HistoryRecord, HistoryStore};
use crate::events::{EventBus, EventPayload, EventType, SubscribeOptions};
use crate::feedback::{
    prompts, AdaptivePromptParams, DetailedFeedback, FeedbackAggregator, ScoreBand,
};
use crate::health::{ComponentHealth, HealthReport};
use crate::optimization::{clamp_weight, GraphWeightOptimizer, OptimizationResult};
use crate::types::{EvaluationContext, ParticipantProfile, QualityScores, Temperament};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// EMA factor for the moving-average latency
const LATENCY_ALPHA: f64 = 0.2;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::ShuttingDown => write!(f, "shutting_down"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Response contract for one evaluated utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub participant_id: String,
    pub scores: QualityScores,
    pub feedback: DetailedFeedback,
    /// None when realtime optimization is disabled
    pub optimization: Option<OptimizationResult>,
    /// Non-negative contribution of this utterance to discussion quality
    pub quality_contribution: f64,
    pub latency_ms: u64,
    pub degraded: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl FeedbackResult {
    /// Canonical fallback used by every full-pipeline failure path
    pub fn fallback(participant_id: &str, note: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            scores: QualityScores::fallback(note),
            feedback: DetailedFeedback::fallback(participant_id),
            optimization: None,
            quality_contribution: 0.0,
            latency_ms: 0,
            degraded: true,
            evaluated_at: Utc::now(),
        }
    }
}

/// Per-participant diagnostic view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: String,
    pub temperament: Temperament,
    pub current_weight: f64,
    pub participation_count: u64,
}

/// Observability surface returned by [`FeedbackCoordinator::metrics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub evaluation_count: u64,
    pub average_quality: f64,
    pub average_latency_ms: f64,
    pub optimization_efficiency: f64,
    /// 1.0 when everyone speaks equally often, toward 0.0 as one voice dominates
    pub participant_balance: f64,
    pub component_health: HealthReport,
}

#[derive(Debug, Default)]
struct RunningStats {
    evaluation_count: u64,
    quality_sum: f64,
    average_latency_ms: f64,
    last_system_efficiency: f64,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Facade owning the evaluation pipeline
pub struct FeedbackCoordinator {
    config: std::sync::Arc<RwLock<FeedbackConfig>>,
    chain: EvaluatorChain,
    history: HistoryStore,
    optimizer: Mutex<GraphWeightOptimizer>,
    aggregator: FeedbackAggregator,
    bus: EventBus,
    state: RwLock<LifecycleState>,
    in_flight: AtomicUsize,
    stats: Mutex<RunningStats>,
}

impl FeedbackCoordinator {
    /// Build a coordinator with the built-in evaluator chain
    pub fn new(config: FeedbackConfig) -> Result<Self> {
        config.validate()?;
        let chain = EvaluatorChain::with_defaults(&config);
        let history = HistoryStore::new(config.adaptive_learning.window_size);
        let optimizer = Mutex::new(GraphWeightOptimizer::new(&config));
        Ok(Self {
            config: std::sync::Arc::new(RwLock::new(config)),
            chain,
            history,
            optimizer,
            aggregator: FeedbackAggregator::new(),
            bus: EventBus::new(),
            state: RwLock::new(LifecycleState::Uninitialized),
            in_flight: AtomicUsize::new(0),
            stats: Mutex::new(RunningStats {
                last_system_efficiency: 0.5,
                ..Default::default()
            }),
        })
    }

    /// Wire the event bus and transition to `Ready`.
    ///
    /// Fails fast when no evaluator is enabled; this is the only error
    /// an external caller ever observes.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != LifecycleState::Uninitialized {
                return Err(ColloquyError::InvalidState {
                    expected: LifecycleState::Uninitialized.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = LifecycleState::Initializing;
        }

        if self.chain.enabled_count().await == 0 {
            *self.state.write().await = LifecycleState::Uninitialized;
            return Err(ColloquyError::Config(
                "no evaluator registered; refusing to initialize".to_string(),
            ));
        }

        // Default listener: alert when an evaluation lands under the
        // configured overall minimum
        let bus = self.bus.clone();
        let config = self.config.clone();
        self.bus
            .subscribe_fn(
                EventType::EvaluationCompleted,
                SubscribeOptions {
                    priority: 10,
                    ..Default::default()
                },
                move |event| {
                    let bus = bus.clone();
                    let config = config.clone();
                    async move {
                        if let EventPayload::EvaluationCompleted {
                            participant_id,
                            overall_score,
                            ..
                        } = event.payload
                        {
                            let threshold = config.read().await.thresholds.overall_minimum;
                            if overall_score < threshold {
                                bus.emit(
                                    EventPayload::QualityAlert {
                                        participant_id,
                                        overall_score,
                                        threshold,
                                    },
                                    "coordinator",
                                )
                                .await;
                            }
                        }
                    }
                },
            )
            .await;

        *self.state.write().await = LifecycleState::Ready;
        info!("Feedback coordinator ready");
        Ok(())
    }

    /// Sole data-plane entry point; never fails outward
    pub async fn evaluate_statement(&self, ctx: EvaluationContext) -> FeedbackResult {
        if *self.state.read().await != LifecycleState::Ready {
            warn!("evaluate_statement called while not ready");
            return FeedbackResult::fallback(&ctx.participant_id, "coordinator not ready");
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let _guard = InFlightGuard(&self.in_flight);
        let started = Instant::now();

        self.bus
            .emit(
                EventPayload::EvaluationStarted {
                    participant_id: ctx.participant_id.clone(),
                    turn_number: ctx.turn_number,
                },
                "coordinator",
            )
            .await;

        let participant_id = ctx.participant_id.clone();
        match self.evaluate_inner(ctx, started).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Evaluation pipeline failed: {}", err);
                self.bus
                    .emit(
                        EventPayload::SystemError {
                            source: "coordinator".to_string(),
                            message: err.to_string(),
                        },
                        "coordinator",
                    )
                    .await;
                FeedbackResult::fallback(&participant_id, err.to_string())
            }
        }
    }

    async fn evaluate_inner(
        &self,
        ctx: EvaluationContext,
        started: Instant,
    ) -> Result<FeedbackResult> {
        if ctx.participant_id.trim().is_empty() {
            return Err(ColloquyError::UnknownParticipant(
                "empty participant id".to_string(),
            ));
        }

        let ctx = std::sync::Arc::new(ctx);
        let scores = self.chain.evaluate(ctx.clone()).await;

        self.history
            .record(
                &ctx.participant_id,
                HistoryRecord {
                    utterance: ctx.utterance.clone(),
                    scores: scores.clone(),
                    feedback_summary: prompts::band_phrase(
                        ScoreBand::of(scores.overall),
                        &ctx.participant_id,
                    ),
                    timestamp: Utc::now(),
                    turn_number: ctx.turn_number,
                },
            )
            .await;

        let (realtime, thresholds, profile) = {
            let config = self.config.read().await;
            (
                config.realtime_optimization,
                config.thresholds.clone(),
                config.profile_for(&ctx.participant_id),
            )
        };

        let (optimization, current_weight) = {
            let mut optimizer = self.optimizer.lock().await;
            optimizer.record_participation(&ctx.participant_id);

            let optimization = if realtime {
                let quality = self.history.average_overall().await;
                let profiles = self.participant_profiles(&ctx, &quality).await;
                Some(optimizer.optimize(&quality, &profiles, ctx.phase))
            } else {
                None
            };
            (optimization, optimizer.current_weight(&ctx.participant_id))
        };

        if let Some(opt) = &optimization {
            self.bus
                .emit(
                    EventPayload::OptimizationCompleted {
                        iterations: opt.convergence.iterations,
                        converged: opt.convergence.converged,
                        system_efficiency: opt.system_efficiency,
                    },
                    "coordinator",
                )
                .await;
        }

        let stats = self.history.stats(&ctx.participant_id).await;
        let feedback = self.aggregator.aggregate(
            &scores,
            optimization.as_ref(),
            &ctx,
            stats.as_ref(),
            &profile,
            &thresholds,
        );

        let quality_contribution = (scores.overall * clamp_weight(current_weight)).max(0.0);
        let latency_ms = started.elapsed().as_millis() as u64;
        let degraded = scores.breakdown.degraded || feedback.degraded;

        {
            let mut running = self.stats.lock().await;
            running.evaluation_count += 1;
            running.quality_sum += scores.overall;
            running.average_latency_ms = if running.evaluation_count == 1 {
                latency_ms as f64
            } else {
                (1.0 - LATENCY_ALPHA) * running.average_latency_ms
                    + LATENCY_ALPHA * latency_ms as f64
            };
            if let Some(opt) = &optimization {
                running.last_system_efficiency = opt.system_efficiency;
            }
        }

        self.bus
            .emit(
                EventPayload::EvaluationCompleted {
                    participant_id: ctx.participant_id.clone(),
                    overall_score: scores.overall,
                    degraded,
                    latency_ms,
                },
                "coordinator",
            )
            .await;

        debug!(
            "Evaluated turn {} for {} (overall {:.2}, {}ms)",
            ctx.turn_number, ctx.participant_id, scores.overall, latency_ms
        );

        Ok(FeedbackResult {
            participant_id: ctx.participant_id.clone(),
            scores,
            feedback,
            optimization,
            quality_contribution,
            latency_ms,
            degraded,
            evaluated_at: Utc::now(),
        })
    }

    /// Profiles for every participant the optimizer should consider:
    /// anyone with history, anyone in the weight snapshot, plus the speaker
    async fn participant_profiles(
        &self,
        ctx: &EvaluationContext,
        quality: &HashMap<String, f64>,
    ) -> Vec<ParticipantProfile> {
        let mut ids: Vec<String> = quality.keys().cloned().collect();
        ids.extend(ctx.participant_weights.keys().cloned());
        ids.push(ctx.participant_id.clone());
        ids.sort();
        ids.dedup();

        let config = self.config.read().await;
        ids.iter().map(|id| config.profile_for(id)).collect()
    }

    /// Guidance text for a participant's next turn
    pub async fn generate_adaptive_prompt(&self, params: AdaptivePromptParams) -> String {
        let stats = self.history.stats(&params.participant_id).await;
        self.aggregator.adaptive_prompt(&params, stats.as_ref())
    }

    /// Current weights, clusters, and participation counts
    pub async fn participant_info(&self) -> HashMap<String, ParticipantInfo> {
        let optimizer = self.optimizer.lock().await;
        let config = self.config.read().await;
        let mut ids = self.history.participants().await;
        ids.sort();

        ids.into_iter()
            .map(|id| {
                let temperament = optimizer
                    .graph()
                    .cluster_of(&id)
                    .unwrap_or_else(|| config.profile_for(&id).temperament);
                let info = ParticipantInfo {
                    id: id.clone(),
                    temperament,
                    current_weight: optimizer.current_weight(&id),
                    participation_count: optimizer.participation_count(&id),
                };
                (id, info)
            })
            .collect()
    }

    /// Merge a deep-partial configuration update and propagate it to the
    /// chain, history store, and optimizer without re-initialization
    pub async fn update_config(&self, patch: FeedbackConfigPatch) -> Result<()> {
        let updated = {
            let mut config = self.config.write().await;
            config.apply_patch(&patch)?;
            config.clone()
        };

        self.chain.apply_weights(&updated.evaluator_weights).await;
        self.history
            .set_window_size(updated.adaptive_learning.window_size);
        self.optimizer.lock().await.reconfigure(&updated);

        let mut fields = Vec::new();
        if patch.thresholds.is_some() {
            fields.push("thresholds".to_string());
        }
        if patch.evaluator_weights.is_some() {
            fields.push("evaluator_weights".to_string());
        }
        if patch.strategy.is_some() {
            fields.push("strategy".to_string());
        }
        if patch.realtime_optimization.is_some() {
            fields.push("realtime_optimization".to_string());
        }
        if patch.adaptive_learning.is_some() {
            fields.push("adaptive_learning".to_string());
        }
        if patch.optimizer_seed.is_some() {
            fields.push("optimizer_seed".to_string());
        }
        if patch.participants.is_some() {
            fields.push("participants".to_string());
        }
        self.bus
            .emit(EventPayload::ConfigurationUpdated { fields }, "coordinator")
            .await;
        Ok(())
    }

    /// Snapshot of the effective configuration
    pub async fn config(&self) -> FeedbackConfig {
        self.config.read().await.clone()
    }

    pub async fn metrics(&self) -> SystemMetrics {
        let running = self.stats.lock().await;
        let average_quality = if running.evaluation_count > 0 {
            running.quality_sum / running.evaluation_count as f64
        } else {
            0.0
        };

        let participant_balance = {
            let optimizer = self.optimizer.lock().await;
            let ids = self.history.participants().await;
            let counts: Vec<f64> = ids
                .iter()
                .map(|id| optimizer.participation_count(id) as f64)
                .collect();
            balance_of(&counts)
        };

        SystemMetrics {
            evaluation_count: running.evaluation_count,
            average_quality,
            average_latency_ms: running.average_latency_ms,
            optimization_efficiency: running.last_system_efficiency,
            participant_balance,
            component_health: self.health_check().await,
        }
    }

    /// Per-component health
    pub async fn health_check(&self) -> HealthReport {
        let mut components = Vec::new();

        let enabled = self.chain.enabled_count().await;
        components.push(if enabled > 0 {
            ComponentHealth::healthy("evaluator_chain")
        } else {
            ComponentHealth::unhealthy("evaluator_chain", "no enabled evaluators")
        });

        components.push(ComponentHealth::healthy("history_store"));

        {
            let optimizer = self.optimizer.lock().await;
            components.push(ComponentHealth::healthy("optimizer").with_issue_if(
                optimizer.graph().node_count() == 0,
                "no participants in graph yet",
            ));
        }

        let pending = self.bus.pending_len().await;
        components.push(if pending >= crate::events::QUEUE_CAP {
            ComponentHealth::unhealthy("event_bus", "pending queue saturated")
        } else {
            ComponentHealth::healthy("event_bus")
        });

        let state = *self.state.read().await;
        components.push(if state == LifecycleState::Ready {
            ComponentHealth::healthy("coordinator")
        } else {
            ComponentHealth::unhealthy("coordinator", format!("state: {}", state))
        });

        HealthReport::from_components(components)
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Number of evaluations currently in flight (diagnostic)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Bus handle for external subscribers
    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    /// Evaluator registry, for runtime add/remove/reorder/configure
    pub fn evaluators(&self) -> &EvaluatorChain {
        &self.chain
    }

    /// Drop listeners and stop; further evaluations return fallbacks
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != LifecycleState::Ready {
                return Err(ColloquyError::InvalidState {
                    expected: LifecycleState::Ready.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = LifecycleState::ShuttingDown;
        }
        self.bus.clear_listeners().await;
        *self.state.write().await = LifecycleState::Stopped;
        info!("Feedback coordinator stopped");
        Ok(())
    }
}

/// `1 - coefficient of variation`, clamped to [0, 1]; 1.0 when empty
fn balance_of(counts: &[f64]) -> f64 {
    if counts.is_empty() {
        return 1.0;
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

trait WithIssueIf {
    fn with_issue_if(self, condition: bool, issue: &str) -> Self;
}

impl WithIssueIf for ComponentHealth {
    fn with_issue_if(self, condition: bool, issue: &str) -> Self {
        if condition {
            self.with_issue(issue)
        } else {
            self
        }
    }
}
