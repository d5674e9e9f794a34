//! Evaluator chain: concurrent fan-out with graceful degradation
//!
//! Composes the ordered, configurable set of evaluators. Every enabled
//! evaluator runs as its own task per `evaluate` call; failures are
//! isolated and the weighted aggregate is re-normalized over the
//! survivors. The ordered list is copy-on-write, so runtime
//! add/remove/reorder/configure never disturbs in-flight evaluations.

use crate::config::{EvaluatorWeights, FeedbackConfig};
use crate::error::Result;
use crate::evaluation::evaluator::{
    AlignmentEvaluator, ContentQualityEvaluator, EngagementEvaluator, Evaluator, EvaluatorKind,
    EvaluatorVerdict, PerformanceEvaluator, PsychologicalEvaluator,
};
use crate::types::{EvaluationContext, QualityDimension, QualityScores, ScoreBreakdown};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Aggregate thresholds for the breakdown's strength/weakness lists
const STRENGTH_THRESHOLD: f64 = 0.8;
const WEAKNESS_THRESHOLD: f64 = 0.6;

/// One registered evaluator with its runtime configuration
#[derive(Clone)]
pub struct EvaluatorEntry {
    pub kind: EvaluatorKind,
    pub weight: f64,
    pub enabled: bool,
    evaluator: Arc<dyn Evaluator>,
}

/// Ordered, copy-on-write evaluator registry
pub struct EvaluatorChain {
    entries: RwLock<Arc<Vec<EvaluatorEntry>>>,
}

impl EvaluatorChain {
    /// Empty chain; callers must register evaluators before initialization
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Chain with the five built-in evaluators, weighted per configuration
    pub fn with_defaults(config: &FeedbackConfig) -> Self {
        let trait_keywords: HashMap<String, Vec<String>> = config
            .participants
            .iter()
            .map(|p| (p.id.clone(), p.trait_keywords.clone()))
            .collect();
        let weights = &config.evaluator_weights;

        let entries: Vec<EvaluatorEntry> = vec![
            EvaluatorEntry {
                kind: EvaluatorKind::Performance,
                weight: weights.performance,
                enabled: true,
                evaluator: Arc::new(PerformanceEvaluator),
            },
            EvaluatorEntry {
                kind: EvaluatorKind::Psychological,
                weight: weights.psychological,
                enabled: true,
                evaluator: Arc::new(PsychologicalEvaluator),
            },
            EvaluatorEntry {
                kind: EvaluatorKind::ContentQuality,
                weight: weights.content_quality,
                enabled: true,
                evaluator: Arc::new(ContentQualityEvaluator),
            },
            EvaluatorEntry {
                kind: EvaluatorKind::Alignment,
                weight: weights.alignment,
                enabled: true,
                evaluator: Arc::new(AlignmentEvaluator::new(trait_keywords)),
            },
            EvaluatorEntry {
                kind: EvaluatorKind::Engagement,
                weight: weights.engagement,
                enabled: true,
                evaluator: Arc::new(EngagementEvaluator),
            },
        ];

        Self {
            entries: RwLock::new(Arc::new(entries)),
        }
    }

    /// Register an evaluator, replacing any existing one of the same kind
    pub async fn register(&self, evaluator: Arc<dyn Evaluator>, weight: f64) {
        let mut guard = self.entries.write().await;
        let mut next: Vec<EvaluatorEntry> = guard.as_ref().clone();
        let kind = evaluator.kind();
        let entry = EvaluatorEntry {
            kind,
            weight,
            enabled: true,
            evaluator,
        };
        match next.iter_mut().find(|e| e.kind == kind) {
            Some(slot) => *slot = entry,
            None => next.push(entry),
        }
        *guard = Arc::new(next);
        debug!("Registered evaluator: {}", kind);
    }

    /// Remove an evaluator; false when no such kind is registered
    pub async fn remove(&self, kind: EvaluatorKind) -> bool {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        let next: Vec<EvaluatorEntry> =
            guard.iter().filter(|e| e.kind != kind).cloned().collect();
        let removed = next.len() < before;
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Update weight and/or enabled flag; false when no such kind exists
    pub async fn configure(
        &self,
        kind: EvaluatorKind,
        weight: Option<f64>,
        enabled: Option<bool>,
    ) -> bool {
        let mut guard = self.entries.write().await;
        let mut next: Vec<EvaluatorEntry> = guard.as_ref().clone();
        let Some(entry) = next.iter_mut().find(|e| e.kind == kind) else {
            return false;
        };
        if let Some(w) = weight {
            entry.weight = w.max(0.0);
        }
        if let Some(e) = enabled {
            entry.enabled = e;
        }
        *guard = Arc::new(next);
        true
    }

    /// Reorder the chain; false when `order` names an unregistered kind
    pub async fn reorder(&self, order: &[EvaluatorKind]) -> bool {
        let mut guard = self.entries.write().await;
        let current = guard.as_ref();
        if order
            .iter()
            .any(|k| !current.iter().any(|e| e.kind == *k))
        {
            return false;
        }
        let mut next: Vec<EvaluatorEntry> = Vec::with_capacity(current.len());
        for kind in order {
            if let Some(entry) = current.iter().find(|e| e.kind == *kind) {
                next.push(entry.clone());
            }
        }
        for entry in current.iter() {
            if !order.contains(&entry.kind) {
                next.push(entry.clone());
            }
        }
        *guard = Arc::new(next);
        true
    }

    /// Propagate evaluator weights from an updated configuration
    pub async fn apply_weights(&self, weights: &EvaluatorWeights) {
        let mut guard = self.entries.write().await;
        let mut next: Vec<EvaluatorEntry> = guard.as_ref().clone();
        for entry in next.iter_mut() {
            entry.weight = match entry.kind {
                EvaluatorKind::Performance => weights.performance,
                EvaluatorKind::Psychological => weights.psychological,
                EvaluatorKind::ContentQuality => weights.content_quality,
                EvaluatorKind::Alignment => weights.alignment,
                EvaluatorKind::Engagement => weights.engagement,
            };
        }
        *guard = Arc::new(next);
    }

    pub async fn enabled_count(&self) -> usize {
        self.entries.read().await.iter().filter(|e| e.enabled).count()
    }

    /// Current registry order as (kind, weight, enabled) triples
    pub async fn roster(&self) -> Vec<(EvaluatorKind, f64, bool)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| (e.kind, e.weight, e.enabled))
            .collect()
    }

    /// Score one utterance with every enabled evaluator, concurrently.
    ///
    /// Never fails: evaluator faults are excluded from the weighted
    /// aggregate and surface only in the breakdown. When every evaluator
    /// fails, the canonical fallback vector is returned.
    pub async fn evaluate(&self, ctx: Arc<EvaluationContext>) -> QualityScores {
        let snapshot = self.entries.read().await.clone();
        let enabled: Vec<EvaluatorEntry> =
            snapshot.iter().filter(|e| e.enabled).cloned().collect();
        if enabled.is_empty() {
            warn!("Evaluate called with no enabled evaluators");
            return QualityScores::fallback("no enabled evaluators");
        }

        let mut set: JoinSet<(EvaluatorKind, f64, Result<EvaluatorVerdict>)> = JoinSet::new();
        for entry in enabled {
            let ctx = ctx.clone();
            set.spawn(async move {
                let verdict = entry.evaluator.evaluate(&ctx).await;
                (entry.kind, entry.weight, verdict)
            });
        }

        let mut survivors: Vec<(EvaluatorKind, f64, EvaluatorVerdict)> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((kind, weight, Ok(verdict))) => survivors.push((kind, weight, verdict)),
                Ok((kind, _, Err(err))) => {
                    warn!("Evaluator {} failed: {}", kind, err);
                    failures.push(format!("{}: {}", kind, err));
                }
                Err(join_err) => {
                    warn!("Evaluator task panicked: {}", join_err);
                    failures.push(format!("evaluator task panicked: {}", join_err));
                }
            }
        }

        if survivors.is_empty() {
            let mut scores = QualityScores::fallback("all evaluators failed");
            scores.breakdown.notes.extend(failures);
            return scores;
        }
        survivors.sort_by_key(|(kind, _, _)| *kind);

        Self::aggregate(survivors, failures)
    }

    /// Weighted mean over surviving verdicts, weights re-normalized
    fn aggregate(
        survivors: Vec<(EvaluatorKind, f64, EvaluatorVerdict)>,
        failures: Vec<String>,
    ) -> QualityScores {
        let raw_total: f64 = survivors.iter().map(|(_, w, _)| w.max(0.0)).sum();
        // All-zero weights degenerate to an unweighted mean
        let effective = |w: f64| if raw_total > 0.0 { w.max(0.0) } else { 1.0 };
        let total: f64 = survivors.iter().map(|(_, w, _)| effective(*w)).sum();

        let overall = survivors
            .iter()
            .map(|(_, w, v)| effective(*w) * v.score)
            .sum::<f64>()
            / total;

        let mut dimensions = BTreeMap::new();
        for dim in QualityDimension::ALL {
            let value = survivors
                .iter()
                .map(|(_, w, v)| {
                    // Secondary fallback: an evaluator that never scored this
                    // dimension contributes its overall score instead
                    let dim_score = v.dimension_scores.get(&dim).copied().unwrap_or(v.score);
                    effective(*w) * dim_score
                })
                .sum::<f64>()
                / total;
            dimensions.insert(dim, value);
        }

        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        for (dim, value) in &dimensions {
            if *value >= STRENGTH_THRESHOLD {
                strengths.push(dim.to_string());
            } else if *value < WEAKNESS_THRESHOLD {
                weaknesses.push(dim.to_string());
            }
        }

        let per_evaluator: BTreeMap<String, f64> = survivors
            .iter()
            .map(|(kind, _, v)| (kind.to_string(), v.score))
            .collect();

        let mut notes: Vec<String> = failures.clone();
        let mut suggestions: Vec<String> = survivors
            .iter()
            .flat_map(|(_, _, v)| v.suggestions.iter().cloned())
            .collect();
        suggestions.dedup();
        notes.extend(suggestions.into_iter().take(3));

        QualityScores {
            dimensions,
            overall,
            breakdown: ScoreBreakdown {
                strengths,
                weaknesses,
                per_evaluator,
                degraded: !failures.is_empty(),
                notes,
            },
        }
        .sanitize()
    }
}

impl Default for EvaluatorChain {
    fn default() -> Self {
        Self::new()
    }
}
