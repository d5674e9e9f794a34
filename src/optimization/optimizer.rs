//! Graph/weight optimizer: bounded iterative refinement
//!
//! Alternates an E-step (per-node expected-interaction targets derived
//! from current quality plus small bounded noise) with an M-step (EMA
//! embedding updates and edge refresh) until the convergence metric
//! stabilizes or the iteration cap is hit. The convergence metric is
//! the mean L2 norm of the embedding update, so runs with the same
//! seed are reproducible.
//!
//! Never fails outward: any internal error degrades to the canonical
//! fallback result and the caller proceeds.

use crate::config::{FeedbackConfig, OptimizationStrategy};
use crate::error::{ColloquyError, Result};
use crate::optimization::graph::LatentGraph;
use crate::types::{DiscussionPhase, ParticipantProfile};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const MAX_ITERATIONS: usize = 50;
pub const CONVERGENCE_THRESHOLD: f64 = 1e-4;

/// Legal range for participant weight multipliers
pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 3.0;

/// Damping applied when moving a weight toward the factor product
const WEIGHT_DAMPING: f64 = 0.6;
/// Bounded noise added to the expected-interaction signal
const NOISE_BOUND: f64 = 0.05;

const EFFICIENCY_FLOOR: f64 = 0.5;
const EFFICIENCY_CAP: f64 = 0.95;
const COHESION_CAP: f64 = 0.90;

const LOW_EFFICIENCY: f64 = 0.7;
const LOW_WEIGHT: f64 = 0.8;
const DOMINANT_CLUSTER_SHARE: f64 = 0.5;

/// Clamp a weight into the legal range; non-finite values reset to 1.0
pub fn clamp_weight(weight: f64) -> f64 {
    if !weight.is_finite() {
        return 1.0;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// Independent factor contributions behind one weight adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightFactors {
    /// Phase-dependent cognitive profile weight
    pub cognitive: f64,
    /// Boosts under-participating ids, damps over-participating ones
    pub participation: f64,
    pub quality: f64,
    pub graph_position: f64,
}

/// Weight update for one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAdjustment {
    pub current_weight: f64,
    /// Always within [`MIN_WEIGHT`], [`MAX_WEIGHT`]
    pub adjusted_weight: f64,
    pub reason: String,
    pub factors: WeightFactors,
    pub confidence: f64,
}

/// How the iterative refinement terminated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    pub iterations: usize,
    pub final_error: f64,
    pub converged: bool,
}

/// Snapshot of the graph after one optimization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOptimization {
    pub timestamp: DateTime<Utc>,
    pub node_count: usize,
    pub edge_count: usize,
    pub efficiency: f64,
    pub cohesion: f64,
}

/// Full output of one `optimize` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub recommendations: Vec<String>,
    pub weight_adjustments: HashMap<String, WeightAdjustment>,
    pub graph_optimizations: Vec<GraphOptimization>,
    pub quality_improvement: f64,
    pub system_efficiency: f64,
    pub convergence: ConvergenceInfo,
}

impl OptimizationResult {
    /// Canonical fallback used by every optimizer failure path
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            recommendations: vec![format!("Optimization degraded: {}", reason.into())],
            weight_adjustments: HashMap::new(),
            graph_optimizations: Vec::new(),
            quality_improvement: 0.05,
            system_efficiency: EFFICIENCY_FLOOR,
            convergence: ConvergenceInfo {
                iterations: 0,
                final_error: f64::MAX,
                converged: false,
            },
        }
    }
}

/// Maintains the latent graph and produces per-participant weights
pub struct GraphWeightOptimizer {
    graph: LatentGraph,
    participation: HashMap<String, u64>,
    weights: HashMap<String, f64>,
    rng: StdRng,
    strategy: OptimizationStrategy,
    learning_rate: f64,
    last_average_quality: Option<f64>,
}

impl GraphWeightOptimizer {
    pub fn new(config: &FeedbackConfig) -> Self {
        Self {
            graph: LatentGraph::new(),
            participation: HashMap::new(),
            weights: HashMap::new(),
            rng: StdRng::seed_from_u64(config.optimizer_seed),
            strategy: config.strategy,
            learning_rate: config.adaptive_learning.learning_rate,
            last_average_quality: None,
        }
    }

    /// Propagate strategy/learning-rate changes from a config update
    pub fn reconfigure(&mut self, config: &FeedbackConfig) {
        self.strategy = config.strategy;
        self.learning_rate = config.adaptive_learning.learning_rate;
    }

    pub fn record_participation(&mut self, participant_id: &str) {
        *self
            .participation
            .entry(participant_id.to_string())
            .or_default() += 1;
    }

    pub fn participation_count(&self, participant_id: &str) -> u64 {
        self.participation.get(participant_id).copied().unwrap_or(0)
    }

    pub fn current_weight(&self, participant_id: &str) -> f64 {
        self.weights.get(participant_id).copied().unwrap_or(1.0)
    }

    pub fn graph(&self) -> &LatentGraph {
        &self.graph
    }

    /// Refine the graph and produce weight multipliers for every participant.
    ///
    /// `quality` maps participant id to their current overall quality score.
    /// Never fails; internal errors degrade to [`OptimizationResult::fallback`].
    pub fn optimize(
        &mut self,
        quality: &HashMap<String, f64>,
        participants: &[ParticipantProfile],
        phase: DiscussionPhase,
    ) -> OptimizationResult {
        match self.optimize_inner(quality, participants, phase) {
            Ok(result) => result,
            Err(err) => {
                warn!("Optimizer failed, returning fallback result: {}", err);
                OptimizationResult::fallback(err.to_string())
            }
        }
    }

    fn optimize_inner(
        &mut self,
        quality: &HashMap<String, f64>,
        participants: &[ParticipantProfile],
        phase: DiscussionPhase,
    ) -> Result<OptimizationResult> {
        if quality.values().any(|q| !q.is_finite()) {
            return Err(ColloquyError::Optimization(
                "non-finite quality input".to_string(),
            ));
        }

        if participants.is_empty() {
            return Ok(OptimizationResult {
                recommendations: vec!["No participants to optimize".to_string()],
                weight_adjustments: HashMap::new(),
                graph_optimizations: Vec::new(),
                quality_improvement: 0.0,
                system_efficiency: EFFICIENCY_FLOOR,
                convergence: ConvergenceInfo {
                    iterations: 0,
                    final_error: 0.0,
                    converged: true,
                },
            });
        }

        for profile in participants {
            self.graph.ensure_participant(profile);
        }

        let average_quality = if quality.is_empty() {
            0.7
        } else {
            quality.values().sum::<f64>() / quality.len() as f64
        };

        // E-step input: one target per node, fixed for the whole call so
        // the EMA refinement below contracts geometrically
        let targets: Vec<(String, Vec<f64>)> = participants
            .iter()
            .map(|p| {
                let q = quality.get(&p.id).copied().unwrap_or(average_quality);
                let target = (0..crate::optimization::graph::EMBEDDING_DIM)
                    .map(|_| {
                        let noise = self.rng.gen_range(-NOISE_BOUND..=NOISE_BOUND);
                        (0.6 * q + 0.4 * average_quality + noise).clamp(0.0, 1.0)
                    })
                    .collect();
                (p.id.clone(), target)
            })
            .collect();

        let convergence = self.refine(&targets);

        let efficiency = (EFFICIENCY_FLOOR + 0.6 * self.graph.edge_density()).min(EFFICIENCY_CAP);
        let largest_share = self.graph.largest_cluster_share();
        let cohesion = (1.0 - 0.5 * largest_share).min(COHESION_CAP);

        let weight_adjustments =
            self.adjust_weights(quality, participants, phase, average_quality);

        let recommendations =
            Self::recommend(efficiency, largest_share, &weight_adjustments);

        let quality_improvement = self
            .last_average_quality
            .map(|last| (average_quality - last).clamp(-1.0, 1.0))
            .unwrap_or(0.0);
        self.last_average_quality = Some(average_quality);

        let system_efficiency = match self.strategy {
            OptimizationStrategy::QualityFocused => 0.7 * average_quality + 0.3 * efficiency,
            OptimizationStrategy::DiversityFocused => {
                0.5 * cohesion + 0.3 * efficiency + 0.2 * average_quality
            }
            OptimizationStrategy::EfficiencyFocused => 0.8 * efficiency + 0.2 * average_quality,
            OptimizationStrategy::Balanced | OptimizationStrategy::Custom => {
                (efficiency + cohesion + average_quality) / 3.0
            }
        };

        debug!(
            "Optimization pass: {} nodes, {} edges, efficiency {:.2}, {} iterations (converged: {})",
            self.graph.node_count(),
            self.graph.edge_count(),
            efficiency,
            convergence.iterations,
            convergence.converged
        );

        Ok(OptimizationResult {
            recommendations,
            weight_adjustments,
            graph_optimizations: vec![GraphOptimization {
                timestamp: Utc::now(),
                node_count: self.graph.node_count(),
                edge_count: self.graph.edge_count(),
                efficiency,
                cohesion,
            }],
            quality_improvement,
            system_efficiency,
            convergence,
        })
    }

    /// M-step loop: EMA embeddings toward targets, refresh edges, and
    /// stop once the mean update norm stabilizes
    fn refine(&mut self, targets: &[(String, Vec<f64>)]) -> ConvergenceInfo {
        let mut previous_error: Option<f64> = None;
        let mut final_error = 0.0;
        let mut iterations = 0;
        let mut converged = false;

        for iteration in 1..=MAX_ITERATIONS {
            iterations = iteration;
            let mut total_norm = 0.0;
            for (id, target) in targets {
                total_norm += self.graph.update_embedding(id, target, self.learning_rate);
            }
            self.graph.refresh_edges();

            let error = total_norm / targets.len() as f64;
            final_error = error;
            if let Some(previous) = previous_error {
                if (previous - error).abs() < CONVERGENCE_THRESHOLD {
                    converged = true;
                    break;
                }
            }
            previous_error = Some(error);
        }

        ConvergenceInfo {
            iterations,
            final_error,
            converged,
        }
    }

    fn adjust_weights(
        &mut self,
        quality: &HashMap<String, f64>,
        participants: &[ParticipantProfile],
        phase: DiscussionPhase,
        average_quality: f64,
    ) -> HashMap<String, WeightAdjustment> {
        let mean_participation = participants
            .iter()
            .map(|p| self.participation_count(&p.id) as f64)
            .sum::<f64>()
            / participants.len() as f64;

        let mut adjustments = HashMap::new();
        for profile in participants {
            let count = self.participation_count(&profile.id);
            let q = quality
                .get(&profile.id)
                .copied()
                .unwrap_or(average_quality);

            let cognitive = profile.phase_weights.for_phase(phase);
            let participation =
                ((mean_participation + 1.0) / (count as f64 + 1.0)).clamp(0.5, 1.5);
            let quality_factor = 0.7 + 0.6 * q;
            let graph_position = 0.8 + 0.4 * self.graph.degree_centrality(&profile.id);

            let raw = cognitive * participation * quality_factor * graph_position;
            let current = self.current_weight(&profile.id);
            let adjusted = clamp_weight(current + (raw - current) * WEIGHT_DAMPING);

            let reason = if participation > 1.1 {
                "under-participating; boosting speaking weight".to_string()
            } else if participation < 0.9 {
                "over-participating; damping speaking weight".to_string()
            } else if q < 0.6 {
                "recent quality below average".to_string()
            } else {
                "weight tracking factor product".to_string()
            };

            // Sigmoid over sample count: ~0.12 at 0 samples, ~0.88 at 20
            let confidence =
                (1.0 / (1.0 + (-((count as f64 - 10.0) / 5.0)).exp())).clamp(0.0, 1.0);

            self.weights.insert(profile.id.clone(), adjusted);
            adjustments.insert(
                profile.id.clone(),
                WeightAdjustment {
                    current_weight: current,
                    adjusted_weight: adjusted,
                    reason,
                    factors: WeightFactors {
                        cognitive,
                        participation,
                        quality: quality_factor,
                        graph_position,
                    },
                    confidence,
                },
            );
        }
        adjustments
    }

    fn recommend(
        efficiency: f64,
        largest_share: f64,
        adjustments: &HashMap<String, WeightAdjustment>,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        if efficiency < LOW_EFFICIENCY {
            recommendations.push("Improve connectivity between participants".to_string());
        }
        if largest_share > DOMINANT_CLUSTER_SHARE && adjustments.len() > 1 {
            recommendations
                .push("Rebalance temperament clusters to avoid dominance".to_string());
        }
        let mut low_weight: Vec<&String> = adjustments
            .iter()
            .filter(|(_, adj)| adj.adjusted_weight < LOW_WEIGHT)
            .map(|(id, _)| id)
            .collect();
        low_weight.sort();
        for id in low_weight {
            recommendations.push(format!("Increase speaking opportunities for {}", id));
        }
        if recommendations.is_empty() {
            recommendations.push("Interaction structure is healthy".to_string());
        }
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles(ids: &[&str]) -> Vec<ParticipantProfile> {
        ids.iter().map(|id| ParticipantProfile::default_for(id)).collect()
    }

    fn quality_map(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(id, q)| (id.to_string(), *q)).collect()
    }

    #[test]
    fn test_iterations_bounded() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        let participants = profiles(&["a", "b", "c", "d"]);
        let quality = quality_map(&[("a", 0.9), ("b", 0.4), ("c", 0.7), ("d", 0.6)]);

        let result = optimizer.optimize(&quality, &participants, DiscussionPhase::Interaction);
        assert!(result.convergence.iterations <= MAX_ITERATIONS);
        assert!(result.convergence.final_error.is_finite());
    }

    #[test]
    fn test_high_learning_rate_converges() {
        let mut config = FeedbackConfig::default();
        config.adaptive_learning.learning_rate = 1.0;
        let mut optimizer = GraphWeightOptimizer::new(&config);
        let participants = profiles(&["a", "b"]);
        let quality = quality_map(&[("a", 0.8), ("b", 0.8)]);

        let result = optimizer.optimize(&quality, &participants, DiscussionPhase::Initial);
        // Embeddings jump straight onto the target, so the update norm
        // stabilizes within a handful of iterations
        assert!(result.convergence.converged);
        assert!(result.convergence.iterations < MAX_ITERATIONS);
    }

    #[test]
    fn test_weights_clamped_under_adversarial_inputs() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        // Identical scores for everyone
        let participants = profiles(&["a", "b", "c"]);
        let quality = quality_map(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        for _ in 0..20 {
            let result =
                optimizer.optimize(&quality, &participants, DiscussionPhase::Consensus);
            for adjustment in result.weight_adjustments.values() {
                assert!(adjustment.adjusted_weight >= MIN_WEIGHT);
                assert!(adjustment.adjusted_weight <= MAX_WEIGHT);
                assert!((0.0..=1.0).contains(&adjustment.confidence));
            }
        }
    }

    #[test]
    fn test_zero_participants() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        let result =
            optimizer.optimize(&HashMap::new(), &[], DiscussionPhase::Initial);
        assert!(result.weight_adjustments.is_empty());
        assert!(result.convergence.converged);
        assert_eq!(result.convergence.iterations, 0);
    }

    #[test]
    fn test_single_participant_has_no_edges() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        let participants = profiles(&["solo"]);
        let quality = quality_map(&[("solo", 0.8)]);

        let result = optimizer.optimize(&quality, &participants, DiscussionPhase::Initial);
        let snapshot = &result.graph_optimizations[0];
        assert_eq!(snapshot.edge_count, 0);
        assert_eq!(snapshot.efficiency, 0.5);
        assert_eq!(snapshot.cohesion, 0.5);
        assert_eq!(result.weight_adjustments.len(), 1);
    }

    #[test]
    fn test_under_participation_boosts_weight() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        let participants = profiles(&["talker", "quiet"]);
        for _ in 0..10 {
            optimizer.record_participation("talker");
        }
        let quality = quality_map(&[("talker", 0.7), ("quiet", 0.7)]);

        let result = optimizer.optimize(&quality, &participants, DiscussionPhase::Interaction);
        let talker = &result.weight_adjustments["talker"];
        let quiet = &result.weight_adjustments["quiet"];
        assert!(quiet.factors.participation > talker.factors.participation);
        assert!(quiet.adjusted_weight > talker.adjusted_weight);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let config = FeedbackConfig::default();
        let participants = profiles(&["a", "b", "c"]);
        let quality = quality_map(&[("a", 0.6), ("b", 0.8), ("c", 0.5)]);

        let mut first = GraphWeightOptimizer::new(&config);
        let mut second = GraphWeightOptimizer::new(&config);
        let r1 = first.optimize(&quality, &participants, DiscussionPhase::Synthesis);
        let r2 = second.optimize(&quality, &participants, DiscussionPhase::Synthesis);

        assert_eq!(r1.convergence.iterations, r2.convergence.iterations);
        for (id, adj) in &r1.weight_adjustments {
            let other = &r2.weight_adjustments[id];
            assert!((adj.adjusted_weight - other.adjusted_weight).abs() < 1e-12);
        }
    }

    #[test]
    fn test_non_finite_quality_degrades_to_fallback() {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        let participants = profiles(&["a"]);
        let quality = quality_map(&[("a", f64::NAN)]);

        let result = optimizer.optimize(&quality, &participants, DiscussionPhase::Initial);
        assert!(!result.convergence.converged);
        assert!(result.weight_adjustments.is_empty());
        assert!((result.quality_improvement - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_weight() {
        assert_eq!(clamp_weight(5.0), MAX_WEIGHT);
        assert_eq!(clamp_weight(0.0), MIN_WEIGHT);
        assert_eq!(clamp_weight(f64::NAN), 1.0);
        assert_eq!(clamp_weight(1.3), 1.3);
    }
}
