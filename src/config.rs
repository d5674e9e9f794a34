//! Configuration for the Colloquy feedback engine
//!
//! A single structured [`FeedbackConfig`] object enumerates quality
//! thresholds, evaluator weights, the optimization strategy, and the
//! adaptive-learning parameters. Updates arrive as a deep-partial
//! [`FeedbackConfigPatch`] and are merged in place, so the coordinator
//! can propagate changes to the evaluator chain and history store
//! without re-initialization.

use crate::error::{ColloquyError, Result};
use crate::types::{ParticipantProfile, QualityDimension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Per-dimension quality thresholds plus the overall minimum
///
/// The overall minimum is the line under which the coordinator's default
/// listener raises a `quality_threshold_crossed` alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub performance: f64,
    pub psychological: f64,
    pub content_quality: f64,
    pub participant_alignment: f64,
    pub engagement: f64,
    pub overall_minimum: f64,
}

impl QualityThresholds {
    pub fn for_dimension(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::Performance => self.performance,
            QualityDimension::Psychological => self.psychological,
            QualityDimension::ContentQuality => self.content_quality,
            QualityDimension::ParticipantAlignment => self.participant_alignment,
            QualityDimension::Engagement => self.engagement,
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            performance: 0.7,
            psychological: 0.7,
            content_quality: 0.7,
            participant_alignment: 0.7,
            engagement: 0.7,
            overall_minimum: 0.6,
        }
    }
}

/// Relative weight of each built-in evaluator in the aggregate score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorWeights {
    pub performance: f64,
    pub psychological: f64,
    pub content_quality: f64,
    pub alignment: f64,
    pub engagement: f64,
}

impl Default for EvaluatorWeights {
    fn default() -> Self {
        Self {
            performance: 0.25,
            psychological: 0.20,
            content_quality: 0.25,
            alignment: 0.15,
            engagement: 0.15,
        }
    }
}

/// High-level optimization strategy tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStrategy {
    QualityFocused,
    DiversityFocused,
    EfficiencyFocused,
    Balanced,
    Custom,
}

impl std::fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationStrategy::QualityFocused => write!(f, "quality_focused"),
            OptimizationStrategy::DiversityFocused => write!(f, "diversity_focused"),
            OptimizationStrategy::EfficiencyFocused => write!(f, "efficiency_focused"),
            OptimizationStrategy::Balanced => write!(f, "balanced"),
            OptimizationStrategy::Custom => write!(f, "custom"),
        }
    }
}

/// Adaptive learning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveLearning {
    /// EMA learning rate for embedding updates
    pub learning_rate: f64,
    /// Recent-window size used by trend/consistency statistics
    pub window_size: usize,
    /// Emit detailed feedback every N turns (1 = every turn)
    pub feedback_frequency: u32,
}

impl Default for AdaptiveLearning {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            window_size: 10,
            feedback_frequency: 1,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub thresholds: QualityThresholds,
    pub evaluator_weights: EvaluatorWeights,
    pub strategy: OptimizationStrategy,
    pub realtime_optimization: bool,
    pub adaptive_learning: AdaptiveLearning,
    /// Seed for the optimizer's bounded noise; fixed default keeps runs reproducible
    pub optimizer_seed: u64,
    /// Known participant profiles; unknown ids fall back to a derived profile
    pub participants: Vec<ParticipantProfile>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            thresholds: QualityThresholds::default(),
            evaluator_weights: EvaluatorWeights::default(),
            strategy: OptimizationStrategy::Balanced,
            realtime_optimization: true,
            adaptive_learning: AdaptiveLearning::default(),
            optimizer_seed: 0x636f_6c6c,
            participants: Vec::new(),
        }
    }
}

impl FeedbackConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: FeedbackConfig = toml::from_str(&raw)?;
        config.validate()?;
        info!("Loaded feedback configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate ranges; called after loading and after every merge
    pub fn validate(&self) -> Result<()> {
        for dim in QualityDimension::ALL {
            let t = self.thresholds.for_dimension(dim);
            if !(0.0..=1.0).contains(&t) {
                return Err(ColloquyError::Config(format!(
                    "threshold for {} out of range: {}",
                    dim, t
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.thresholds.overall_minimum) {
            return Err(ColloquyError::Config(format!(
                "overall minimum out of range: {}",
                self.thresholds.overall_minimum
            )));
        }
        let weights = [
            self.evaluator_weights.performance,
            self.evaluator_weights.psychological,
            self.evaluator_weights.content_quality,
            self.evaluator_weights.alignment,
            self.evaluator_weights.engagement,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(ColloquyError::Config(
                "evaluator weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ColloquyError::Config(
                "at least one evaluator weight must be positive".to_string(),
            ));
        }
        if self.adaptive_learning.learning_rate <= 0.0 || self.adaptive_learning.learning_rate > 1.0
        {
            return Err(ColloquyError::Config(format!(
                "learning rate out of range: {}",
                self.adaptive_learning.learning_rate
            )));
        }
        if self.adaptive_learning.window_size == 0 {
            return Err(ColloquyError::Config(
                "window size must be positive".to_string(),
            ));
        }
        if self.adaptive_learning.feedback_frequency == 0 {
            return Err(ColloquyError::Config(
                "feedback frequency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a participant profile, falling back to a derived one
    pub fn profile_for(&self, participant_id: &str) -> ParticipantProfile {
        self.participants
            .iter()
            .find(|p| p.id == participant_id)
            .cloned()
            .unwrap_or_else(|| ParticipantProfile::default_for(participant_id))
    }

    /// Apply a deep-partial patch in place
    pub fn apply_patch(&mut self, patch: &FeedbackConfigPatch) -> Result<()> {
        let mut candidate = self.clone();

        if let Some(thresholds) = &patch.thresholds {
            thresholds.apply(&mut candidate.thresholds);
        }
        if let Some(weights) = &patch.evaluator_weights {
            weights.apply(&mut candidate.evaluator_weights);
        }
        if let Some(strategy) = patch.strategy {
            candidate.strategy = strategy;
        }
        if let Some(realtime) = patch.realtime_optimization {
            candidate.realtime_optimization = realtime;
        }
        if let Some(learning) = &patch.adaptive_learning {
            learning.apply(&mut candidate.adaptive_learning);
        }
        if let Some(seed) = patch.optimizer_seed {
            candidate.optimizer_seed = seed;
        }
        if let Some(participants) = &patch.participants {
            candidate.participants = participants.clone();
        }

        candidate.validate()?;
        debug!("Configuration patch applied");
        *self = candidate;
        Ok(())
    }
}

/// Deep-partial update for [`QualityThresholds`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholdsPatch {
    pub performance: Option<f64>,
    pub psychological: Option<f64>,
    pub content_quality: Option<f64>,
    pub participant_alignment: Option<f64>,
    pub engagement: Option<f64>,
    pub overall_minimum: Option<f64>,
}

impl QualityThresholdsPatch {
    fn apply(&self, target: &mut QualityThresholds) {
        if let Some(v) = self.performance {
            target.performance = v;
        }
        if let Some(v) = self.psychological {
            target.psychological = v;
        }
        if let Some(v) = self.content_quality {
            target.content_quality = v;
        }
        if let Some(v) = self.participant_alignment {
            target.participant_alignment = v;
        }
        if let Some(v) = self.engagement {
            target.engagement = v;
        }
        if let Some(v) = self.overall_minimum {
            target.overall_minimum = v;
        }
    }
}

/// Deep-partial update for [`EvaluatorWeights`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorWeightsPatch {
    pub performance: Option<f64>,
    pub psychological: Option<f64>,
    pub content_quality: Option<f64>,
    pub alignment: Option<f64>,
    pub engagement: Option<f64>,
}

impl EvaluatorWeightsPatch {
    fn apply(&self, target: &mut EvaluatorWeights) {
        if let Some(v) = self.performance {
            target.performance = v;
        }
        if let Some(v) = self.psychological {
            target.psychological = v;
        }
        if let Some(v) = self.content_quality {
            target.content_quality = v;
        }
        if let Some(v) = self.alignment {
            target.alignment = v;
        }
        if let Some(v) = self.engagement {
            target.engagement = v;
        }
    }
}

/// Deep-partial update for [`AdaptiveLearning`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveLearningPatch {
    pub learning_rate: Option<f64>,
    pub window_size: Option<usize>,
    pub feedback_frequency: Option<u32>,
}

impl AdaptiveLearningPatch {
    fn apply(&self, target: &mut AdaptiveLearning) {
        if let Some(v) = self.learning_rate {
            target.learning_rate = v;
        }
        if let Some(v) = self.window_size {
            target.window_size = v;
        }
        if let Some(v) = self.feedback_frequency {
            target.feedback_frequency = v;
        }
    }
}

/// Deep-partial update for the whole configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackConfigPatch {
    pub thresholds: Option<QualityThresholdsPatch>,
    pub evaluator_weights: Option<EvaluatorWeightsPatch>,
    pub strategy: Option<OptimizationStrategy>,
    pub realtime_optimization: Option<bool>,
    pub adaptive_learning: Option<AdaptiveLearningPatch>,
    pub optimizer_seed: Option<u64>,
    pub participants: Option<Vec<ParticipantProfile>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        FeedbackConfig::default().validate().unwrap();
    }

    #[test]
    fn test_patch_merges_partially() {
        let mut config = FeedbackConfig::default();
        let patch = FeedbackConfigPatch {
            thresholds: Some(QualityThresholdsPatch {
                overall_minimum: Some(0.5),
                ..Default::default()
            }),
            strategy: Some(OptimizationStrategy::QualityFocused),
            ..Default::default()
        };
        config.apply_patch(&patch).unwrap();

        assert_eq!(config.thresholds.overall_minimum, 0.5);
        assert_eq!(config.strategy, OptimizationStrategy::QualityFocused);
        // Untouched fields keep their defaults
        assert_eq!(config.thresholds.performance, 0.7);
        assert!(config.realtime_optimization);
    }

    #[test]
    fn test_invalid_patch_is_rejected_atomically() {
        let mut config = FeedbackConfig::default();
        let patch = FeedbackConfigPatch {
            adaptive_learning: Some(AdaptiveLearningPatch {
                learning_rate: Some(2.0),
                ..Default::default()
            }),
            thresholds: Some(QualityThresholdsPatch {
                overall_minimum: Some(0.4),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.apply_patch(&patch).is_err());
        // Nothing from the rejected patch leaked in
        assert_eq!(config.thresholds.overall_minimum, 0.6);
        assert_eq!(config.adaptive_learning.learning_rate, 0.1);
    }

    #[test]
    fn test_patch_roundtrip_is_idempotent() {
        let patch = FeedbackConfigPatch {
            evaluator_weights: Some(EvaluatorWeightsPatch {
                content_quality: Some(0.4),
                ..Default::default()
            }),
            optimizer_seed: Some(99),
            ..Default::default()
        };

        let restored: FeedbackConfigPatch =
            serde_json::from_str(&serde_json::to_string(&patch).unwrap()).unwrap();
        assert_eq!(patch, restored);

        let mut once = FeedbackConfig::default();
        once.apply_patch(&patch).unwrap();
        let mut twice = once.clone();
        twice.apply_patch(&restored).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_profile_fallback_for_unknown_participant() {
        let config = FeedbackConfig::default();
        let profile = config.profile_for("ghost");
        assert_eq!(profile.id, "ghost");
        assert!(profile.trait_keywords.is_empty());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FeedbackConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: FeedbackConfig = toml::from_str(&raw).unwrap();
        assert_eq!(config, parsed);
    }
}
