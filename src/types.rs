//! Core data structures for the Colloquy feedback engine
//!
//! Everything that crosses a component boundary lives here: discussion
//! phases, temperament clusters, quality dimensions, score vectors, and
//! the immutable per-call evaluation context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Score used for every dimension when no evaluator succeeds.
///
/// Any `QualityScores` built from this constant carries
/// `breakdown.degraded = true` so callers can tell a real 0.7 apart
/// from a fallback one.
pub const FALLBACK_DIMENSION_SCORE: f64 = 0.7;

/// Phase of the simulated discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionPhase {
    Initial,
    Interaction,
    Synthesis,
    Consensus,
}

impl std::fmt::Display for DiscussionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscussionPhase::Initial => write!(f, "initial"),
            DiscussionPhase::Interaction => write!(f, "interaction"),
            DiscussionPhase::Synthesis => write!(f, "synthesis"),
            DiscussionPhase::Consensus => write!(f, "consensus"),
        }
    }
}

/// Temperament cluster a participant belongs to
///
/// The latent interaction graph assigns every participant to exactly one
/// of these four groups. Persona definitions are out of scope; the
/// temperament is either supplied via [`ParticipantProfile`] or derived
/// from a stable hash of the participant id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperament {
    Analytical,
    Empathic,
    Pragmatic,
    Exploratory,
}

impl Temperament {
    pub const ALL: [Temperament; 4] = [
        Temperament::Analytical,
        Temperament::Empathic,
        Temperament::Pragmatic,
        Temperament::Exploratory,
    ];

    /// Stable fallback assignment for participants without a profile
    pub fn from_participant_id(id: &str) -> Self {
        let sum: u64 = id.bytes().map(u64::from).sum();
        Self::ALL[(sum % 4) as usize]
    }

    /// Index into the static compatibility matrix
    pub fn index(&self) -> usize {
        match self {
            Temperament::Analytical => 0,
            Temperament::Empathic => 1,
            Temperament::Pragmatic => 2,
            Temperament::Exploratory => 3,
        }
    }
}

impl std::fmt::Display for Temperament {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Temperament::Analytical => write!(f, "analytical"),
            Temperament::Empathic => write!(f, "empathic"),
            Temperament::Pragmatic => write!(f, "pragmatic"),
            Temperament::Exploratory => write!(f, "exploratory"),
        }
    }
}

/// Per-phase cognitive profile weights
///
/// Looked up by the optimizer when computing the cognitive factor of a
/// participant's weight adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseWeights {
    pub initial: f64,
    pub interaction: f64,
    pub synthesis: f64,
    pub consensus: f64,
}

impl PhaseWeights {
    pub fn for_phase(&self, phase: DiscussionPhase) -> f64 {
        match phase {
            DiscussionPhase::Initial => self.initial,
            DiscussionPhase::Interaction => self.interaction,
            DiscussionPhase::Synthesis => self.synthesis,
            DiscussionPhase::Consensus => self.consensus,
        }
    }
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            initial: 1.0,
            interaction: 1.0,
            synthesis: 1.0,
            consensus: 1.0,
        }
    }
}

/// What the engine knows about one participant
///
/// Only identity-adjacent facts needed by the optimizer and the
/// alignment analysis; the persona prompt itself never enters this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub id: String,
    pub temperament: Temperament,
    #[serde(default)]
    pub phase_weights: PhaseWeights,
    /// Trait keywords the participant is expected to exhibit
    #[serde(default)]
    pub trait_keywords: Vec<String>,
}

impl ParticipantProfile {
    /// Default profile for a participant the configuration never named
    pub fn default_for(id: &str) -> Self {
        Self {
            id: id.to_string(),
            temperament: Temperament::from_participant_id(id),
            phase_weights: PhaseWeights::default(),
            trait_keywords: Vec::new(),
        }
    }
}

/// Named quality dimension, each bounded to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    Performance,
    Psychological,
    ContentQuality,
    ParticipantAlignment,
    Engagement,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 5] = [
        QualityDimension::Performance,
        QualityDimension::Psychological,
        QualityDimension::ContentQuality,
        QualityDimension::ParticipantAlignment,
        QualityDimension::Engagement,
    ];
}

impl std::fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityDimension::Performance => write!(f, "performance"),
            QualityDimension::Psychological => write!(f, "psychological"),
            QualityDimension::ContentQuality => write!(f, "content_quality"),
            QualityDimension::ParticipantAlignment => write!(f, "participant_alignment"),
            QualityDimension::Engagement => write!(f, "engagement"),
        }
    }
}

/// Diagnostic breakdown attached to every score vector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Overall score each surviving evaluator contributed, keyed by kind
    pub per_evaluator: BTreeMap<String, f64>,
    /// True when one or more evaluators failed and were excluded
    pub degraded: bool,
    pub notes: Vec<String>,
}

/// Multi-dimensional quality score for a single utterance
///
/// Invariants: every dimension value and `overall` are finite and lie
/// in [0, 1]. The canonical fallback constructor is the only way a
/// degraded vector is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScores {
    pub dimensions: BTreeMap<QualityDimension, f64>,
    pub overall: f64,
    pub breakdown: ScoreBreakdown,
}

impl QualityScores {
    /// Canonical fallback used by every no-evaluator-succeeded path
    pub fn fallback(note: impl Into<String>) -> Self {
        let dimensions = QualityDimension::ALL
            .iter()
            .map(|d| (*d, FALLBACK_DIMENSION_SCORE))
            .collect();
        Self {
            dimensions,
            overall: FALLBACK_DIMENSION_SCORE,
            breakdown: ScoreBreakdown {
                degraded: true,
                notes: vec![note.into()],
                ..Default::default()
            },
        }
    }

    /// Dimension value with fallback to the overall score
    pub fn dimension(&self, dimension: QualityDimension) -> f64 {
        self.dimensions.get(&dimension).copied().unwrap_or(self.overall)
    }

    /// Lowest-scoring dimension, used to prioritize next-turn guidance
    pub fn weakest_dimension(&self) -> Option<(QualityDimension, f64)> {
        self.dimensions
            .iter()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(d, v)| (*d, *v))
    }

    /// Clamp every value into [0, 1] and scrub non-finite entries
    pub fn sanitize(mut self) -> Self {
        for value in self.dimensions.values_mut() {
            if !value.is_finite() {
                *value = FALLBACK_DIMENSION_SCORE;
            }
            *value = value.clamp(0.0, 1.0);
        }
        if !self.overall.is_finite() {
            self.overall = FALLBACK_DIMENSION_SCORE;
        }
        self.overall = self.overall.clamp(0.0, 1.0);
        self
    }
}

/// Compact view of one past evaluation, embedded in the context snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub turn_number: u32,
    pub overall: f64,
    pub timestamp: DateTime<Utc>,
}

/// Immutable input for one evaluation call
///
/// Owned by the call that created it and never mutated afterwards; the
/// chain shares it into evaluator tasks behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContext {
    pub utterance: String,
    pub topic: String,
    pub participant_id: String,
    pub phase: DiscussionPhase,
    pub turn_number: u32,
    pub current_weight: f64,
    /// Recent history snapshot for this participant
    #[serde(default)]
    pub recent_history: Vec<HistorySnapshot>,
    /// Snapshot of all participants' current weights
    #[serde(default)]
    pub participant_weights: HashMap<String, f64>,
}

impl EvaluationContext {
    /// Minimal context for a first-turn utterance
    pub fn new(
        utterance: impl Into<String>,
        topic: impl Into<String>,
        participant_id: impl Into<String>,
        phase: DiscussionPhase,
    ) -> Self {
        Self {
            utterance: utterance.into(),
            topic: topic.into(),
            participant_id: participant_id.into(),
            phase,
            turn_number: 1,
            current_weight: 1.0,
            recent_history: Vec::new(),
            participant_weights: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_scores_are_degraded() {
        let scores = QualityScores::fallback("all evaluators failed");
        assert!(scores.breakdown.degraded);
        assert_eq!(scores.overall, FALLBACK_DIMENSION_SCORE);
        for dim in QualityDimension::ALL {
            assert_eq!(scores.dimension(dim), FALLBACK_DIMENSION_SCORE);
        }
    }

    #[test]
    fn test_sanitize_clamps_and_scrubs() {
        let mut dims = BTreeMap::new();
        dims.insert(QualityDimension::Performance, 1.7);
        dims.insert(QualityDimension::Engagement, f64::NAN);
        let scores = QualityScores {
            dimensions: dims,
            overall: -0.3,
            breakdown: ScoreBreakdown::default(),
        }
        .sanitize();

        assert_eq!(scores.dimension(QualityDimension::Performance), 1.0);
        assert_eq!(
            scores.dimension(QualityDimension::Engagement),
            FALLBACK_DIMENSION_SCORE
        );
        assert_eq!(scores.overall, 0.0);
    }

    #[test]
    fn test_weakest_dimension() {
        let mut dims = BTreeMap::new();
        dims.insert(QualityDimension::Performance, 0.9);
        dims.insert(QualityDimension::Psychological, 0.4);
        dims.insert(QualityDimension::ContentQuality, 0.8);
        let scores = QualityScores {
            dimensions: dims,
            overall: 0.7,
            breakdown: ScoreBreakdown::default(),
        };
        let (dim, value) = scores.weakest_dimension().unwrap();
        assert_eq!(dim, QualityDimension::Psychological);
        assert!((value - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_temperament_assignment_is_stable() {
        let a = Temperament::from_participant_id("participant-3");
        let b = Temperament::from_participant_id("participant-3");
        assert_eq!(a, b);
    }

    #[test]
    fn test_phase_serde_snake_case() {
        let json = serde_json::to_string(&DiscussionPhase::Synthesis).unwrap();
        assert_eq!(json, "\"synthesis\"");
    }
}
