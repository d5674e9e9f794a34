//! Evaluator trait and the built-in heuristic evaluators
//!
//! An evaluator scores one utterance against one or more quality
//! dimensions. Evaluators are stateless per call; the chain runs them
//! concurrently and owns weighting/enablement. The built-in set covers
//! the closed [`EvaluatorKind`] registry with cheap deterministic text
//! heuristics, standing in for the out-of-scope model-backed scorers
//! behind the same trait.

use crate::error::{ColloquyError, Result};
use crate::types::{EvaluationContext, QualityDimension};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Closed set of evaluator kinds
///
/// One kind per built-in scorer; custom evaluators implement
/// [`Evaluator`] and claim one of these kinds when registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Performance,
    Psychological,
    ContentQuality,
    Alignment,
    Engagement,
}

impl EvaluatorKind {
    pub const ALL: [EvaluatorKind; 5] = [
        EvaluatorKind::Performance,
        EvaluatorKind::Psychological,
        EvaluatorKind::ContentQuality,
        EvaluatorKind::Alignment,
        EvaluatorKind::Engagement,
    ];

    /// Dimension this evaluator is primarily responsible for
    pub fn primary_dimension(&self) -> QualityDimension {
        match self {
            EvaluatorKind::Performance => QualityDimension::Performance,
            EvaluatorKind::Psychological => QualityDimension::Psychological,
            EvaluatorKind::ContentQuality => QualityDimension::ContentQuality,
            EvaluatorKind::Alignment => QualityDimension::ParticipantAlignment,
            EvaluatorKind::Engagement => QualityDimension::Engagement,
        }
    }
}

impl std::fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluatorKind::Performance => write!(f, "performance"),
            EvaluatorKind::Psychological => write!(f, "psychological"),
            EvaluatorKind::ContentQuality => write!(f, "content_quality"),
            EvaluatorKind::Alignment => write!(f, "alignment"),
            EvaluatorKind::Engagement => write!(f, "engagement"),
        }
    }
}

/// What a single evaluator returns for one utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorVerdict {
    /// Overall score in [0, 1]
    pub score: f64,
    /// Evaluator confidence in its own score, [0, 1]
    pub confidence: f64,
    /// Per-dimension scores; missing dimensions fall back to `score`
    pub dimension_scores: BTreeMap<QualityDimension, f64>,
    pub suggestions: Vec<String>,
}

impl EvaluatorVerdict {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            dimension_scores: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dimension: QualityDimension, value: f64) -> Self {
        self.dimension_scores.insert(dimension, value.clamp(0.0, 1.0));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Pluggable utterance scorer
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> EvaluatorKind;

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict>;
}

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z'\-]+").expect("word regex"));

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "have", "has", "but", "not", "are",
    "was", "were", "will", "would", "could", "should", "about", "into", "over", "more", "very",
    "than", "then", "them", "they", "their", "there", "here", "what", "when", "which", "while",
    "also", "been", "being", "its", "it's", "can", "may", "might", "must", "shall", "our", "your",
];

/// Lowercased content keywords of a text, stopwords removed
pub fn extract_keywords(text: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Intersection ratio between expected and detected keyword sets
///
/// Empty expectation yields a neutral score. Detecting more than was
/// expected earns a small bonus, capped at 1.0.
pub fn alignment_ratio(expected: &[String], detected: &HashSet<String>) -> f64 {
    if expected.is_empty() {
        return 0.75;
    }
    let expected_set: HashSet<String> = expected.iter().map(|s| s.to_lowercase()).collect();
    let matched = expected_set.intersection(detected).count();
    let mut ratio = matched as f64 / expected_set.len() as f64;
    if matched == expected_set.len() && detected.len() > matched {
        ratio += 0.1;
    }
    ratio.min(1.0)
}

fn require_utterance(ctx: &EvaluationContext, kind: EvaluatorKind) -> Result<()> {
    if ctx.utterance.trim().is_empty() {
        return Err(ColloquyError::EvaluatorFailed {
            evaluator: kind.to_string(),
            reason: "empty utterance".to_string(),
        });
    }
    Ok(())
}

fn word_count(text: &str) -> usize {
    WORD_RE.find_iter(text).count()
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1)
}

/// Scores structural fluency: length band and sentence rhythm
pub struct PerformanceEvaluator;

#[async_trait]
impl Evaluator for PerformanceEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Performance
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict> {
        require_utterance(ctx, self.kind())?;

        let words = word_count(&ctx.utterance);
        let sentences = sentence_count(&ctx.utterance);
        let words_per_sentence = words as f64 / sentences as f64;

        // Length band: 30-160 words reads as a deliberate contribution
        let length_score = match words {
            0..=9 => 0.3,
            10..=29 => 0.6,
            30..=160 => 0.9,
            161..=280 => 0.7,
            _ => 0.5,
        };
        // Sentence rhythm: 8-25 words per sentence
        let rhythm_score = if (8.0..=25.0).contains(&words_per_sentence) {
            0.9
        } else if (5.0..=35.0).contains(&words_per_sentence) {
            0.7
        } else {
            0.5
        };

        let score = 0.6 * length_score + 0.4 * rhythm_score;
        let mut verdict = EvaluatorVerdict::new(score, 0.8)
            .with_dimension(QualityDimension::Performance, score);
        if words < 30 {
            verdict = verdict.with_suggestion("Develop the point in a little more depth");
        }
        Ok(verdict)
    }
}

const HEDGES: &[&str] = &[
    "perhaps", "maybe", "think", "feel", "believe", "wonder", "seems", "suppose", "imagine",
];
const AFFECT: &[&str] = &[
    "concern", "excited", "worry", "hope", "appreciate", "agree", "disagree", "surprised",
    "curious", "glad", "frustrat",
];

/// Scores psychological realism: hedging, perspective markers, affect
pub struct PsychologicalEvaluator;

#[async_trait]
impl Evaluator for PsychologicalEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Psychological
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict> {
        require_utterance(ctx, self.kind())?;

        let lower = ctx.utterance.to_lowercase();
        let hedge_hits = HEDGES.iter().filter(|h| lower.contains(*h)).count();
        let affect_hits = AFFECT.iter().filter(|a| lower.contains(*a)).count();
        let first_person = lower.contains("i ") || lower.starts_with('i') || lower.contains("my ");

        let mut score: f64 = 0.5;
        score += (hedge_hits.min(2) as f64) * 0.1;
        score += (affect_hits.min(2) as f64) * 0.1;
        if first_person {
            score += 0.1;
        }

        let mut verdict = EvaluatorVerdict::new(score, 0.7)
            .with_dimension(QualityDimension::Psychological, score);
        if !first_person {
            verdict = verdict.with_suggestion("Speak from the participant's own perspective");
        }
        Ok(verdict)
    }
}

/// Scores topical substance: topic overlap and content density
pub struct ContentQualityEvaluator;

#[async_trait]
impl Evaluator for ContentQualityEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::ContentQuality
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict> {
        require_utterance(ctx, self.kind())?;

        let utterance_keywords = extract_keywords(&ctx.utterance);
        let topic_keywords = extract_keywords(&ctx.topic);

        let topic_overlap = if topic_keywords.is_empty() {
            0.6
        } else {
            let matched = topic_keywords.intersection(&utterance_keywords).count();
            (matched as f64 / topic_keywords.len() as f64).min(1.0)
        };

        let words = word_count(&ctx.utterance).max(1);
        let density = (utterance_keywords.len() as f64 / words as f64).min(1.0);
        let has_specifics = ctx.utterance.chars().any(|c| c.is_ascii_digit())
            || ctx.utterance.contains("for example")
            || ctx.utterance.contains("such as");

        let mut score = 0.35 + 0.35 * topic_overlap + 0.2 * density;
        if has_specifics {
            score += 0.1;
        }

        let mut verdict = EvaluatorVerdict::new(score, 0.8)
            .with_dimension(QualityDimension::ContentQuality, score);
        if topic_overlap < 0.3 {
            verdict = verdict.with_suggestion("Tie the argument back to the topic under discussion");
        }
        Ok(verdict)
    }
}

/// Scores how well the utterance matches the participant's expected traits
pub struct AlignmentEvaluator {
    /// Expected trait keywords per participant id
    trait_keywords: HashMap<String, Vec<String>>,
}

impl AlignmentEvaluator {
    pub fn new(trait_keywords: HashMap<String, Vec<String>>) -> Self {
        Self { trait_keywords }
    }
}

#[async_trait]
impl Evaluator for AlignmentEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Alignment
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict> {
        require_utterance(ctx, self.kind())?;

        let detected = extract_keywords(&ctx.utterance);
        let expected = self
            .trait_keywords
            .get(&ctx.participant_id)
            .cloned()
            .unwrap_or_default();
        let ratio = alignment_ratio(&expected, &detected);

        let mut verdict = EvaluatorVerdict::new(ratio, if expected.is_empty() { 0.4 } else { 0.8 })
            .with_dimension(QualityDimension::ParticipantAlignment, ratio);
        if !expected.is_empty() && ratio < 0.5 {
            verdict = verdict.with_suggestion("Lean further into the participant's characteristic angle");
        }
        Ok(verdict)
    }
}

/// Scores interactional engagement: questions and references to others
pub struct EngagementEvaluator;

#[async_trait]
impl Evaluator for EngagementEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Engagement
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> Result<EvaluatorVerdict> {
        require_utterance(ctx, self.kind())?;

        let lower = ctx.utterance.to_lowercase();
        let asks_question = ctx.utterance.contains('?');
        let addresses_other = lower.contains("you ") || lower.contains("your ");
        let names_participant = ctx
            .participant_weights
            .keys()
            .filter(|id| **id != ctx.participant_id)
            .any(|id| lower.contains(&id.to_lowercase()));
        let builds_on = lower.contains("agree") || lower.contains("point") || lower.contains("add");

        let mut score: f64 = 0.45;
        if asks_question {
            score += 0.15;
        }
        if addresses_other {
            score += 0.15;
        }
        if names_participant {
            score += 0.15;
        }
        if builds_on {
            score += 0.1;
        }
        // The opening phase has nobody to engage with yet
        if ctx.turn_number <= 1 && !asks_question {
            score = score.max(0.6);
        }

        let mut verdict = EvaluatorVerdict::new(score, 0.7)
            .with_dimension(QualityDimension::Engagement, score);
        if !asks_question && !addresses_other && !names_participant {
            verdict = verdict.with_suggestion("Engage directly with another participant's point");
        }
        Ok(verdict)
    }
}
