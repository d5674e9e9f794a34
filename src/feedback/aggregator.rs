//! Feedback aggregation: scores + optimizer output + history → feedback
//!
//! Combines the templated score phrase, dimension-threshold strengths
//! and weaknesses, trait-keyword alignment analysis, progress tracking,
//! and next-turn guidance into one structured [`DetailedFeedback`].
//! Infallible outward: any internal error degrades to the canonical
//! fallback feedback object.

use crate::config::QualityThresholds;
use crate::error::{ColloquyError, Result};
use crate::evaluation::evaluator::{alignment_ratio, extract_keywords};
use crate::evaluation::history::ParticipantStats;
use crate::feedback::prompts;
use crate::optimization::OptimizationResult;
use crate::types::{
    DiscussionPhase, EvaluationContext, ParticipantProfile, QualityScores,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Strength requires clearing the dimension threshold by this margin
const STRENGTH_MARGIN: f64 = 0.1;

/// Expected-versus-detected trait keyword comparison
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub expected: Vec<String>,
    /// Expected keywords actually found in the utterance
    pub detected: Vec<String>,
    pub ratio: f64,
}

/// Progress pulled from the history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub summary: String,
    pub average: f64,
    pub consistency: f64,
    pub record_count: usize,
    /// How this utterance compares to the participant's running average
    pub delta_from_average: f64,
}

/// Structured feedback for one evaluated utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedFeedback {
    pub message: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub alignment: AlignmentReport,
    pub progress: Option<ProgressReport>,
    /// Guidance for the next turn, prioritizing the weakest dimension
    pub guidance: String,
    /// Prompt text the caller re-submits to the generation backend
    pub adaptive_prompt: String,
    /// Weight-change explanation when the optimizer adjusted this participant
    pub weight_note: Option<String>,
    /// True when this object came from the fallback path
    pub degraded: bool,
}

impl DetailedFeedback {
    /// Canonical fallback used by every aggregation failure path
    pub fn fallback(participant_id: &str) -> Self {
        Self {
            message: format!(
                "Feedback for {} is temporarily unavailable; continuing the discussion",
                participant_id
            ),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            alignment: AlignmentReport::default(),
            progress: None,
            guidance: "Continue contributing naturally in the next turn".to_string(),
            adaptive_prompt: format!(
                "Continue the discussion as {} in your usual manner.",
                participant_id
            ),
            weight_note: None,
            degraded: true,
        }
    }
}

/// Parameters for standalone adaptive prompt generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptivePromptParams {
    pub participant_id: String,
    pub topic: String,
    pub phase: DiscussionPhase,
}

/// Stateless aggregation of pipeline outputs into detailed feedback
pub struct FeedbackAggregator;

impl FeedbackAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Build feedback; never fails outward
    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(
        &self,
        scores: &QualityScores,
        optimization: Option<&OptimizationResult>,
        ctx: &EvaluationContext,
        stats: Option<&ParticipantStats>,
        profile: &ParticipantProfile,
        thresholds: &QualityThresholds,
    ) -> DetailedFeedback {
        match self.aggregate_inner(scores, optimization, ctx, stats, profile, thresholds) {
            Ok(feedback) => feedback,
            Err(err) => {
                warn!(
                    "Feedback aggregation failed for {}: {}",
                    ctx.participant_id, err
                );
                DetailedFeedback::fallback(&ctx.participant_id)
            }
        }
    }

    fn aggregate_inner(
        &self,
        scores: &QualityScores,
        optimization: Option<&OptimizationResult>,
        ctx: &EvaluationContext,
        stats: Option<&ParticipantStats>,
        profile: &ParticipantProfile,
        thresholds: &QualityThresholds,
    ) -> Result<DetailedFeedback> {
        if !scores.overall.is_finite() {
            return Err(ColloquyError::Aggregation(
                "non-finite overall score".to_string(),
            ));
        }

        let message =
            prompts::band_phrase(prompts::ScoreBand::of(scores.overall), &ctx.participant_id);

        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        for (dim, value) in &scores.dimensions {
            let threshold = thresholds.for_dimension(*dim);
            if *value >= threshold + STRENGTH_MARGIN {
                strengths.push(prompts::strength_phrase(*dim));
            } else if *value < threshold {
                weaknesses.push(prompts::weakness_phrase(*dim));
            }
        }

        let detected_all = extract_keywords(&ctx.utterance);
        let ratio = alignment_ratio(&profile.trait_keywords, &detected_all);
        let mut detected: Vec<String> = profile
            .trait_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| detected_all.contains(k))
            .collect();
        detected.sort();
        let alignment = AlignmentReport {
            expected: profile.trait_keywords.clone(),
            detected,
            ratio,
        };

        let progress = stats.map(|s| ProgressReport {
            summary: prompts::progress_phrase(s),
            average: s.average,
            consistency: s.consistency,
            record_count: s.record_count,
            delta_from_average: scores.overall - s.average,
        });

        let guidance = scores
            .weakest_dimension()
            .map(|(dim, _)| prompts::dimension_guidance(dim).to_string())
            .unwrap_or_else(|| "Keep the next turn on its current course".to_string());

        let weight_note = optimization
            .and_then(|opt| opt.weight_adjustments.get(&ctx.participant_id))
            .filter(|adj| (adj.adjusted_weight - adj.current_weight).abs() > 0.05)
            .map(|adj| {
                format!(
                    "Speaking weight moved from {:.2} to {:.2}: {}",
                    adj.current_weight, adj.adjusted_weight, adj.reason
                )
            });

        let adaptive_prompt = prompts::adaptive_prompt(
            &ctx.participant_id,
            &ctx.topic,
            ctx.phase,
            &guidance,
            stats,
        );

        Ok(DetailedFeedback {
            message,
            strengths,
            weaknesses,
            alignment,
            progress,
            guidance,
            adaptive_prompt,
            weight_note,
            degraded: false,
        })
    }

    /// Guidance text for the next turn, from history alone
    pub fn adaptive_prompt(
        &self,
        params: &AdaptivePromptParams,
        stats: Option<&ParticipantStats>,
    ) -> String {
        let guidance = stats
            .and_then(|s| s.weaknesses.first())
            .map(|dim| prompts::dimension_guidance(*dim).to_string())
            .unwrap_or_else(|| "Build on the strongest thread of the discussion so far".to_string());
        prompts::adaptive_prompt(
            &params.participant_id,
            &params.topic,
            params.phase,
            &guidance,
            stats,
        )
    }
}

impl Default for FeedbackAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::history::Trend;
    use crate::types::{QualityDimension, ScoreBreakdown};
    use std::collections::BTreeMap;

    fn scores(overall: f64, dims: &[(QualityDimension, f64)]) -> QualityScores {
        QualityScores {
            dimensions: dims.iter().cloned().collect::<BTreeMap<_, _>>(),
            overall,
            breakdown: ScoreBreakdown::default(),
        }
    }

    fn ctx(utterance: &str) -> EvaluationContext {
        EvaluationContext::new(utterance, "test topic", "alice", DiscussionPhase::Interaction)
    }

    fn stats(average: f64) -> ParticipantStats {
        ParticipantStats {
            average,
            best: average,
            worst: average,
            trend: Trend::Stable,
            consistency: 0.9,
            strengths: vec![QualityDimension::ContentQuality],
            weaknesses: vec![QualityDimension::Engagement],
            record_count: 4,
        }
    }

    #[test]
    fn test_aggregate_builds_band_message() {
        let aggregator = FeedbackAggregator::new();
        let feedback = aggregator.aggregate(
            &scores(0.92, &[(QualityDimension::Performance, 0.92)]),
            None,
            &ctx("A thorough argument."),
            None,
            &ParticipantProfile::default_for("alice"),
            &QualityThresholds::default(),
        );
        assert!(feedback.message.contains("excellent"));
        assert!(!feedback.degraded);
    }

    #[test]
    fn test_strengths_and_weaknesses_from_thresholds() {
        let aggregator = FeedbackAggregator::new();
        let feedback = aggregator.aggregate(
            &scores(
                0.7,
                &[
                    (QualityDimension::ContentQuality, 0.9),
                    (QualityDimension::Engagement, 0.4),
                ],
            ),
            None,
            &ctx("An argument."),
            None,
            &ParticipantProfile::default_for("alice"),
            &QualityThresholds::default(),
        );
        assert!(feedback
            .strengths
            .iter()
            .any(|s| s.contains("content_quality")));
        assert!(feedback.weaknesses.iter().any(|w| w.contains("engagement")));
        // Guidance targets the weakest dimension
        assert!(feedback.guidance.contains("React to another participant"));
    }

    #[test]
    fn test_alignment_detects_trait_keywords() {
        let aggregator = FeedbackAggregator::new();
        let mut profile = ParticipantProfile::default_for("alice");
        profile.trait_keywords = vec!["evidence".to_string(), "rigor".to_string()];
        let feedback = aggregator.aggregate(
            &scores(0.8, &[(QualityDimension::Performance, 0.8)]),
            None,
            &ctx("The evidence here is compelling."),
            None,
            &profile,
            &QualityThresholds::default(),
        );
        assert_eq!(feedback.alignment.detected, vec!["evidence".to_string()]);
        assert!((feedback.alignment.ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_progress_reflects_history() {
        let aggregator = FeedbackAggregator::new();
        let s = stats(0.6);
        let feedback = aggregator.aggregate(
            &scores(0.8, &[(QualityDimension::Performance, 0.8)]),
            None,
            &ctx("An argument."),
            Some(&s),
            &ParticipantProfile::default_for("alice"),
            &QualityThresholds::default(),
        );
        let progress = feedback.progress.unwrap();
        assert!((progress.delta_from_average - 0.2).abs() < 1e-9);
        assert_eq!(progress.record_count, 4);
    }

    #[test]
    fn test_non_finite_scores_fall_back() {
        let aggregator = FeedbackAggregator::new();
        let feedback = aggregator.aggregate(
            &scores(f64::NAN, &[]),
            None,
            &ctx("An argument."),
            None,
            &ParticipantProfile::default_for("alice"),
            &QualityThresholds::default(),
        );
        assert!(feedback.degraded);
        assert!(feedback.message.contains("temporarily unavailable"));
    }

    #[test]
    fn test_adaptive_prompt_targets_weak_dimension() {
        let aggregator = FeedbackAggregator::new();
        let params = AdaptivePromptParams {
            participant_id: "alice".to_string(),
            topic: "urban transit".to_string(),
            phase: DiscussionPhase::Consensus,
        };
        let prompt = aggregator.adaptive_prompt(&params, Some(&stats(0.6)));
        assert!(prompt.contains("urban transit"));
        assert!(prompt.contains("React to another participant"));
    }
}
