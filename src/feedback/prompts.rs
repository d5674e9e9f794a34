//! Feedback phrase and prompt templates
//!
//! Pure text construction, shared by the aggregator and the adaptive
//! prompt generator. Phrases are templated by score band and
//! participant identity.

use crate::evaluation::history::{ParticipantStats, Trend};
use crate::types::{DiscussionPhase, QualityDimension};

/// Score band backing the templated feedback phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Excellent,
    Good,
    Satisfactory,
    NeedsImprovement,
    Poor,
}

impl ScoreBand {
    pub fn of(overall: f64) -> Self {
        if overall >= 0.9 {
            ScoreBand::Excellent
        } else if overall >= 0.8 {
            ScoreBand::Good
        } else if overall >= 0.7 {
            ScoreBand::Satisfactory
        } else if overall >= 0.5 {
            ScoreBand::NeedsImprovement
        } else {
            ScoreBand::Poor
        }
    }
}

/// Scored feedback phrase for one participant
pub fn band_phrase(band: ScoreBand, participant_id: &str) -> String {
    match band {
        ScoreBand::Excellent => format!(
            "{} delivered an excellent contribution that moved the discussion forward",
            participant_id
        ),
        ScoreBand::Good => format!(
            "{} made a good contribution with room to sharpen a detail or two",
            participant_id
        ),
        ScoreBand::Satisfactory => format!(
            "{} made a satisfactory contribution; the core point landed",
            participant_id
        ),
        ScoreBand::NeedsImprovement => format!(
            "{}'s contribution needs improvement to carry its weight in the discussion",
            participant_id
        ),
        ScoreBand::Poor => format!(
            "{}'s contribution fell short of the discussion's standard",
            participant_id
        ),
    }
}

/// Next-turn guidance for the weakest dimension
pub fn dimension_guidance(dimension: QualityDimension) -> &'static str {
    match dimension {
        QualityDimension::Performance => {
            "Structure the next utterance more deliberately: one claim, support, and a close"
        }
        QualityDimension::Psychological => {
            "Let the participant's own perspective and feelings show in the next turn"
        }
        QualityDimension::ContentQuality => {
            "Ground the next turn in the topic with a concrete fact or example"
        }
        QualityDimension::ParticipantAlignment => {
            "Lean into the participant's characteristic viewpoint in the next turn"
        }
        QualityDimension::Engagement => {
            "React to another participant directly, by name or with a question"
        }
    }
}

pub fn strength_phrase(dimension: QualityDimension) -> String {
    format!("consistently strong {}", dimension)
}

pub fn weakness_phrase(dimension: QualityDimension) -> String {
    format!("recurring weakness in {}", dimension)
}

/// Progress sentence derived from history statistics
pub fn progress_phrase(stats: &ParticipantStats) -> String {
    let direction = match stats.trend {
        Trend::Improving => "has been improving",
        Trend::Stable => "has been steady",
        Trend::Declining => "has been declining",
    };
    format!(
        "Recent performance {} (average {:.2} over {} turns, consistency {:.2})",
        direction, stats.average, stats.record_count, stats.consistency
    )
}

/// Adaptive prompt handed back to the caller for the next generation turn
pub fn adaptive_prompt(
    participant_id: &str,
    topic: &str,
    phase: DiscussionPhase,
    guidance: &str,
    stats: Option<&ParticipantStats>,
) -> String {
    let mut prompt = format!(
        "Continue the {} phase of the discussion on \"{}\" as {}. {}.",
        phase, topic, participant_id, guidance
    );
    if let Some(stats) = stats {
        if let Some(strength) = stats.strengths.first() {
            prompt.push_str(&format!(
                " Keep leaning on your {} — it has carried your best turns.",
                strength
            ));
        }
        if stats.trend == Trend::Declining {
            prompt.push_str(" Take a beat to re-anchor on the topic before replying.");
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(ScoreBand::of(0.95), ScoreBand::Excellent);
        assert_eq!(ScoreBand::of(0.9), ScoreBand::Excellent);
        assert_eq!(ScoreBand::of(0.85), ScoreBand::Good);
        assert_eq!(ScoreBand::of(0.7), ScoreBand::Satisfactory);
        assert_eq!(ScoreBand::of(0.5), ScoreBand::NeedsImprovement);
        assert_eq!(ScoreBand::of(0.2), ScoreBand::Poor);
    }

    #[test]
    fn test_band_phrase_names_participant() {
        let phrase = band_phrase(ScoreBand::Good, "alice");
        assert!(phrase.contains("alice"));
    }

    #[test]
    fn test_adaptive_prompt_mentions_topic_and_phase() {
        let prompt = adaptive_prompt(
            "alice",
            "carbon pricing",
            DiscussionPhase::Synthesis,
            dimension_guidance(QualityDimension::Engagement),
            None,
        );
        assert!(prompt.contains("carbon pricing"));
        assert!(prompt.contains("synthesis"));
        assert!(prompt.contains("alice"));
    }
}
