//! Per-participant evaluation history with bounded retention
//!
//! Append-only log of evaluations per participant, truncated to the most
//! recent half once the hard cap is exceeded. Derives the trend,
//! consistency, and strength/weakness statistics consumed by the
//! optimizer and the feedback aggregator.

use crate::types::{HistorySnapshot, QualityDimension, QualityScores};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Hard cap per participant; exceeding it truncates to the newest half
pub const RETENTION_CAP: usize = 100;

/// Overall scores used for the trend regression
const TREND_POINTS: usize = 5;
/// Below this many points the trend is reported as stable
const MIN_TREND_POINTS: usize = 3;
/// Slope deadband separating stable from improving/declining
const TREND_SLOPE_EPSILON: f64 = 0.02;

const STRONG_SCORE: f64 = 0.8;
const WEAK_SCORE: f64 = 0.7;
/// A pattern must appear in at least this share of records to be reported
const MIN_PATTERN_FREQUENCY: f64 = 0.3;
const MAX_PATTERNS: usize = 3;

/// One recorded evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub utterance: String,
    pub scores: QualityScores,
    pub feedback_summary: String,
    pub timestamp: DateTime<Utc>,
    pub turn_number: u32,
}

/// Direction of a participant's recent overall scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Declining => write!(f, "declining"),
        }
    }
}

/// Derived statistics for one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStats {
    pub average: f64,
    pub best: f64,
    pub worst: f64,
    pub trend: Trend,
    /// `max(0, 1 - stddev * 2)` over the recent window
    pub consistency: f64,
    pub strengths: Vec<QualityDimension>,
    pub weaknesses: Vec<QualityDimension>,
    pub record_count: usize,
}

/// Append-only store of evaluation history, keyed by participant id
pub struct HistoryStore {
    records: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    /// Recent-window size for consistency; updatable without re-init
    window_size: AtomicUsize,
}

impl HistoryStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            window_size: AtomicUsize::new(window_size.max(1)),
        }
    }

    /// Propagate an adaptive-learning window change from a config update
    pub fn set_window_size(&self, window_size: usize) {
        self.window_size.store(window_size.max(1), Ordering::Relaxed);
    }

    /// Append one evaluation; truncates to the newest half past the cap
    pub async fn record(&self, participant_id: &str, record: HistoryRecord) {
        let mut guard = self.records.write().await;
        let log = guard.entry(participant_id.to_string()).or_default();
        log.push(record);
        if log.len() > RETENTION_CAP {
            let keep_from = log.len() - RETENTION_CAP / 2;
            log.drain(0..keep_from);
            debug!(
                "Truncated history for {} to {} records",
                participant_id,
                log.len()
            );
        }
    }

    pub async fn record_count(&self, participant_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(participant_id)
            .map(|log| log.len())
            .unwrap_or(0)
    }

    pub async fn participants(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Compact view of the most recent `n` records, oldest first
    pub async fn snapshot(&self, participant_id: &str, n: usize) -> Vec<HistorySnapshot> {
        let guard = self.records.read().await;
        let Some(log) = guard.get(participant_id) else {
            return Vec::new();
        };
        log.iter()
            .rev()
            .take(n)
            .map(|r| HistorySnapshot {
                turn_number: r.turn_number,
                overall: r.scores.overall,
                timestamp: r.timestamp,
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Mean overall score per participant, for the optimizer's quality map
    pub async fn average_overall(&self) -> HashMap<String, f64> {
        let guard = self.records.read().await;
        guard
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(id, log)| {
                let sum: f64 = log.iter().map(|r| r.scores.overall).sum();
                (id.clone(), sum / log.len() as f64)
            })
            .collect()
    }

    /// Derived statistics, or None for an unseen participant
    pub async fn stats(&self, participant_id: &str) -> Option<ParticipantStats> {
        let guard = self.records.read().await;
        let log = guard.get(participant_id)?;
        if log.is_empty() {
            return None;
        }

        let overalls: Vec<f64> = log.iter().map(|r| r.scores.overall).collect();
        let average = overalls.iter().sum::<f64>() / overalls.len() as f64;
        let best = overalls.iter().cloned().fold(f64::MIN, f64::max);
        let worst = overalls.iter().cloned().fold(f64::MAX, f64::min);

        let trend = Self::trend_of(&overalls);

        let window = self.window_size.load(Ordering::Relaxed);
        let recent: Vec<f64> = overalls.iter().rev().take(window).cloned().collect();
        let consistency = Self::consistency_of(&recent);

        let (strengths, weaknesses) = Self::dimension_patterns(log);

        Some(ParticipantStats {
            average,
            best,
            worst,
            trend,
            consistency,
            strengths,
            weaknesses,
            record_count: log.len(),
        })
    }

    /// Least-squares slope over the last few overall scores
    fn trend_of(overalls: &[f64]) -> Trend {
        let points: Vec<f64> = overalls.iter().rev().take(TREND_POINTS).cloned().collect();
        if points.len() < MIN_TREND_POINTS {
            return Trend::Stable;
        }
        // points are newest-first; regress oldest-first so a positive
        // slope means improvement
        let ys: Vec<f64> = points.into_iter().rev().collect();
        let n = ys.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = ys.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, y) in ys.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        if den == 0.0 {
            return Trend::Stable;
        }
        let slope = num / den;
        if slope > TREND_SLOPE_EPSILON {
            Trend::Improving
        } else if slope < -TREND_SLOPE_EPSILON {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    fn consistency_of(recent: &[f64]) -> f64 {
        if recent.len() < 2 {
            return 1.0;
        }
        let n = recent.len() as f64;
        let mean = recent.iter().sum::<f64>() / n;
        let variance = recent.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (1.0 - variance.sqrt() * 2.0).max(0.0)
    }

    /// Frequency counts of strong/weak dimension crossings, top 3 each
    fn dimension_patterns(log: &[HistoryRecord]) -> (Vec<QualityDimension>, Vec<QualityDimension>) {
        let total = log.len() as f64;
        let mut strong_counts: HashMap<QualityDimension, usize> = HashMap::new();
        let mut weak_counts: HashMap<QualityDimension, usize> = HashMap::new();

        for record in log {
            for (dim, value) in &record.scores.dimensions {
                if *value >= STRONG_SCORE {
                    *strong_counts.entry(*dim).or_default() += 1;
                } else if *value < WEAK_SCORE {
                    *weak_counts.entry(*dim).or_default() += 1;
                }
            }
        }

        let top = |counts: HashMap<QualityDimension, usize>| {
            let mut entries: Vec<(QualityDimension, f64)> = counts
                .into_iter()
                .map(|(dim, count)| (dim, count as f64 / total))
                .filter(|(_, freq)| *freq >= MIN_PATTERN_FREQUENCY)
                .collect();
            entries.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            entries
                .into_iter()
                .take(MAX_PATTERNS)
                .map(|(dim, _)| dim)
                .collect::<Vec<_>>()
        };

        (top(strong_counts), top(weak_counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreBreakdown;
    use std::collections::BTreeMap;

    fn record(turn: u32, overall: f64) -> HistoryRecord {
        record_with_dim(turn, overall, overall)
    }

    fn record_with_dim(turn: u32, overall: f64, content: f64) -> HistoryRecord {
        let mut dims = BTreeMap::new();
        dims.insert(QualityDimension::ContentQuality, content);
        dims.insert(QualityDimension::Performance, overall);
        HistoryRecord {
            utterance: format!("utterance {}", turn),
            scores: QualityScores {
                dimensions: dims,
                overall,
                breakdown: ScoreBreakdown::default(),
            },
            feedback_summary: String::new(),
            timestamp: Utc::now(),
            turn_number: turn,
        }
    }

    #[tokio::test]
    async fn test_retention_cap() {
        let store = HistoryStore::new(10);
        for turn in 0..(RETENTION_CAP as u32 + 17) {
            store.record("alice", record(turn, 0.8)).await;
        }
        let count = store.record_count("alice").await;
        assert!(count <= RETENTION_CAP);
        // Truncation keeps the most recent half
        let snapshot = store.snapshot("alice", 1).await;
        assert_eq!(snapshot[0].turn_number, RETENTION_CAP as u32 + 16);
    }

    #[tokio::test]
    async fn test_trend_improving() {
        let store = HistoryStore::new(10);
        for (turn, overall) in [0.5, 0.6, 0.7, 0.8, 0.9].iter().enumerate() {
            store.record("alice", record(turn as u32, *overall)).await;
        }
        let stats = store.stats("alice").await.unwrap();
        assert_eq!(stats.trend, Trend::Improving);
    }

    #[tokio::test]
    async fn test_trend_declining() {
        let store = HistoryStore::new(10);
        for (turn, overall) in [0.9, 0.8, 0.6, 0.5, 0.4].iter().enumerate() {
            store.record("alice", record(turn as u32, *overall)).await;
        }
        let stats = store.stats("alice").await.unwrap();
        assert_eq!(stats.trend, Trend::Declining);
    }

    #[tokio::test]
    async fn test_trend_stable_with_few_points() {
        let store = HistoryStore::new(10);
        store.record("alice", record(0, 0.2)).await;
        store.record("alice", record(1, 0.9)).await;
        let stats = store.stats("alice").await.unwrap();
        assert_eq!(stats.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_consistency_penalizes_variance() {
        let store = HistoryStore::new(10);
        for (turn, overall) in [0.8, 0.8, 0.8, 0.8].iter().enumerate() {
            store.record("steady", record(turn as u32, *overall)).await;
        }
        for (turn, overall) in [0.2, 0.9, 0.1, 0.95].iter().enumerate() {
            store.record("erratic", record(turn as u32, *overall)).await;
        }
        let steady = store.stats("steady").await.unwrap();
        let erratic = store.stats("erratic").await.unwrap();
        assert!(steady.consistency > 0.99);
        assert!(erratic.consistency < steady.consistency);
    }

    #[tokio::test]
    async fn test_strength_and_weakness_patterns() {
        let store = HistoryStore::new(10);
        // content_quality consistently strong, performance consistently weak
        for turn in 0..6 {
            store
                .record("alice", record_with_dim(turn, 0.5, 0.9))
                .await;
        }
        let stats = store.stats("alice").await.unwrap();
        assert!(stats.strengths.contains(&QualityDimension::ContentQuality));
        assert!(stats.weaknesses.contains(&QualityDimension::Performance));
    }

    #[tokio::test]
    async fn test_stats_none_for_unknown_participant() {
        let store = HistoryStore::new(10);
        assert!(store.stats("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_oldest_first() {
        let store = HistoryStore::new(10);
        for turn in 0..5 {
            store.record("alice", record(turn, 0.5)).await;
        }
        let snapshot = store.snapshot("alice", 3).await;
        let turns: Vec<u32> = snapshot.iter().map(|s| s.turn_number).collect();
        assert_eq!(turns, vec![2, 3, 4]);
    }
}
