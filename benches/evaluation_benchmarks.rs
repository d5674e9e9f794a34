//! Benchmarks for the evaluation pipeline hot paths

use colloquy_core::{
    DiscussionPhase, EvaluationContext, FeedbackConfig, FeedbackCoordinator, ParticipantProfile,
};
use colloquy_core::optimization::GraphWeightOptimizer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn bench_optimize(c: &mut Criterion) {
    let participants: Vec<ParticipantProfile> = (0..16)
        .map(|i| ParticipantProfile::default_for(&format!("participant-{}", i)))
        .collect();
    let quality: HashMap<String, f64> = participants
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), 0.4 + (i as f64) * 0.03))
        .collect();

    c.bench_function("optimize_16_participants", |b| {
        let mut optimizer = GraphWeightOptimizer::new(&FeedbackConfig::default());
        b.iter(|| {
            black_box(optimizer.optimize(
                black_box(&quality),
                black_box(&participants),
                DiscussionPhase::Interaction,
            ))
        })
    });
}

fn bench_evaluate_statement(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = rt.block_on(async {
        let coordinator = FeedbackCoordinator::new(FeedbackConfig::default()).unwrap();
        coordinator.initialize().await.unwrap();
        coordinator
    });

    c.bench_function("evaluate_statement", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = EvaluationContext::new(
                    "I think the evidence favors a staged rollout, because early \
                     pilot data shows adoption holding steady under load.",
                    "rollout strategy",
                    "participant-1",
                    DiscussionPhase::Interaction,
                );
                black_box(coordinator.evaluate_statement(ctx).await)
            })
        })
    });
}

criterion_group!(benches, bench_optimize, bench_evaluate_statement);
criterion_main!(benches);
