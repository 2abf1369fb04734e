use bloom_engine::{AchievementEngine, Catalog, ConditionEvaluator, InMemoryLedger};
use bloom_core::{
    AggregateSnapshot, CatalogVersion, GroupSnapshot, HighScoreThresholds, IndividualSnapshot,
    SubjectKind, SubjectSnapshot,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn bench_evaluate(c: &mut Criterion) {
    let catalog = Catalog::builtin(CatalogVersion::Extended).expect("load catalog");
    let evaluator = ConditionEvaluator::new(catalog);

    let flower: SubjectSnapshot = IndividualSnapshot::new("1", "小明", 25).into();
    let garden: SubjectSnapshot = GroupSnapshot::new("g", "向日葵组", 60).into();

    c.bench_function("evaluate/individual", |b| {
        b.iter(|| black_box(evaluator.evaluate(black_box(&flower)).len()));
    });

    c.bench_function("evaluate/group", |b| {
        b.iter(|| black_box(evaluator.evaluate(black_box(&garden)).len()));
    });
}

fn bench_roster_stats(c: &mut Criterion) {
    let individuals: Vec<_> = (0..40)
        .map(|i| IndividualSnapshot::new(i.to_string(), "s", i * 3))
        .collect();
    let groups: Vec<_> = (0..8)
        .map(|i| GroupSnapshot::new(i.to_string(), "g", i * 20))
        .collect();

    c.bench_function("aggregate/from_roster", |b| {
        b.iter(|| {
            let stats = AggregateSnapshot::from_roster(
                "class-1",
                black_box(&individuals),
                black_box(&groups),
                HighScoreThresholds::default(),
            );
            black_box(stats.high_score_count);
        });
    });
}

fn bench_repeat_check(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("build runtime");
    let engine = AchievementEngine::new(
        Catalog::builtin(CatalogVersion::Extended).expect("load catalog"),
        Arc::new(InMemoryLedger::default()),
    );
    let flower: SubjectSnapshot = IndividualSnapshot::new("1", "小明", 25).into();

    // Warm the ledger so every iteration takes the all-recorded path.
    runtime
        .block_on(engine.check_and_notify(SubjectKind::Individual, "1", &flower))
        .expect("first check");

    c.bench_function("engine/check_already_unlocked", |b| {
        b.iter(|| {
            let unlocked = runtime
                .block_on(engine.check_and_notify(SubjectKind::Individual, "1", black_box(&flower)))
                .expect("check");
            black_box(unlocked.len());
        });
    });
}

criterion_group!(benches, bench_evaluate, bench_roster_stats, bench_repeat_check);
criterion_main!(benches);
