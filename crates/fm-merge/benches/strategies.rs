//! # Strategy Benchmarks
//!
//! Measures merge throughput of the built-in strategies over growing branch
//! counts.
//!
//! Run: `cargo bench -p fm-merge --bench strategies`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fm_merge::{merge, Concat, Fieldwise, StrategyExt, WeightedAverage, WeightedVote};
use fm_value::{TaggedValue, TraceId};
use serde_json::{json, Value};

const BRANCH_COUNTS: [usize; 3] = [4, 16, 64];

#[allow(clippy::cast_precision_loss)]
fn confidence(i: usize) -> f64 {
    0.1 + (i % 9) as f64 / 10.0
}

fn labels(n: usize) -> Vec<TaggedValue<String>> {
    (0..n)
        .map(|i| {
            TaggedValue::new(format!("label-{}", i % 3), confidence(i), "bench", TraceId::new())
                .unwrap()
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn numbers(n: usize) -> Vec<TaggedValue<f64>> {
    (0..n)
        .map(|i| TaggedValue::new(10.0 + (i % 7) as f64, confidence(i), "bench", TraceId::new()).unwrap())
        .collect()
}

fn objects(n: usize) -> Vec<TaggedValue<Value>> {
    (0..n)
        .map(|i| {
            TaggedValue::new(
                json!({"priority": ["low", "high"][i % 2], "estimate": i % 5, "tags": [i % 4]}),
                confidence(i),
                "bench",
                TraceId::new(),
            )
            .unwrap()
        })
        .collect()
}

fn bench_vote(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_vote");
    for n in BRANCH_COUNTS {
        let results = labels(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &results, |b, results| {
            b.iter(|| black_box(merge(results, &WeightedVote::new())));
        });
    }
    group.finish();
}

fn bench_average(c: &mut Criterion) {
    let mut group = c.benchmark_group("weighted_average");
    let strategy = WeightedAverage::new().with_outlier_threshold(2.0);
    for n in BRANCH_COUNTS {
        let results = numbers(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &results, |b, results| {
            b.iter(|| black_box(merge(results, &strategy)));
        });
    }
    group.finish();
}

fn bench_fieldwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("fieldwise");
    let strategy = Fieldwise::new()
        .field("priority", WeightedVote::new())
        .field("estimate", WeightedAverage::new().into_json::<f64>())
        .field("tags", Concat::new().deduplicated());
    for n in BRANCH_COUNTS {
        let results = objects(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &results, |b, results| {
            b.iter(|| black_box(merge(results, &strategy)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_vote, bench_average, bench_fieldwise);
criterion_main!(benches);
