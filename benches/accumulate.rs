//! Benchmarks for per-batch confusion accumulation

use basewise_eval::ConfusionAccumulator;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array3};

/// Softmax-like predictions and one-hot labels for `(batch, len, 4)`
fn create_batch(batch: usize, len: usize) -> (Array3<f32>, Array3<f32>, Array1<f32>) {
    let y_true = Array3::from_shape_fn((batch, len, 4), |(b, i, c)| {
        if (b + i) % 4 == c {
            1.0
        } else {
            0.0
        }
    });
    let y_pred = Array3::from_shape_fn((batch, len, 4), |(b, i, c)| {
        if (b * 7 + i) % 4 == c {
            0.7
        } else {
            0.1
        }
    });
    // every tenth position is padding
    let weights = Array1::from_shape_fn(batch * len, |i| if i % 10 == 9 { 0.0 } else { 1.0 });
    (y_true, y_pred, weights)
}

fn benchmark_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("count_and_calculate_one_batch");

    for &(batch, len) in &[(8, 1_000), (32, 5_000), (128, 20_000)] {
        let (y_true, y_pred, weights) = create_batch(batch, len);
        let y_true = y_true.into_dyn();
        let y_pred = y_pred.into_dyn();
        let weights = weights.into_dyn();

        group.bench_function(format!("batch_{batch}x{len}"), |b| {
            b.iter(|| {
                let mut acc = ConfusionAccumulator::genic();
                acc.count_and_calculate_one_batch(
                    black_box(y_true.view()),
                    black_box(y_pred.view()),
                    black_box(weights.view()),
                )
            });
        });
    }

    group.finish();
}

fn benchmark_scores(c: &mut Criterion) {
    let (y_true, y_pred, weights) = create_batch(32, 5_000);
    let mut acc = ConfusionAccumulator::genic();
    let counted = acc
        .count_and_calculate_one_batch(
            y_true.into_dyn().view(),
            y_pred.into_dyn().view(),
            weights.into_dyn().view(),
        )
        .expect("benchmark batch is well-formed");
    assert!(counted > 0, "benchmark batch is fully masked");

    c.bench_function("scores_with_composites", |b| {
        b.iter(|| black_box(&acc).scores());
    });
}

criterion_group!(benches, benchmark_accumulate, benchmark_scores);
criterion_main!(benches);
