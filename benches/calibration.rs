//! Criterion benchmarks for the calibration engine.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array1, Array2};

use spikesnr::prelude::*;

fn random_vector(len: usize, seed: u64) -> Array1<f64> {
    let mut rng = Prng::new(seed);
    Array1::from_shape_fn(len, |_| rng.next_gaussian())
}

fn loading(d: usize, n: usize, seed: u64) -> Array2<f64> {
    let mut rng = Prng::new(seed);
    synthesize_with_report(d, n, 1.0, 0.0, &CoherenceSchedule::default().with_budget(1, 1), &mut rng)
        .map(|s| s.loading)
        .unwrap()
}

/// Projection cost grows with the sort.
fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");

    for len in [64, 1024, 16384].iter() {
        group.throughput(Throughput::Elements(*len as u64));
        let v = random_vector(*len, 42);

        group.bench_with_input(BenchmarkId::new("simplex", len), &v, |b, v| {
            b.iter(|| black_box(project_simplex(v, 1.0).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("l1ball", len), &v, |b, v| {
            b.iter(|| black_box(project_l1ball(v, 1.0).unwrap()))
        });
    }

    group.finish();
}

fn bench_coherence(c: &mut Criterion) {
    let mut group = c.benchmark_group("coherence");

    for n in [50, 200, 800].iter() {
        let ct = loading(8, *n, 7).t().to_owned();
        group.bench_with_input(BenchmarkId::from_parameter(n), &ct, |b, ct| {
            b.iter(|| black_box(compute_coherence(ct)))
        });
    }

    group.finish();
}

fn bench_adjust_gain(c: &mut Criterion) {
    let mut rng = Prng::new(3);
    let x = ar1_trajectory(2000, 4, 0.95, &mut rng).unwrap();
    let ct = loading(4, 200, 3).t().to_owned();
    let bias = Array1::from_elem(200, (0.01f64).ln());

    c.bench_function("adjust_gain_2000x200", |b| {
        b.iter(|| {
            black_box(
                adjust_gain(&MeanRateMatcher, &x, &ct, &bias, 3.0, 0.01, 0.2)
                    .unwrap()
                    .capped_count(),
            )
        })
    });
}

fn bench_calibrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("calibrate");
    group.sample_size(10);

    let mut rng = Prng::new(11);
    let x = ar1_trajectory(1000, 2, 0.95, &mut rng).unwrap();
    let c_mat = loading(2, 50, 11);
    let target = CalibrationTarget::new(0.01, 1.0, 10.0);

    for priority in [Priority::Mean, Priority::Max] {
        let config = CalibrationConfig::default().with_priority(priority);
        group.bench_function(priority.to_string(), |b| {
            b.iter(|| {
                let cal = calibrate(&x, &c_mat, &Array1::zeros(50), &target, FisherSnrBound, config)
                    .unwrap();
                black_box(cal.snr)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_projection,
    bench_coherence,
    bench_adjust_gain,
    bench_calibrate
);
criterion_main!(benches);
