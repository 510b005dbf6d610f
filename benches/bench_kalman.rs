use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use akf_rs::params::ArimaParams;
use akf_rs::state_space::ArimaModel;
use akf_rs::{toolkit, ArimaOrder, DenseModel};

fn series(n: usize) -> Vec<f64> {
    let mut level = 0.0;
    (0..n)
        .map(|t| {
            level += (t as f64 * 0.7).sin() * 0.3;
            level + (t as f64 * 1.3).cos()
        })
        .collect()
}

fn bench_likelihood(c: &mut Criterion) {
    let y = series(500);
    let mut group = c.benchmark_group("diffuse_likelihood");
    let trend = DenseModel::local_linear_trend(0.2, 0.02, 1.0);
    let order = ArimaOrder::arima(1, 1, 1);
    let params = ArimaParams {
        ar: vec![0.5],
        ma: vec![0.3],
        ..Default::default()
    };
    let arima = ArimaModel::new(&order, &params).expect("valid model");

    for collapsing in [true, false] {
        let label = if collapsing { "collapsing" } else { "qr" };
        group.bench_with_input(BenchmarkId::new("local_linear_trend", label), &collapsing, |b, &c| {
            let ll = toolkit::likelihood_computer(c, true, false);
            b.iter(|| ll(black_box(&trend), black_box(&y[..])))
        });
        group.bench_with_input(BenchmarkId::new("arima_111", label), &collapsing, |b, &c| {
            let ll = toolkit::likelihood_computer(c, true, false);
            b.iter(|| ll(black_box(&arima), black_box(&y[..])))
        });
    }
    group.finish();
}

fn bench_smoothing(c: &mut Criterion) {
    let y = series(500);
    let trend = DenseModel::local_linear_trend(0.2, 0.02, 1.0);
    c.bench_function("smooth_local_linear_trend", |b| {
        b.iter(|| toolkit::smooth(black_box(&trend), black_box(&y[..]), true, false, true))
    });
}

criterion_group!(benches, bench_likelihood, bench_smoothing);
criterion_main!(benches);
