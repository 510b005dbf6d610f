use criterion::{black_box, criterion_group, criterion_main, Criterion};

use akf_rs::{batch, optimizer, ArimaOrder, EstimationConfig};

fn ar_series(phi: f64, n: usize, shift: f64) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for t in 1..n {
        y[t] = phi * y[t - 1] + ((t as f64 + shift) * 1.7).sin();
    }
    y
}

fn bench_fit(c: &mut Criterion) {
    let y = ar_series(0.6, 300, 0.0);
    let config = EstimationConfig {
        order: ArimaOrder::arima(1, 0, 1),
        ..Default::default()
    };
    c.bench_function("fit_arma_11", |b| {
        b.iter(|| optimizer::fit(black_box(&y), &config, None))
    });

    let many: Vec<Vec<f64>> = (0..16).map(|k| ar_series(0.6, 300, k as f64)).collect();
    c.bench_function("batch_fit_16", |b| {
        b.iter(|| batch::batch_fit(black_box(&many), &config))
    });
}

criterion_group!(benches, bench_fit);
criterion_main!(benches);
