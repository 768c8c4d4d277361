use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

use cadence_core::position_sizer::{kelly_size, volatility_target_size, SizerConfig};
use cadence_core::risk_engine::{PositionSnapshot, RiskEngine, RiskEngineConfig, RiskThresholds};

fn synthetic_returns(len: usize, scale: f64, phase_shift: usize) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let phase = ((i + phase_shift) % 7) as f64 - 3.0;
            scale * phase / 3.0
        })
        .collect()
}

fn portfolio(positions: usize, history: usize) -> Vec<PositionSnapshot> {
    (0..positions)
        .map(|i| PositionSnapshot {
            token: format!("TOKEN-{i}"),
            market_value: 1_000.0 + i as f64 * 250.0,
            returns: synthetic_returns(history, 0.01 + i as f64 * 0.002, i),
        })
        .collect()
}

fn bench_risk_engine(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("RiskEngine");

    let engine = RiskEngine::new(RiskEngineConfig::default(), RiskThresholds::default());
    rt.block_on(async {
        engine.record_equity(10_000.0).await;
        engine.record_equity(9_950.0).await;
    });

    for (label, positions, history) in [
        ("small_portfolio", 3usize, 60usize),
        ("wide_portfolio", 12, 60),
        ("deep_history", 5, 500),
    ] {
        let snapshot = portfolio(positions, history);
        group.bench_function(BenchmarkId::new("assess", label), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let _ = black_box(engine.assess(&snapshot).await);
                });
            });
        });
    }

    group.finish();
}

fn bench_position_sizing(c: &mut Criterion) {
    let mut group = c.benchmark_group("PositionSizing");
    let config = SizerConfig::default();

    group.bench_function("volatility_target", |b| {
        b.iter(|| {
            let _ = black_box(volatility_target_size(10_000.0, black_box(0.45), &config));
        });
    });

    group.bench_function("kelly_fractional", |b| {
        b.iter(|| {
            let _ = black_box(kelly_size(
                10_000.0,
                black_box(0.58),
                black_box(0.05),
                black_box(0.03),
                &config,
            ));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_risk_engine, bench_position_sizing);
criterion_main!(benches);
