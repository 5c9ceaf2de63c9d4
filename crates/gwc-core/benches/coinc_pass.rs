//! Criterion benchmarks for the streaming coincidence hotpath.
//!
//! Benchmarks one engine pass over batches of varying trigger density,
//! and candidate scoring through a finished ranking statistic.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gwc_common::{GpsTime, NetworkConfig, Segment, TimeSlideId, Trigger, TriggerId};
use gwc_core::stats::{CoincScorer, DensityParams, RankingStat};
use gwc_core::{CoincEngine, CoincEngineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

fn synthetic_batch(n: usize, lo: f64, hi: f64, seed: u64) -> Vec<Trigger> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triggers: Vec<Trigger> = (0..n)
        .map(|k| {
            let snr = 4.0 + 8.0 * rng.random::<f64>();
            Trigger {
                id: TriggerId(k as u64),
                ifo: if k % 2 == 0 { "H1" } else { "L1" }.into(),
                end: GpsTime::from_secs_f64(lo + (hi - lo) * rng.random::<f64>()),
                snr,
                chisq: snr * snr * 0.02,
                chisq_dof: 10,
                template_id: 1,
                aux: None,
            }
        })
        .collect();
    triggers.sort_by(|a, b| a.end.cmp(&b.end));
    triggers
}

fn bench_engine_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("coinc/pass");
    for &n in &[100usize, 1000, 5000] {
        let batch = synthetic_batch(n, 0.0, 1000.0, 42);
        group.bench_with_input(BenchmarkId::new("triggers", n), &batch, |b, batch| {
            b.iter(|| {
                let mut engine =
                    CoincEngine::new(CoincEngineConfig::new(NetworkConfig::hl(0.005)));
                let pass = engine.push(black_box(batch.clone()), 2000.0, None, None);
                black_box(pass.coincs.len() + pass.noncoincident.len())
            })
        });
    }
    group.finish();
}

fn bench_scoring(c: &mut Criterion) {
    let params =
        DensityParams::new(BTreeSet::from([1]), NetworkConfig::hl(0.005)).unwrap();
    let mut stat = RankingStat::new(params);
    stat.seed_models(1e6).unwrap();
    for ifo in ["H1", "L1"] {
        stat.add_ratebin(ifo, Segment::new(0.0, 100_000.0), 500_000.0)
            .unwrap();
        stat.set_horizon(ifo, 0.0, 120.0).unwrap();
    }
    stat.finish().unwrap();

    let candidate = gwc_common::Coincidence::new(
        vec![
            Trigger {
                id: TriggerId(1),
                ifo: "H1".into(),
                end: GpsTime::from_secs_f64(50_000.0),
                snr: 9.0,
                chisq: 1.62,
                chisq_dof: 10,
                template_id: 1,
                aux: None,
            },
            Trigger {
                id: TriggerId(2),
                ifo: "L1".into(),
                end: GpsTime::from_secs_f64(50_000.004),
                snr: 8.0,
                chisq: 1.28,
                chisq_dof: 10,
                template_id: 1,
                aux: None,
            },
        ],
        TimeSlideId::ZERO_LAG,
    );

    c.bench_function("coinc/ln_lr", |b| {
        b.iter(|| black_box(stat.ln_lr(black_box(&candidate))))
    });
}

criterion_group!(benches, bench_engine_pass, bench_scoring);
criterion_main!(benches);
