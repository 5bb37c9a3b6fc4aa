//! CPU cost of recording one frame of builds against the recording device.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kinetic_core::{SceneConfig, UpdateMode};
use kinetic_test::SceneHarness;

fn record_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_frame");

    for (name, mode) in [("build", UpdateMode::Build), ("refit", UpdateMode::Update)] {
        for groups in [1u32, 16, 64] {
            let config = SceneConfig::default()
                .with_update_mode(mode)
                .with_tessellation_factor(8)
                .with_group_count(groups)
                .with_geometries_per_group(8);
            let mut harness = SceneHarness::new(config).unwrap();
            harness.run_frame().unwrap();

            group.bench_with_input(BenchmarkId::new(name, groups), &groups, |b, _| {
                b.iter(|| {
                    let report = harness.run_frame().unwrap();
                    harness.device.clear_frames();
                    black_box(report)
                });
            });
        }
    }
    group.finish();
}

fn reinitialize(c: &mut Criterion) {
    let config = SceneConfig::default()
        .with_tessellation_factor(16)
        .with_group_count(16)
        .with_geometries_per_group(27);
    let mut harness = SceneHarness::new(config).unwrap();
    harness.run_frame().unwrap();

    c.bench_function("reinitialize_structures", |b| {
        b.iter(|| {
            harness.manager.request_as_initialization();
            let report = harness.run_frame().unwrap();
            harness.device.clear_frames();
            black_box(report)
        });
    });
}

criterion_group!(benches, record_frames, reinitialize);
criterion_main!(benches);
