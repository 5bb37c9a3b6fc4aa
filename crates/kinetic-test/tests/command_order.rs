//! Ordering of builds, barriers and ray dispatch within a frame.

use kinetic_core::{SceneConfig, UpdateMode};
use kinetic_rt::StructureLevel;
use kinetic_test::{Command, SceneHarness};

fn two_groups() -> SceneConfig {
    SceneConfig::default()
        .with_tessellation_factor(0)
        .with_group_count(2)
        .with_geometries_per_group(2)
}

#[test]
fn first_frame_transcript() {
    let mut harness = SceneHarness::new(two_groups()).unwrap();
    harness.run_frame().unwrap();

    insta::assert_snapshot!(harness.last_frame().unwrap().transcript(), @r"
    barrier pre-build
    build bottom x1 triangles=2 Build
    barrier build
    build bottom x2 triangles=16 Build
    barrier build
    build bottom x2 triangles=16 Build
    barrier build
    build top instances=3 Build
    barrier build
    barrier trace
    trace 64x32
    ");
}

#[test]
fn refit_frame_transcript() {
    let config = two_groups().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap().with_resolution(8, 4);
    harness.run_frames(2).unwrap();

    insta::assert_snapshot!(harness.last_frame().unwrap().transcript(), @r"
    barrier pre-build
    build bottom x1 triangles=2 Update
    barrier build
    build bottom x2 triangles=16 Update
    barrier build
    build bottom x2 triangles=16 Update
    barrier build
    build top instances=3 Update
    barrier build
    barrier trace
    trace 8x4
    ");
}

#[test]
fn every_build_is_followed_by_a_barrier() {
    let config = two_groups().with_update_mode(UpdateMode::UpdateBuildEveryXFrames);
    let mut harness = SceneHarness::new(config.with_build_frequency(2)).unwrap();
    harness.run_frames(4).unwrap();

    for frame in harness.device.frames() {
        for pair in frame.commands.windows(2) {
            if pair[0].is_build() {
                assert_eq!(pair[1], Command::BuildBarrier);
            }
        }
    }
    harness.device.assert_no_violations();
}

#[test]
fn earlier_traces_are_ordered_before_every_build() {
    let config = two_groups().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap();
    harness.run_frames(4).unwrap();

    for frame in harness.device.frames() {
        let first_build = frame.commands.iter().position(Command::is_build).unwrap();
        assert!(frame.commands[..first_build].contains(&Command::PreBuildBarrier));
    }
    harness.device.assert_no_violations();
}

#[test]
fn top_level_follows_every_bottom_level() {
    let mut harness = SceneHarness::new(two_groups()).unwrap();
    harness.run_frames(2).unwrap();

    for frame in harness.device.frames() {
        let levels: Vec<_> = frame
            .builds()
            .map(|c| match c {
                Command::Build { level, .. } => *level,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(levels.last(), Some(&StructureLevel::Top));
        assert!(levels[..levels.len() - 1]
            .iter()
            .all(|l| *l == StructureLevel::Bottom));
    }
}

#[test]
fn builds_share_one_scratch_address() {
    let mut harness = SceneHarness::new(two_groups()).unwrap();
    harness.run_frame().unwrap();

    let addresses: Vec<_> = harness
        .last_frame()
        .unwrap()
        .builds()
        .map(|c| match c {
            Command::Build {
                scratch_address, ..
            } => *scratch_address,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(addresses.len(), 4);
    assert!(addresses.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn trace_uses_the_dispatch_table() {
    let mut harness = SceneHarness::new(two_groups()).unwrap();
    harness.run_frame().unwrap();

    let expected = harness.table().dispatch(64, 32);
    let last = harness.last_frame().unwrap().commands.last().cloned();
    assert_eq!(last, Some(Command::TraceRays(expected)));
}
