//! Build-versus-refit scheduling across frames.

use kinetic_core::{SceneConfig, UpdateMode};
use kinetic_rt::{AccelerationDevice, BuildFlags, BuildMode, StructureLevel};
use kinetic_test::SceneHarness;

fn small_scene() -> SceneConfig {
    SceneConfig::default()
        .with_tessellation_factor(0)
        .with_group_count(2)
}

#[test]
fn periodic_mode_rebuilds_every_k_frames() {
    let config = small_scene()
        .with_update_mode(UpdateMode::UpdateBuildEveryXFrames)
        .with_build_frequency(5);
    let mut harness = SceneHarness::new(config).unwrap();

    let first = harness.run_frame().unwrap();
    assert!(first.reinitialized);
    assert_eq!(first.builds.mode, Some(BuildMode::Build));
    assert_eq!(first.builds.frames_since_build, 0);

    let reports = harness.run_frames(6).unwrap();
    let modes: Vec<_> = reports.iter().map(|r| r.builds.mode).collect();
    assert_eq!(
        modes,
        vec![
            Some(BuildMode::Update),
            Some(BuildMode::Update),
            Some(BuildMode::Update),
            Some(BuildMode::Update),
            Some(BuildMode::Build),
            Some(BuildMode::Update),
        ]
    );
    let counters: Vec<_> = reports.iter().map(|r| r.builds.frames_since_build).collect();
    assert_eq!(counters, vec![1, 2, 3, 4, 0, 1]);

    for frame in harness.device.frames() {
        assert!(frame.uniform_mode().is_some(), "mixed modes in one frame");
    }
}

#[test]
fn build_mode_keeps_counter_at_zero() {
    let config = SceneConfig::default().with_tessellation_factor(0);
    let mut harness = SceneHarness::new(config).unwrap();

    for report in harness.run_frames(4).unwrap() {
        assert_eq!(report.builds.mode, Some(BuildMode::Build));
        assert_eq!(report.builds.frames_since_build, 0);
        assert_eq!(report.builds.bottom_levels_recorded, 2);
        assert!(report.builds.top_level_recorded);
    }

    let frame = harness.last_frame().unwrap();
    assert_eq!(frame.build_count(StructureLevel::Bottom), 2);
    assert_eq!(frame.build_count(StructureLevel::Top), 1);
}

#[test]
fn update_mode_refits_after_first_build() {
    let config = small_scene().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap();

    let reports = harness.run_frames(4).unwrap();
    assert_eq!(reports[0].builds.mode, Some(BuildMode::Build));
    for (i, report) in reports.iter().enumerate().skip(1) {
        assert_eq!(report.builds.mode, Some(BuildMode::Update));
        assert_eq!(report.builds.frames_since_build, i as u32);
    }
}

#[test]
fn refit_requires_allow_update() {
    let config = small_scene()
        .with_update_mode(UpdateMode::Update)
        .with_allow_update(false);
    let mut harness = SceneHarness::new(config).unwrap();

    for report in harness.run_frames(3).unwrap() {
        assert_eq!(report.builds.mode, Some(BuildMode::Build));
    }
    assert!(!harness.manager.active_flags().contains(BuildFlags::ALLOW_UPDATE));
}

#[test]
fn toggling_allow_update_reinitializes_and_builds() {
    let config = small_scene().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap();
    harness.run_frames(2).unwrap();
    assert!(!harness.manager.is_as_init_requested());

    harness.manager.set_allow_update(false);
    assert!(harness.manager.is_as_init_requested());
    assert!(!harness.manager.is_geometry_init_requested());

    let report = harness.run_frame().unwrap();
    assert!(report.reinitialized);
    assert_eq!(report.builds.mode, Some(BuildMode::Build));
    assert_eq!(harness.manager.active_flags(), BuildFlags::PREFER_FAST_TRACE);

    // Same value again is not a change
    harness.manager.set_allow_update(false);
    assert!(!harness.manager.is_as_init_requested());

    harness.manager.set_allow_update(true);
    let reports = harness.run_frames(2).unwrap();
    assert_eq!(reports[0].builds.mode, Some(BuildMode::Build));
    assert_eq!(reports[1].builds.mode, Some(BuildMode::Update));
}

#[test]
fn switching_update_mode_needs_no_reinitialization() {
    let mut harness = SceneHarness::new(small_scene()).unwrap();
    harness.run_frame().unwrap();

    harness.manager.set_update_mode(UpdateMode::Update);
    assert!(!harness.manager.is_as_init_requested());

    let report = harness.run_frame().unwrap();
    assert!(!report.reinitialized);
    assert_eq!(report.builds.mode, Some(BuildMode::Update));
}

#[test]
fn disabled_builds_skip_everything() {
    let mut harness = SceneHarness::new(small_scene()).unwrap();
    harness.manager.set_builds_enabled(false);

    let report = harness.run_frame().unwrap();
    assert!(!report.reinitialized);
    assert_eq!(report.builds.mode, None);
    assert_eq!(report.builds.structures_recorded(), 0);
    assert!(!report.traced);
    assert!(harness.last_frame().unwrap().commands.is_empty());
    assert_eq!(harness.device.wait_idle_calls(), 0);
    assert_eq!(harness.device.live_structures(), 0);

    harness.manager.set_builds_enabled(true);
    let report = harness.run_frame().unwrap();
    assert!(report.reinitialized);
    assert_eq!(report.builds.mode, Some(BuildMode::Build));
}

#[test]
fn disabling_builds_keeps_tracing_existing_structures() {
    let mut harness = SceneHarness::new(small_scene()).unwrap();
    harness.run_frame().unwrap();
    harness.manager.set_builds_enabled(false);

    let report = harness.run_frame().unwrap();
    assert_eq!(report.builds.mode, None);
    assert!(report.traced);
    assert_eq!(harness.last_frame().unwrap().builds().count(), 0);
}

#[test]
fn frame_slots_cycle() {
    let mut harness = SceneHarness::new(small_scene()).unwrap();
    let indices: Vec<_> = harness
        .run_frames(5)
        .unwrap()
        .iter()
        .map(|r| r.frame_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2, 0, 1]);
    assert_eq!(harness.scheduler.frames_submitted(), 5);
}

#[test]
fn refit_of_unbuilt_structures_counts_as_a_full_build() {
    let config = small_scene().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap();
    harness
        .manager
        .prepare_frame(&mut harness.device, &mut harness.meshes)
        .unwrap();

    let cmd = harness.device.begin_frame(0).unwrap();
    let report = harness
        .manager
        .update_acceleration_structures(&mut harness.device, cmd, 0, false)
        .unwrap();
    harness.device.submit_frame(0, cmd).unwrap();
    harness.device.assert_no_violations();

    assert_eq!(
        harness.last_frame().unwrap().uniform_mode(),
        Some(BuildMode::Build)
    );
    assert_eq!(report.mode, Some(BuildMode::Build));
    assert_eq!(report.frames_since_build, 0);
}

#[test]
fn failed_frame_keeps_the_pending_rebuild() {
    let config = small_scene().with_update_mode(UpdateMode::Update);
    let mut harness = SceneHarness::new(config).unwrap();
    harness.run_frame().unwrap();

    harness.manager.request_as_initialization();
    harness
        .manager
        .prepare_frame(&mut harness.device, &mut harness.meshes)
        .unwrap();
    assert!(harness.manager.is_rebuild_requested());

    let cmd = harness.device.begin_frame(1).unwrap();
    harness.device.set_device_lost(true);
    assert!(harness.manager.update(&mut harness.device, cmd, 1).is_err());
    assert!(harness.manager.is_rebuild_requested());

    harness.device.set_device_lost(false);
    let report = harness.run_frame().unwrap();
    assert!(!report.reinitialized);
    assert_eq!(report.builds.mode, Some(BuildMode::Build));
    assert!(!harness.manager.is_rebuild_requested());
}
