//! Kinetic Build Schedule Replay
//!
//! Runs the acceleration structure manager headlessly against the recording
//! device and reports which frames rebuilt and which refit, along with the
//! memory the scene needs.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p kinetic-bench -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::time::Instant;

use anyhow::{bail, Context};
use kinetic_core::{BuildQuality, SceneConfig, UpdateMode};
use kinetic_rt::{BuildMode, SceneAnimation};
use kinetic_test::SceneHarness;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Seconds of simulated time per frame when animating.
const FRAME_TIME: f32 = 1.0 / 60.0;

#[derive(Debug, Clone)]
struct Options {
    frames: u32,
    animate: bool,
    config: SceneConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frames: 120,
            animate: false,
            config: SceneConfig::default(),
        }
    }
}

impl Options {
    fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let mut options = Self::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(String::as_str)
                    .with_context(|| format!("{flag} needs a value"))
            };
            match flag {
                "--frames" => options.frames = parse(flag, value()?)?,
                "--groups" => options.config.group_count = parse(flag, value()?)?,
                "--geometries" => options.config.geometries_per_group = parse(flag, value()?)?,
                "--tessellation" => options.config.tessellation_factor = parse(flag, value()?)?,
                "--frequency" => options.config.build_frequency = parse(flag, value()?)?,
                "--mode" => options.config.update_mode = parse_mode(value()?)?,
                "--quality" => options.config.build_quality = parse_quality(value()?)?,
                "--minimize-memory" => options.config.minimize_memory = true,
                "--no-allow-update" => options.config.allow_update = false,
                "--animate" => options.animate = true,
                other => bail!("unknown option {other}, see --help"),
            }
            i += 1;
        }
        Ok(options)
    }
}

fn parse(flag: &str, value: &str) -> anyhow::Result<u32> {
    value
        .parse()
        .with_context(|| format!("{flag} expects a number, got {value:?}"))
}

fn parse_mode(value: &str) -> anyhow::Result<UpdateMode> {
    Ok(match value {
        "build" => UpdateMode::Build,
        "update" => UpdateMode::Update,
        "periodic" => UpdateMode::UpdateBuildEveryXFrames,
        other => bail!("unknown update mode {other:?}"),
    })
}

fn parse_quality(value: &str) -> anyhow::Result<BuildQuality> {
    Ok(match value {
        "fast-trace" => BuildQuality::FastTrace,
        "fast-build" => BuildQuality::FastBuild,
        "default" => BuildQuality::Default,
        other => bail!("unknown build quality {other:?}"),
    })
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Options::from_args(&args)?;
    info!(?options, "Kinetic build schedule replay");

    let mut harness = SceneHarness::new(options.config.clone())?;
    if options.animate {
        harness.manager.set_animation(SceneAnimation {
            enabled: true,
            ..SceneAnimation::default()
        });
    }

    let mut builds = 0u32;
    let mut refits = 0u32;
    let mut reinitializations = 0u32;
    let start = Instant::now();

    for frame in 0..options.frames {
        if options.animate {
            harness.manager.animate(frame as f32 * FRAME_TIME);
        }
        let report = harness.run_frame()?;
        harness.device.clear_frames();

        if report.reinitialized {
            reinitializations += 1;
        }
        match report.builds.mode {
            Some(BuildMode::Build) => builds += 1,
            Some(BuildMode::Update) => refits += 1,
            None => {}
        }
        tracing::debug!(
            frame = report.frame_number,
            mode = ?report.builds.mode,
            frames_since_build = report.builds.frames_since_build,
            "frame"
        );
    }

    let elapsed = start.elapsed();
    let stats = harness.manager.stats();
    info!(
        frames = options.frames,
        builds,
        refits,
        reinitializations,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "schedule replayed"
    );
    info!(
        bottom_levels = stats.bottom_level_count,
        scene_triangles = stats.scene_triangles,
        memory_footprint = stats.memory_footprint,
        scratch_size = stats.scratch_size,
        "scene"
    );

    let device = harness.shutdown()?;
    if device.live_buffers() != 0 || device.live_structures() != 0 {
        bail!(
            "{} buffers and {} structures leaked",
            device.live_buffers(),
            device.live_structures()
        );
    }
    Ok(())
}

fn print_help() {
    eprintln!(
        "Kinetic Build Schedule Replay

USAGE:
    cargo run -p kinetic-bench -- [OPTIONS]

SCENE OPTIONS:
    --groups <N>            Sphere groups, 1-64 (default: 1)
    --geometries <N>        Spheres per group, 1-1000 (default: 1)
    --tessellation <N>      Sphere tessellation, 0-80 (default: 14)

BUILD OPTIONS:
    --mode <MODE>           build | update | periodic (default: build)
    --frequency <N>         Frames between full builds in periodic mode (default: 1)
    --quality <QUALITY>     fast-trace | fast-build | default (default: fast-trace)
    --minimize-memory       Request compact structures
    --no-allow-update       Build structures that cannot be refit

OTHER:
    --frames <N>            Frames to replay (default: 120)
    --animate               Bob the sphere groups up and down
    -h, --help              Print this help message

EXAMPLES:
    # Refit four frames out of five
    cargo run -p kinetic-bench -- --mode periodic --frequency 5 --groups 16

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
