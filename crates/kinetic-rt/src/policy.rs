//! Build-versus-refit policy.

use crate::device::{BuildFlags, BuildMode};
use kinetic_core::{BuildQuality, SceneConfig, UpdateMode};

/// Compose the build flags of one initialization.
pub fn compose_flags(quality: BuildQuality, allow_update: bool, minimize_memory: bool) -> BuildFlags {
    let mut flags = match quality {
        BuildQuality::FastBuild => BuildFlags::PREFER_FAST_BUILD,
        BuildQuality::FastTrace => BuildFlags::PREFER_FAST_TRACE,
        BuildQuality::Default => BuildFlags::empty(),
    };
    if allow_update {
        flags |= BuildFlags::ALLOW_UPDATE;
    }
    if minimize_memory {
        flags |= BuildFlags::LOW_MEMORY;
    }
    flags
}

/// Decide the mode of one frame.
///
/// `frames_since_build` is the counter after this frame's increment: with
/// [`UpdateMode::UpdateBuildEveryXFrames`] the Mth frame after a full build
/// refits iff `M < frequency`.
pub const fn select_mode(
    mode: UpdateMode,
    frames_since_build: u32,
    frequency: u32,
    force_build: bool,
) -> BuildMode {
    if force_build {
        return BuildMode::Build;
    }
    match mode {
        UpdateMode::Build => BuildMode::Build,
        UpdateMode::Update => BuildMode::Update,
        UpdateMode::UpdateBuildEveryXFrames => {
            BuildMode::from_update(frames_since_build < frequency)
        }
    }
}

/// Per-frame policy state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildPolicy {
    pub update_mode: UpdateMode,
    pub build_quality: BuildQuality,
    pub build_frequency: u32,
    pub allow_update: bool,
    pub minimize_memory: bool,
    frames_since_build: u32,
    rebuild_requested: bool,
}

impl BuildPolicy {
    /// Policy with the settings of `config`. A rebuild is pending until the
    /// first frame consumes it.
    pub fn from_config(config: &SceneConfig) -> Self {
        Self {
            update_mode: config.update_mode,
            build_quality: config.build_quality,
            build_frequency: config.build_frequency,
            allow_update: config.allow_update,
            minimize_memory: config.minimize_memory,
            frames_since_build: 0,
            rebuild_requested: true,
        }
    }

    /// Flags for the next initialization.
    pub fn flags(&self) -> BuildFlags {
        compose_flags(self.build_quality, self.allow_update, self.minimize_memory)
    }

    /// Start a frame: bump the counter and return it.
    pub fn advance(&mut self) -> u32 {
        self.frames_since_build = self.frames_since_build.saturating_add(1);
        self.frames_since_build
    }

    /// Mode of the current frame.
    pub const fn decide(&self, force_build: bool) -> BuildMode {
        select_mode(
            self.update_mode,
            self.frames_since_build,
            self.build_frequency,
            force_build,
        )
    }

    /// A full build was recorded.
    pub fn record_full_build(&mut self) {
        self.frames_since_build = 0;
    }

    pub const fn frames_since_build(&self) -> u32 {
        self.frames_since_build
    }

    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    pub const fn rebuild_requested(&self) -> bool {
        self.rebuild_requested
    }

    /// Consume the pending rebuild request.
    pub fn take_rebuild_request(&mut self) -> bool {
        std::mem::take(&mut self.rebuild_requested)
    }
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self::from_config(&SceneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_table() {
        assert_eq!(
            compose_flags(BuildQuality::FastBuild, false, false),
            BuildFlags::PREFER_FAST_BUILD
        );
        assert_eq!(
            compose_flags(BuildQuality::FastTrace, true, false),
            BuildFlags::PREFER_FAST_TRACE | BuildFlags::ALLOW_UPDATE
        );
        assert_eq!(
            compose_flags(BuildQuality::Default, true, true),
            BuildFlags::ALLOW_UPDATE | BuildFlags::LOW_MEMORY
        );
        assert_eq!(
            compose_flags(BuildQuality::Default, false, false),
            BuildFlags::empty()
        );
    }

    #[test]
    fn fixed_modes_ignore_counter() {
        for counter in [0, 1, 7, 5000] {
            assert_eq!(
                select_mode(UpdateMode::Build, counter, 3, false),
                BuildMode::Build
            );
            assert_eq!(
                select_mode(UpdateMode::Update, counter, 3, false),
                BuildMode::Update
            );
        }
    }

    #[test]
    fn force_build_wins() {
        assert_eq!(
            select_mode(UpdateMode::Update, 1, 10, true),
            BuildMode::Build
        );
        assert_eq!(
            select_mode(UpdateMode::UpdateBuildEveryXFrames, 1, 10, true),
            BuildMode::Build
        );
    }

    #[test]
    fn periodic_mode_refits_below_frequency() {
        let modes: Vec<BuildMode> = (1..=6)
            .map(|m| select_mode(UpdateMode::UpdateBuildEveryXFrames, m, 5, false))
            .collect();
        assert_eq!(
            modes,
            vec![
                BuildMode::Update,
                BuildMode::Update,
                BuildMode::Update,
                BuildMode::Update,
                BuildMode::Build,
                BuildMode::Build,
            ]
        );
    }

    #[test]
    fn frequency_one_always_builds() {
        assert_eq!(
            select_mode(UpdateMode::UpdateBuildEveryXFrames, 1, 1, false),
            BuildMode::Build
        );
    }

    #[test]
    fn counter_lifecycle() {
        let mut policy = BuildPolicy::from_config(
            &SceneConfig::default()
                .with_update_mode(UpdateMode::UpdateBuildEveryXFrames)
                .with_build_frequency(2),
        );
        assert!(policy.take_rebuild_request());
        assert!(!policy.take_rebuild_request());

        assert_eq!(policy.advance(), 1);
        assert_eq!(policy.decide(false), BuildMode::Update);
        assert_eq!(policy.advance(), 2);
        assert_eq!(policy.decide(false), BuildMode::Build);
        policy.record_full_build();
        assert_eq!(policy.frames_since_build(), 0);
    }
}
