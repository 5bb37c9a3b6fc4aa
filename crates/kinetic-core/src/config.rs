//! Scene and acceleration structure configuration.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::constants::MAX_GROUPS;
use crate::error::{Error, Result};

/// How acceleration structures are refreshed each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Full rebuild every frame.
    #[default]
    Build,
    /// In-place refit every frame.
    Update,
    /// Refit, with a full rebuild every `build_frequency` frames.
    UpdateBuildEveryXFrames,
}

/// Build quality preference applied to every structure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildQuality {
    /// Let the driver decide.
    Default,
    /// Spend more build time for faster traversal.
    #[default]
    FastTrace,
    /// Build as fast as possible.
    FastBuild,
}

/// Valid range of `build_frequency`.
pub const BUILD_FREQUENCY_RANGE: RangeInclusive<u32> = 1..=1200;
/// Valid range of `tessellation_factor`.
pub const TESSELLATION_RANGE: RangeInclusive<u32> = 0..=80;
/// Valid range of `geometries_per_group`.
pub const GEOMETRIES_PER_GROUP_RANGE: RangeInclusive<u32> = 1..=1000;
/// Valid range of `group_count`.
pub const GROUP_COUNT_RANGE: RangeInclusive<u32> = 1..=MAX_GROUPS;

/// Clamp `value` into `range`.
#[inline]
pub fn clamp_to(value: u32, range: &RangeInclusive<u32>) -> u32 {
    value.clamp(*range.start(), *range.end())
}

/// Configuration owned by the acceleration structure manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Master switch for geometry/AS initialization, builds and refits.
    pub builds_enabled: bool,
    /// Per-frame refresh strategy.
    pub update_mode: UpdateMode,
    /// Frames between full rebuilds in [`UpdateMode::UpdateBuildEveryXFrames`].
    pub build_frequency: u32,
    /// Request compacted, low-memory structures.
    pub minimize_memory: bool,
    /// Build structures that can be refitted in place.
    pub allow_update: bool,
    /// Build quality preference.
    pub build_quality: BuildQuality,
    /// Sphere tessellation factor handed to the geometry builder.
    pub tessellation_factor: u32,
    /// Sphere instances inside each group structure.
    pub geometries_per_group: u32,
    /// Number of sphere group structures.
    pub group_count: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            builds_enabled: true,
            update_mode: UpdateMode::Build,
            build_frequency: 1,
            minimize_memory: false,
            allow_update: true,
            build_quality: BuildQuality::FastTrace,
            tessellation_factor: 14,
            geometries_per_group: 1,
            group_count: 1,
        }
    }
}

impl SceneConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the update mode.
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Set the rebuild frequency.
    pub fn with_build_frequency(mut self, frequency: u32) -> Self {
        self.build_frequency = frequency;
        self
    }

    /// Set the build quality.
    pub fn with_build_quality(mut self, quality: BuildQuality) -> Self {
        self.build_quality = quality;
        self
    }

    /// Enable or disable in-place refits.
    pub fn with_allow_update(mut self, allow: bool) -> Self {
        self.allow_update = allow;
        self
    }

    /// Enable or disable low-memory builds.
    pub fn with_minimize_memory(mut self, minimize: bool) -> Self {
        self.minimize_memory = minimize;
        self
    }

    /// Set the sphere tessellation factor.
    pub fn with_tessellation_factor(mut self, factor: u32) -> Self {
        self.tessellation_factor = factor;
        self
    }

    /// Set the number of sphere instances per group.
    pub fn with_geometries_per_group(mut self, count: u32) -> Self {
        self.geometries_per_group = count;
        self
    }

    /// Set the number of groups.
    pub fn with_group_count(mut self, count: u32) -> Self {
        self.group_count = count;
        self
    }

    /// Total number of bottom-level structures (plane + groups).
    #[inline]
    pub fn bottom_level_count(&self) -> u32 {
        self.group_count + 1
    }

    /// Total number of sphere instances across all groups.
    #[inline]
    pub fn geometry_transform_count(&self) -> u32 {
        self.group_count * self.geometries_per_group
    }

    /// Copy of this configuration with every integer clamped to its valid range.
    pub fn clamped(&self) -> Self {
        Self {
            build_frequency: clamp_to(self.build_frequency, &BUILD_FREQUENCY_RANGE),
            tessellation_factor: clamp_to(self.tessellation_factor, &TESSELLATION_RANGE),
            geometries_per_group: clamp_to(
                self.geometries_per_group,
                &GEOMETRIES_PER_GROUP_RANGE,
            ),
            group_count: clamp_to(self.group_count, &GROUP_COUNT_RANGE),
            ..self.clone()
        }
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<()> {
        check("build_frequency", self.build_frequency, &BUILD_FREQUENCY_RANGE)?;
        check(
            "tessellation_factor",
            self.tessellation_factor,
            &TESSELLATION_RANGE,
        )?;
        check(
            "geometries_per_group",
            self.geometries_per_group,
            &GEOMETRIES_PER_GROUP_RANGE,
        )?;
        check("group_count", self.group_count, &GROUP_COUNT_RANGE)?;
        Ok(())
    }
}

fn check(name: &str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} = {value} outside {}..={}",
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SceneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.update_mode, UpdateMode::Build);
        assert_eq!(config.build_quality, BuildQuality::FastTrace);
        assert!(config.allow_update);
        assert_eq!(config.bottom_level_count(), 2);
    }

    #[test]
    fn clamping() {
        let config = SceneConfig::new()
            .with_build_frequency(0)
            .with_group_count(MAX_GROUPS + 10)
            .with_geometries_per_group(5000)
            .with_tessellation_factor(99)
            .clamped();
        assert_eq!(config.build_frequency, 1);
        assert_eq!(config.group_count, MAX_GROUPS);
        assert_eq!(config.geometries_per_group, 1000);
        assert_eq!(config.tessellation_factor, 80);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_groups() {
        let config = SceneConfig::new().with_group_count(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
