//! Acceleration structure manager.
//!
//! Owns geometry, every bottom-level structure, the top-level structure and
//! the shared scratch, and decides each frame whether structures are rebuilt
//! or refit.
//!
//! Two request flags drive reinitialization:
//! - `geometry_init_requested`: regenerate meshes (always followed by a
//!   structure reinitialization)
//! - `as_init_requested`: recreate every structure from the current geometry
//!
//! Both are serviced by [`AccelerationStructureManager::prepare_frame`], the
//! only place that blocks on the GPU.

use std::ops::RangeInclusive;

use glam::Mat4;
use kinetic_core::config::{
    clamp_to, BUILD_FREQUENCY_RANGE, GEOMETRIES_PER_GROUP_RANGE, GROUP_COUNT_RANGE,
    TESSELLATION_RANGE,
};
use kinetic_core::constants::FRAME_COUNT;
use kinetic_core::math::Transform3x4;
use kinetic_core::{BuildQuality, GeometryKind, GeometryRole, SceneConfig, UpdateMode};
use kinetic_gpu::DescriptorArena;

use crate::bottom_level::{BottomLevelStructure, TRANSFORM_STRIDE};
use crate::device::{AccelerationDevice, BufferKind, BuildFlags, BuildMode};
use crate::error::{Result, RtError};
use crate::frame_ring::FrameRing;
use crate::geometry::{GeometrySet, GeometrySource};
use crate::policy::BuildPolicy;
use crate::scene::{self, SceneAnimation};
use crate::scratch::SharedScratch;
use crate::top_level::TopLevelStructure;

/// Descriptor slots: an index view and a vertex view per geometry kind.
pub const DESCRIPTOR_CAPACITY: u32 = 2 * GeometryKind::COUNT as u32;

/// What one call to the per-frame update recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBuildReport {
    /// `Build` when any structure was fully built, `None` when builds are
    /// disabled.
    pub mode: Option<BuildMode>,
    pub bottom_levels_recorded: u32,
    pub top_level_recorded: bool,
    /// Counter value after this frame.
    pub frames_since_build: u32,
}

impl FrameBuildReport {
    const fn skipped(frames_since_build: u32) -> Self {
        Self {
            mode: None,
            bottom_levels_recorded: 0,
            top_level_recorded: false,
            frames_since_build,
        }
    }

    /// Total structures recorded.
    pub const fn structures_recorded(&self) -> u32 {
        self.bottom_levels_recorded + self.top_level_recorded as u32
    }
}

/// Memory and geometry statistics of the current initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelerationStats {
    /// Sum of every structure's result size.
    pub memory_footprint: u64,
    pub scratch_size: u64,
    pub bottom_level_count: u32,
    /// Indexed by [`GeometryKind::index`].
    pub triangles_per_geometry: [u32; GeometryKind::COUNT],
    pub scene_triangles: u64,
    pub frames_since_build: u32,
}

/// Build policy, reinitialization state machine and structure ownership.
///
/// Device resources are not released on drop: call
/// [`release_device_resources`](Self::release_device_resources) before the
/// device goes away.
pub struct AccelerationStructureManager<D: AccelerationDevice> {
    config: SceneConfig,
    policy: BuildPolicy,
    animation: SceneAnimation,
    geometry_init_requested: bool,
    as_init_requested: bool,
    frames: usize,

    arena: DescriptorArena,
    geometry: Option<GeometrySet<D>>,
    bottom_levels: Vec<BottomLevelStructure<D>>,
    base_transforms: Vec<Mat4>,
    top_level: Option<TopLevelStructure<D>>,
    scratch: SharedScratch<D>,
    geometry_transforms: Vec<Transform3x4>,
    transform_ring: Option<FrameRing<D, Transform3x4>>,

    active_flags: BuildFlags,
    memory_footprint: u64,
}

impl<D: AccelerationDevice> AccelerationStructureManager<D> {
    /// Create a manager; geometry and structures are created on the first
    /// [`prepare_frame`](Self::prepare_frame).
    pub fn new(config: SceneConfig) -> Self {
        let clamped = config.clamped();
        if clamped != config {
            tracing::warn!(?config, ?clamped, "configuration clamped to valid ranges");
        }

        Self {
            policy: BuildPolicy::from_config(&clamped),
            config: clamped,
            animation: SceneAnimation::default(),
            geometry_init_requested: true,
            as_init_requested: true,
            frames: FRAME_COUNT,

            arena: DescriptorArena::new(DESCRIPTOR_CAPACITY),
            geometry: None,
            bottom_levels: Vec::new(),
            base_transforms: Vec::new(),
            top_level: None,
            scratch: SharedScratch::new(),
            geometry_transforms: Vec::new(),
            transform_ring: None,

            active_flags: BuildFlags::empty(),
            memory_footprint: 0,
        }
    }

    /// Use `frames` per-frame regions instead of [`FRAME_COUNT`].
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames = frames.max(1);
        self
    }

    /// Use a descriptor arena of `capacity` slots.
    pub fn with_descriptor_capacity(mut self, capacity: u32) -> Self {
        self.arena = DescriptorArena::new(capacity);
        self
    }

    pub fn with_animation(mut self, animation: SceneAnimation) -> Self {
        self.animation = animation;
        self
    }

    // Reinitialization

    /// Service pending reinitialization requests.
    ///
    /// Blocks until the GPU is idle before touching any resource. Returns
    /// whether anything was reinitialized.
    pub fn prepare_frame(
        &mut self,
        device: &mut D,
        source: &mut dyn GeometrySource,
    ) -> Result<bool> {
        if !self.config.builds_enabled || !(self.geometry_init_requested || self.as_init_requested)
        {
            return Ok(false);
        }

        device.wait_idle()?;

        if self.geometry_init_requested {
            self.initialize_geometry(device, source)?;
            self.geometry_init_requested = false;
            self.as_init_requested = true;
        }
        if self.as_init_requested {
            self.initialize_acceleration_structures(device)?;
            self.as_init_requested = false;
        }
        Ok(true)
    }

    fn initialize_geometry(
        &mut self,
        device: &mut D,
        source: &mut dyn GeometrySource,
    ) -> Result<()> {
        // Structures are sized for the old meshes
        self.release_structures(device)?;
        if let Some(geometry) = self.geometry.take() {
            geometry.release(device, &mut self.arena)?;
        }

        let geometry = GeometrySet::build(
            device,
            &mut self.arena,
            source,
            self.config.tessellation_factor,
        )?;
        tracing::info!(
            tessellation_factor = self.config.tessellation_factor,
            plane_triangles = geometry.get(GeometryKind::Plane).triangle_count(),
            sphere_triangles = geometry.get(GeometryKind::Sphere).triangle_count(),
            "geometry initialized"
        );
        self.geometry = Some(geometry);
        Ok(())
    }

    fn initialize_acceleration_structures(&mut self, device: &mut D) -> Result<()> {
        self.release_structures(device)?;

        let geometry = self
            .geometry
            .as_ref()
            .ok_or(RtError::NotInitialized("geometry"))?;
        let flags = self.policy.flags();
        let roles = GeometryRole::scene_roles(self.config.group_count);
        let transforms = scene::bottom_level_transforms(&roles, &self.config);

        for (&role, &transform) in roles.iter().zip(&transforms) {
            let (instance_count, per_geometry_transforms) = match role {
                GeometryRole::Plane => (1, false),
                GeometryRole::Group(_) => (self.config.geometries_per_group, true),
            };
            let mut blas = BottomLevelStructure::initialize(
                device,
                role,
                geometry.get(role.kind()),
                instance_count,
                per_geometry_transforms,
                flags,
            )?;
            blas.set_transform(transform);
            self.bottom_levels.push(blas);
        }
        self.base_transforms = transforms;

        self.geometry_transforms = scene::packed_geometry_transforms(&self.config);
        let transform_count = self.geometry_transforms.len() as u32;
        let ring_matches = self
            .transform_ring
            .as_ref()
            .is_some_and(|ring| ring.element_count() == transform_count);
        if !ring_matches {
            if let Some(ring) = self.transform_ring.take() {
                ring.release(device)?;
            }
            self.transform_ring = Some(FrameRing::new(
                device,
                transform_count,
                self.frames,
                BufferKind::FrameRing,
                "geometry_transforms",
            )?);
        }

        let top_level = TopLevelStructure::initialize(
            device,
            &self.bottom_levels,
            flags,
            self.frames,
        )?;

        let scratch_size = self
            .bottom_levels
            .iter()
            .map(BottomLevelStructure::required_scratch_size)
            .chain(std::iter::once(top_level.required_scratch_size()))
            .max()
            .unwrap_or(0);
        self.scratch.resize(device, scratch_size)?;

        self.memory_footprint = self
            .bottom_levels
            .iter()
            .map(BottomLevelStructure::required_result_size)
            .sum::<u64>()
            + top_level.required_result_size();

        if let Some(structure) = top_level.structure() {
            device.expose_top_level(structure)?;
        }
        self.top_level = Some(top_level);
        self.active_flags = flags;
        self.policy.request_rebuild();

        tracing::info!(
            bottom_levels = self.bottom_levels.len(),
            geometries_per_group = self.config.geometries_per_group,
            ?flags,
            memory_footprint = self.memory_footprint,
            scratch_size = self.scratch.size(),
            "acceleration structures initialized"
        );
        Ok(())
    }

    fn release_structures(&mut self, device: &mut D) -> Result<()> {
        if let Some(mut top_level) = self.top_level.take() {
            top_level.release(device)?;
        }
        for mut blas in self.bottom_levels.drain(..) {
            blas.release(device)?;
        }
        self.memory_footprint = 0;
        Ok(())
    }

    // Per-frame

    /// Record this frame's builds. A pending rebuild request is consumed
    /// only once the frame has recorded.
    pub fn update(
        &mut self,
        device: &mut D,
        cmd: D::CommandBuffer,
        frame_index: usize,
    ) -> Result<FrameBuildReport> {
        if !self.config.builds_enabled {
            return Ok(FrameBuildReport::skipped(self.policy.frames_since_build()));
        }
        let force_build = self.policy.rebuild_requested();
        let report = self.update_acceleration_structures(device, cmd, frame_index, force_build)?;
        if force_build {
            self.policy.take_rebuild_request();
        }
        Ok(report)
    }

    /// Record every bottom-level build, then the top-level build.
    ///
    /// All structures are asked for one mode: `force_build` or a structure
    /// set initialized without [`BuildFlags::ALLOW_UPDATE`] always builds,
    /// otherwise the update mode decides. A structure that cannot refit yet
    /// builds instead, and any full build resets the frame counter.
    pub fn update_acceleration_structures(
        &mut self,
        device: &mut D,
        cmd: D::CommandBuffer,
        frame_index: usize,
        force_build: bool,
    ) -> Result<FrameBuildReport> {
        if !self.config.builds_enabled {
            return Ok(FrameBuildReport::skipped(self.policy.frames_since_build()));
        }
        let top_level = self
            .top_level
            .as_mut()
            .ok_or(RtError::NotInitialized("acceleration structures"))?;
        let geometry = self
            .geometry
            .as_ref()
            .ok_or(RtError::NotInitialized("geometry"))?;
        let ring = self
            .transform_ring
            .as_ref()
            .ok_or(RtError::NotInitialized("geometry transform buffer"))?;

        let counter = self.policy.advance();

        ring.write(device, frame_index, &self.geometry_transforms)?;
        top_level.update_instance_desc_transforms(device, &self.bottom_levels, frame_index)?;

        let mut requested = self.policy.decide(force_build);
        if requested.is_update() && !self.active_flags.contains(BuildFlags::ALLOW_UPDATE) {
            requested = BuildMode::Build;
        }
        let is_update = requested.is_update();

        device.record_pre_build_barrier(cmd);

        let mut full_build = false;
        let mut bottom_levels_recorded = 0;
        for blas in &mut self.bottom_levels {
            // Groups were laid out with the instance count they were built for
            let transform_base = match blas.role() {
                GeometryRole::Plane => 0,
                GeometryRole::Group(n) => {
                    ring.address_of(device, frame_index, n * blas.instance_count())
                }
            };
            let geometry = geometry.get(blas.kind());
            let recorded = self.scratch.record(device, cmd, |device, scratch| {
                blas.build(device, cmd, geometry, scratch, transform_base, is_update)
            })?;
            full_build |= !recorded.is_update();
            bottom_levels_recorded += 1;
        }

        let recorded = self.scratch.record(device, cmd, |device, scratch| {
            top_level.build(device, cmd, scratch, frame_index, is_update)
        })?;
        full_build |= !recorded.is_update();

        let mode = BuildMode::from_update(!full_build);
        if full_build {
            self.policy.record_full_build();
        }

        tracing::debug!(
            frame_index,
            counter,
            force_build,
            ?requested,
            ?mode,
            structures = bottom_levels_recorded + 1,
            "acceleration structures recorded"
        );

        Ok(FrameBuildReport {
            mode: Some(mode),
            bottom_levels_recorded,
            top_level_recorded: true,
            frames_since_build: self.policy.frames_since_build(),
        })
    }

    /// Apply the scene animation at `time` seconds to every group.
    pub fn animate(&mut self, time: f32) {
        if !self.animation.enabled {
            return;
        }
        for (blas, base) in self.bottom_levels.iter_mut().zip(&self.base_transforms) {
            if matches!(blas.role(), GeometryRole::Group(_)) {
                blas.set_transform(self.animation.apply(*base, time));
            }
        }
    }

    // Configuration

    pub fn set_builds_enabled(&mut self, enabled: bool) {
        self.config.builds_enabled = enabled;
    }

    pub fn set_update_mode(&mut self, mode: UpdateMode) {
        self.config.update_mode = mode;
        self.policy.update_mode = mode;
    }

    pub fn set_build_frequency(&mut self, frequency: u32) {
        let frequency = clamp_logged("build_frequency", frequency, &BUILD_FREQUENCY_RANGE);
        self.config.build_frequency = frequency;
        self.policy.build_frequency = frequency;
    }

    pub fn set_build_quality(&mut self, quality: BuildQuality) {
        if self.config.build_quality != quality {
            self.config.build_quality = quality;
            self.policy.build_quality = quality;
            self.request_as_initialization();
        }
    }

    pub fn set_allow_update(&mut self, allow: bool) {
        if self.config.allow_update != allow {
            self.config.allow_update = allow;
            self.policy.allow_update = allow;
            self.request_as_initialization();
        }
    }

    pub fn set_minimize_memory(&mut self, minimize: bool) {
        if self.config.minimize_memory != minimize {
            self.config.minimize_memory = minimize;
            self.policy.minimize_memory = minimize;
            self.request_as_initialization();
        }
    }

    pub fn set_tessellation_factor(&mut self, factor: u32) {
        let factor = clamp_logged("tessellation_factor", factor, &TESSELLATION_RANGE);
        if self.config.tessellation_factor != factor {
            self.config.tessellation_factor = factor;
            self.request_geometry_initialization();
        }
    }

    pub fn set_geometries_per_group(&mut self, count: u32) {
        let count = clamp_logged("geometries_per_group", count, &GEOMETRIES_PER_GROUP_RANGE);
        if self.config.geometries_per_group != count {
            self.config.geometries_per_group = count;
            self.request_geometry_initialization();
        }
    }

    pub fn set_group_count(&mut self, count: u32) {
        let count = clamp_logged("group_count", count, &GROUP_COUNT_RANGE);
        if self.config.group_count != count {
            self.config.group_count = count;
            self.request_as_initialization();
        }
    }

    pub fn set_animation(&mut self, animation: SceneAnimation) {
        self.animation = animation;
        if !animation.enabled {
            for (blas, base) in self.bottom_levels.iter_mut().zip(&self.base_transforms) {
                blas.set_transform(*base);
            }
        }
    }

    /// Apply every field of `config` through the individual setters.
    pub fn apply_config(&mut self, config: &SceneConfig) {
        self.set_builds_enabled(config.builds_enabled);
        self.set_update_mode(config.update_mode);
        self.set_build_frequency(config.build_frequency);
        self.set_build_quality(config.build_quality);
        self.set_allow_update(config.allow_update);
        self.set_minimize_memory(config.minimize_memory);
        self.set_tessellation_factor(config.tessellation_factor);
        self.set_geometries_per_group(config.geometries_per_group);
        self.set_group_count(config.group_count);
    }

    /// Regenerate geometry, then reinitialize structures, on the next
    /// [`prepare_frame`](Self::prepare_frame).
    pub fn request_geometry_initialization(&mut self) {
        self.geometry_init_requested = true;
        self.as_init_requested = true;
    }

    /// Reinitialize structures on the next [`prepare_frame`](Self::prepare_frame).
    pub fn request_as_initialization(&mut self) {
        self.as_init_requested = true;
    }

    // Device loss

    /// Release every device resource. Safe to call repeatedly.
    pub fn release_device_resources(&mut self, device: &mut D) -> Result<()> {
        if let Err(err) = device.wait_idle() {
            tracing::warn!(%err, "device not idle before release");
        }

        self.release_structures(device)?;
        if let Some(geometry) = self.geometry.take() {
            geometry.release(device, &mut self.arena)?;
        }
        if let Some(ring) = self.transform_ring.take() {
            ring.release(device)?;
        }
        self.scratch.release(device)?;
        self.arena.release_all();
        self.base_transforms.clear();
        self.active_flags = BuildFlags::empty();
        Ok(())
    }

    /// Schedule full re-creation after [`release_device_resources`](Self::release_device_resources).
    pub fn recreate_device_resources(&mut self) {
        self.request_geometry_initialization();
        self.policy.request_rebuild();
        tracing::info!("device resources scheduled for re-creation");
    }

    // Queries

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn policy(&self) -> &BuildPolicy {
        &self.policy
    }

    pub fn animation(&self) -> &SceneAnimation {
        &self.animation
    }

    pub fn is_geometry_init_requested(&self) -> bool {
        self.geometry_init_requested
    }

    pub fn is_as_init_requested(&self) -> bool {
        self.as_init_requested
    }

    pub fn is_rebuild_requested(&self) -> bool {
        self.policy.rebuild_requested()
    }

    /// Flags the current structures were initialized with.
    pub fn active_flags(&self) -> BuildFlags {
        self.active_flags
    }

    pub fn arena(&self) -> &DescriptorArena {
        &self.arena
    }

    pub fn geometry(&self) -> Option<&GeometrySet<D>> {
        self.geometry.as_ref()
    }

    /// Bottom-level structures in instance order.
    pub fn bottom_levels(&self) -> &[BottomLevelStructure<D>] {
        &self.bottom_levels
    }

    pub fn bottom_level(&self, role: GeometryRole) -> Option<&BottomLevelStructure<D>> {
        self.bottom_levels.iter().find(|blas| blas.role() == role)
    }

    pub fn top_level(&self) -> Option<&TopLevelStructure<D>> {
        self.top_level.as_ref()
    }

    /// Device address of the top-level structure for the dispatch stage.
    pub fn top_level_address(&self, device: &D) -> Result<u64> {
        self.top_level
            .as_ref()
            .ok_or(RtError::NotInitialized("top-level structure"))?
            .device_address(device)
    }

    pub fn scratch_size(&self) -> u64 {
        self.scratch.size()
    }

    /// Byte offset of group `group`'s first geometry transform in a frame
    /// region, for the layout the current structures were built with.
    pub fn geometry_transform_offset(&self, group: u32) -> u64 {
        let per_group = self
            .bottom_level(GeometryRole::Group(group))
            .map_or(self.config.geometries_per_group, BottomLevelStructure::instance_count);
        u64::from(group * per_group) * TRANSFORM_STRIDE
    }

    pub fn stats(&self) -> AccelerationStats {
        let mut triangles_per_geometry = [0; GeometryKind::COUNT];
        if let Some(geometry) = &self.geometry {
            for buffer in geometry.iter() {
                triangles_per_geometry[buffer.kind().index()] = buffer.triangle_count();
            }
        }
        let scene_triangles = self
            .bottom_levels
            .iter()
            .map(|blas| {
                u64::from(triangles_per_geometry[blas.kind().index()])
                    * u64::from(blas.instance_count())
            })
            .sum();

        AccelerationStats {
            memory_footprint: self.memory_footprint,
            scratch_size: self.scratch.size(),
            bottom_level_count: self.bottom_levels.len() as u32,
            triangles_per_geometry,
            scene_triangles,
            frames_since_build: self.policy.frames_since_build(),
        }
    }
}

fn clamp_logged(name: &str, value: u32, range: &RangeInclusive<u32>) -> u32 {
    let clamped = clamp_to(value, range);
    if clamped != value {
        tracing::warn!(name, value, clamped, "setting clamped to valid range");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_capacity_holds_geometry_views() {
        assert_eq!(DESCRIPTOR_CAPACITY, 4);
    }

    #[test]
    fn report_counts_structures() {
        let report = FrameBuildReport {
            mode: Some(BuildMode::Build),
            bottom_levels_recorded: 3,
            top_level_recorded: true,
            frames_since_build: 0,
        };
        assert_eq!(report.structures_recorded(), 4);
        assert_eq!(FrameBuildReport::skipped(2).structures_recorded(), 0);
    }
}
