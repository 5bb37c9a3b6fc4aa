//! Bottom-level acceleration structures.

use glam::Mat4;
use kinetic_core::{GeometryKind, GeometryRole};

use crate::device::{
    AccelerationDevice, BuildFlags, BuildInputs, BuildMode, BuildSizes, StructureLevel,
    TriangleGeometry,
};
use crate::error::{Result, RtError};
use crate::geometry::GeometryBuffer;

/// Size of one per-geometry transform in the transform ring.
pub const TRANSFORM_STRIDE: u64 = std::mem::size_of::<kinetic_core::math::Transform3x4>() as u64;

/// A bottom-level structure holding `instance_count` copies of one geometry.
///
/// Each copy reads its own 3x4 transform; the copies' transforms are laid out
/// contiguously starting at the base address handed to [`Self::build`].
pub struct BottomLevelStructure<D: AccelerationDevice> {
    role: GeometryRole,
    transform: Mat4,
    instance_count: u32,
    flags: BuildFlags,
    dirty: bool,
    built: bool,
    sizes: BuildSizes,
    structure: Option<D::Structure>,
}

impl<D: AccelerationDevice> BottomLevelStructure<D> {
    /// Query sizes and allocate the result storage.
    ///
    /// `per_geometry_transforms` selects whether copies read a transform at
    /// build time; when false every copy is placed at the structure origin.
    pub fn initialize(
        device: &mut D,
        role: GeometryRole,
        geometry: &GeometryBuffer<D>,
        instance_count: u32,
        per_geometry_transforms: bool,
        flags: BuildFlags,
    ) -> Result<Self> {
        if instance_count == 0 {
            return Err(RtError::InvalidConfig(format!(
                "{role:?} needs at least one geometry instance"
            )));
        }

        // Any non-zero placeholder marks the transform as present for the query
        let transform_base = u64::from(per_geometry_transforms) * TRANSFORM_STRIDE;
        let geometries = describe(device, geometry, instance_count, transform_base);
        let sizes = device.query_build_sizes(&BuildInputs::Bottom {
            geometries: &geometries,
            flags,
        })?;

        let name = match role {
            GeometryRole::Plane => "bottom_level_plane".to_string(),
            GeometryRole::Group(n) => format!("bottom_level_group_{n}"),
        };
        let structure = device.create_structure(StructureLevel::Bottom, sizes.result, &name)?;

        tracing::debug!(
            ?role,
            instance_count,
            result = sizes.result,
            scratch = sizes.scratch_for(flags),
            "bottom-level structure initialized"
        );

        Ok(Self {
            role,
            transform: Mat4::IDENTITY,
            instance_count,
            flags,
            dirty: true,
            built: false,
            sizes,
            structure: Some(structure),
        })
    }

    pub fn role(&self) -> GeometryRole {
        self.role
    }

    pub fn kind(&self) -> GeometryKind {
        self.role.kind()
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    pub fn sizes(&self) -> BuildSizes {
        self.sizes
    }

    /// Scratch required by every build mode this structure permits.
    pub fn required_scratch_size(&self) -> u64 {
        self.sizes.scratch_for(self.flags)
    }

    pub fn required_result_size(&self) -> u64 {
        self.sizes.result
    }

    /// Object-to-world transform applied through the top-level instance.
    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a refit is legal: updates allowed and a prior build exists.
    pub fn can_update(&self) -> bool {
        self.flags.contains(BuildFlags::ALLOW_UPDATE) && self.built
    }

    pub fn structure(&self) -> Option<&D::Structure> {
        self.structure.as_ref()
    }

    pub fn device_address(&self, device: &D) -> Result<u64> {
        self.structure
            .as_ref()
            .map(|s| device.structure_address(s))
            .ok_or(RtError::NotInitialized("bottom-level structure"))
    }

    /// Record a build or refit.
    ///
    /// `transform_base` is the address of the first copy's transform, or zero
    /// when copies carry no transform.
    pub fn build(
        &mut self,
        device: &mut D,
        cmd: D::CommandBuffer,
        geometry: &GeometryBuffer<D>,
        scratch_address: u64,
        transform_base: u64,
        is_update: bool,
    ) -> Result<BuildMode> {
        debug_assert!(
            !is_update || self.flags.contains(BuildFlags::ALLOW_UPDATE),
            "refit of a structure built without ALLOW_UPDATE"
        );
        let structure = self
            .structure
            .as_ref()
            .ok_or(RtError::NotInitialized("bottom-level structure"))?;

        let mode = if is_update && !self.built {
            tracing::warn!(role = ?self.role, "refit requested before first build, building");
            BuildMode::Build
        } else {
            BuildMode::from_update(is_update)
        };

        let geometries = describe(device, geometry, self.instance_count, transform_base);
        device.record_build(
            cmd,
            &BuildInputs::Bottom {
                geometries: &geometries,
                flags: self.flags,
            },
            structure,
            mode,
            scratch_address,
        )?;
        tracing::trace!(role = ?self.role, ?mode, "bottom-level build recorded");

        self.dirty = false;
        self.built = true;
        Ok(mode)
    }

    /// Destroy the result storage. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) -> Result<()> {
        if let Some(structure) = self.structure.take() {
            device.destroy_structure(structure)?;
        }
        self.built = false;
        Ok(())
    }
}

fn describe<D: AccelerationDevice>(
    device: &D,
    geometry: &GeometryBuffer<D>,
    instance_count: u32,
    transform_base: u64,
) -> Vec<TriangleGeometry> {
    (0..u64::from(instance_count))
        .map(|i| {
            let transform_address = if transform_base == 0 {
                0
            } else {
                transform_base + i * TRANSFORM_STRIDE
            };
            geometry.triangles(device, transform_address)
        })
        .collect()
}
