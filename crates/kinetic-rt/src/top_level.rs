//! Top-level acceleration structure.

use kinetic_core::math::pack_transform;

use crate::bottom_level::BottomLevelStructure;
use crate::device::{
    AccelerationDevice, BufferKind, BuildFlags, BuildInputs, BuildMode, BuildSizes,
    InstanceDescriptor, StructureLevel, INSTANCE_FLAG_CULL_DISABLE,
};
use crate::error::{Result, RtError};
use crate::frame_ring::FrameRing;

/// Instance visibility mask: visible to every ray.
pub const INSTANCE_MASK: u8 = 0xFF;

/// One instance per bottom-level structure, in bottom-level order.
///
/// Instance descriptors are rewritten every frame into a per-frame region so
/// that bottom-level transforms and addresses always reflect the current
/// state. Instance `i` always occupies slot `i` of a region and carries `i`
/// as its custom index.
pub struct TopLevelStructure<D: AccelerationDevice> {
    flags: BuildFlags,
    sizes: BuildSizes,
    instances: Vec<InstanceDescriptor>,
    instance_ring: Option<FrameRing<D, InstanceDescriptor>>,
    structure: Option<D::Structure>,
    built_instance_count: Option<u32>,
}

impl<D: AccelerationDevice> TopLevelStructure<D> {
    /// Describe `bottom_levels` and allocate the instance ring and the
    /// result storage.
    pub fn initialize(
        device: &mut D,
        bottom_levels: &[BottomLevelStructure<D>],
        flags: BuildFlags,
        frames: usize,
    ) -> Result<Self> {
        let instances = describe(device, bottom_levels)?;
        let instance_count = instances.len() as u32;

        let instance_ring = FrameRing::new(
            device,
            instance_count,
            frames,
            BufferKind::Instances,
            "top_level_instances",
        )?;

        let instances_address = instance_ring.address_of(device, 0, 0);
        let sizes = device.query_build_sizes(&BuildInputs::Top {
            instances_address,
            instance_count,
            flags,
        })?;
        let structure = device.create_structure(StructureLevel::Top, sizes.result, "top_level")?;

        tracing::debug!(
            instance_count,
            result = sizes.result,
            scratch = sizes.scratch_for(flags),
            "top-level structure initialized"
        );

        Ok(Self {
            flags,
            sizes,
            instances,
            instance_ring: Some(instance_ring),
            structure: Some(structure),
            built_instance_count: None,
        })
    }

    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    /// Instance descriptors as last written.
    pub fn instances(&self) -> &[InstanceDescriptor] {
        &self.instances
    }

    pub fn required_scratch_size(&self) -> u64 {
        self.sizes.scratch_for(self.flags)
    }

    pub fn required_result_size(&self) -> u64 {
        self.sizes.result
    }

    pub fn structure(&self) -> Option<&D::Structure> {
        self.structure.as_ref()
    }

    pub fn device_address(&self, device: &D) -> Result<u64> {
        self.structure
            .as_ref()
            .map(|s| device.structure_address(s))
            .ok_or(RtError::NotInitialized("top-level structure"))
    }

    /// Rewrite every instance's transform and bottom-level address and
    /// upload them to the region of `frame_index`.
    pub fn update_instance_desc_transforms(
        &mut self,
        device: &mut D,
        bottom_levels: &[BottomLevelStructure<D>],
        frame_index: usize,
    ) -> Result<()> {
        let ring = self
            .instance_ring
            .as_ref()
            .ok_or(RtError::NotInitialized("top-level instance buffer"))?;
        if bottom_levels.len() != self.instances.len() {
            return Err(RtError::InvalidConfig(format!(
                "{} bottom-level structures for {} instances; reinitialize first",
                bottom_levels.len(),
                self.instances.len()
            )));
        }

        self.instances = describe(device, bottom_levels)?;
        ring.write(device, frame_index, &self.instances)
    }

    /// Record the top-level build or refit. Must follow every bottom-level
    /// build of the frame.
    pub fn build(
        &mut self,
        device: &mut D,
        cmd: D::CommandBuffer,
        scratch_address: u64,
        frame_index: usize,
        is_update: bool,
    ) -> Result<BuildMode> {
        let structure = self
            .structure
            .as_ref()
            .ok_or(RtError::NotInitialized("top-level structure"))?;
        let ring = self
            .instance_ring
            .as_ref()
            .ok_or(RtError::NotInitialized("top-level instance buffer"))?;
        debug_assert!(
            !is_update || self.flags.contains(BuildFlags::ALLOW_UPDATE),
            "refit of a structure built without ALLOW_UPDATE"
        );

        let instance_count = self.instances.len() as u32;
        let mode = if is_update && self.built_instance_count != Some(instance_count) {
            tracing::warn!(
                instance_count,
                previous = ?self.built_instance_count,
                "top-level refit with a changed instance count, building"
            );
            BuildMode::Build
        } else {
            BuildMode::from_update(is_update)
        };

        let instances_address = ring.address_of(device, frame_index, 0);
        device.record_build(
            cmd,
            &BuildInputs::Top {
                instances_address,
                instance_count,
                flags: self.flags,
            },
            structure,
            mode,
            scratch_address,
        )?;
        tracing::trace!(?mode, instance_count, "top-level build recorded");

        self.built_instance_count = Some(instance_count);
        Ok(mode)
    }

    /// Destroy the structure and instance buffer. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) -> Result<()> {
        if let Some(ring) = self.instance_ring.take() {
            ring.release(device)?;
        }
        if let Some(structure) = self.structure.take() {
            device.destroy_structure(structure)?;
        }
        self.built_instance_count = None;
        Ok(())
    }
}

/// Instance descriptors for `bottom_levels`, in the same order.
pub fn describe<D: AccelerationDevice>(
    device: &D,
    bottom_levels: &[BottomLevelStructure<D>],
) -> Result<Vec<InstanceDescriptor>> {
    bottom_levels
        .iter()
        .enumerate()
        .map(|(i, blas)| {
            Ok(InstanceDescriptor::new(
                pack_transform(blas.transform()),
                i as u32,
                INSTANCE_MASK,
                blas.kind().hit_group_base(),
                INSTANCE_FLAG_CULL_DISABLE,
                blas.device_address(device)?,
            ))
        })
        .collect()
}
