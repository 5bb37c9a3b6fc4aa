//! Device abstraction consumed by the acceleration structure core.
//!
//! Everything the manager, the structures and the scheduler need from a GPU
//! goes through [`AccelerationDevice`]. The Vulkan implementation lives in
//! [`crate::vulkan`]; tests drive the same code through a recording device.

use crate::error::Result;
use bitflags::bitflags;
use kinetic_core::math::Transform3x4;
use kinetic_gpu::DescriptorHandle;

bitflags! {
    /// Build flags shared by every structure of one initialization.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct BuildFlags: u32 {
        const PREFER_FAST_TRACE = 1 << 0;
        const PREFER_FAST_BUILD = 1 << 1;
        const ALLOW_UPDATE = 1 << 2;
        const LOW_MEMORY = 1 << 3;
    }
}

/// Whether a recorded build starts from scratch or refits in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildMode {
    /// Full build into the destination structure.
    Build,
    /// Refit with the destination as its own source.
    Update,
}

impl BuildMode {
    /// Map the per-frame decision to a mode.
    #[inline]
    pub const fn from_update(is_update: bool) -> Self {
        if is_update {
            Self::Update
        } else {
            Self::Build
        }
    }

    #[inline]
    pub const fn is_update(self) -> bool {
        matches!(self, Self::Update)
    }
}

/// Hierarchy level of a structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructureLevel {
    Bottom,
    Top,
}

/// One triangle geometry of a bottom-level build.
///
/// Vertices are `R32G32B32_SFLOAT` positions at the start of each vertex,
/// indices are 16 bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_address: u64,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_address: u64,
    pub index_count: u32,
    /// Address of a 3x4 transform, or zero for none.
    pub transform_address: u64,
}

impl TriangleGeometry {
    #[inline]
    pub const fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Inputs of a size query or a build.
#[derive(Clone, Copy, Debug)]
pub enum BuildInputs<'a> {
    Bottom {
        geometries: &'a [TriangleGeometry],
        flags: BuildFlags,
    },
    Top {
        instances_address: u64,
        instance_count: u32,
        flags: BuildFlags,
    },
}

impl BuildInputs<'_> {
    pub const fn level(&self) -> StructureLevel {
        match self {
            Self::Bottom { .. } => StructureLevel::Bottom,
            Self::Top { .. } => StructureLevel::Top,
        }
    }

    pub const fn flags(&self) -> BuildFlags {
        match self {
            Self::Bottom { flags, .. } | Self::Top { flags, .. } => *flags,
        }
    }

    /// Primitive count per geometry, in build order.
    pub fn primitive_counts(&self) -> Vec<u32> {
        match self {
            Self::Bottom { geometries, .. } => {
                geometries.iter().map(TriangleGeometry::triangle_count).collect()
            }
            Self::Top { instance_count, .. } => vec![*instance_count],
        }
    }
}

/// Memory requirements reported by a size query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSizes {
    pub result: u64,
    pub build_scratch: u64,
    pub update_scratch: u64,
}

impl BuildSizes {
    /// Scratch needed for every build mode the flags permit.
    #[inline]
    pub fn scratch_for(&self, flags: BuildFlags) -> u64 {
        if flags.contains(BuildFlags::ALLOW_UPDATE) {
            self.build_scratch.max(self.update_scratch)
        } else {
            self.build_scratch
        }
    }
}

/// Purpose of a buffer; selects usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Device-local build scratch.
    Scratch,
    /// Host-written vertex or index data.
    Geometry,
    /// Host-written instance descriptors.
    Instances,
    /// Host-written shader records.
    ShaderTable,
    /// Host-written per-frame transforms.
    FrameRing,
}

impl BufferKind {
    /// Whether the host writes this buffer through [`AccelerationDevice::write_buffer`].
    #[inline]
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, Self::Scratch)
    }
}

/// Buffer creation request.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub size: u64,
    pub kind: BufferKind,
    pub name: &'a str,
}

/// One strided region of the shader dispatch table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderTableRegion {
    pub address: u64,
    pub size: u64,
    pub stride: u64,
}

/// Arguments of one ray dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchRays {
    pub ray_generation: ShaderTableRegion,
    pub miss: ShaderTableRegion,
    pub hit_group: ShaderTableRegion,
    pub width: u32,
    pub height: u32,
}

/// Limits the core needs to lay out scratch and shader tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub scratch_alignment: u32,
}

/// GPU operations required by the acceleration structure core.
///
/// Commands are recorded into `CommandBuffer`s handed out by
/// [`begin_frame`](Self::begin_frame) and executed in submission order.
pub trait AccelerationDevice {
    type Buffer;
    type Structure;
    type CommandBuffer: Copy;

    fn limits(&self) -> DeviceLimits;

    /// Query result and scratch sizes for `inputs`.
    fn query_build_sizes(&self, inputs: &BuildInputs<'_>) -> Result<BuildSizes>;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<Self::Buffer>;
    /// Write host data into a host-visible buffer.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    fn buffer_address(&self, buffer: &Self::Buffer) -> u64;
    fn destroy_buffer(&mut self, buffer: Self::Buffer) -> Result<()>;

    /// Create a structure with exactly `size` bytes of result storage.
    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
        name: &str,
    ) -> Result<Self::Structure>;
    fn structure_address(&self, structure: &Self::Structure) -> u64;
    fn destroy_structure(&mut self, structure: Self::Structure) -> Result<()>;

    /// Record one build or in-place refit of `destination`.
    fn record_build(
        &mut self,
        cmd: Self::CommandBuffer,
        inputs: &BuildInputs<'_>,
        destination: &Self::Structure,
        mode: BuildMode,
        scratch_address: u64,
    ) -> Result<()>;
    /// Order ray tracing reads of every earlier submission before the builds
    /// that follow, which rewrite the same structures in place.
    fn record_pre_build_barrier(&mut self, cmd: Self::CommandBuffer);
    /// Make prior build writes visible to the next build.
    fn record_build_barrier(&mut self, cmd: Self::CommandBuffer);
    /// Make prior build writes visible to ray tracing shaders.
    fn record_trace_barrier(&mut self, cmd: Self::CommandBuffer);
    fn record_trace_rays(&mut self, cmd: Self::CommandBuffer, dispatch: &DispatchRays)
        -> Result<()>;

    /// Make `buffer` visible to shaders at descriptor `slot`.
    fn expose_buffer(&mut self, slot: DescriptorHandle, buffer: &Self::Buffer) -> Result<()>;
    /// Bind `structure` as the scene the dispatch traces against.
    fn expose_top_level(&mut self, structure: &Self::Structure) -> Result<()>;

    /// Wait until frame slot `frame_index` is free and start recording it.
    fn begin_frame(&mut self, frame_index: usize) -> Result<Self::CommandBuffer>;
    fn submit_frame(&mut self, frame_index: usize, cmd: Self::CommandBuffer) -> Result<()>;
    /// Block until every submitted command has completed.
    fn wait_idle(&mut self) -> Result<()>;
}

/// Instance flag disabling back-face culling, as in
/// `VK_GEOMETRY_INSTANCE_TRIANGLE_FACING_CULL_DISABLE_BIT_KHR`.
pub const INSTANCE_FLAG_CULL_DISABLE: u8 = 0x1;

/// Top-level instance record, binary compatible with
/// `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceDescriptor {
    /// Row-major 3x4 object-to-world transform.
    pub transform: Transform3x4,
    /// Custom index in the low 24 bits, visibility mask in the high 8.
    pub custom_index_and_mask: u32,
    /// Hit group offset in the low 24 bits, instance flags in the high 8.
    pub hit_group_offset_and_flags: u32,
    /// Device address of the referenced bottom-level structure.
    pub bottom_level_address: u64,
}

impl InstanceDescriptor {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Pack an instance. 24-bit fields are truncated to their width.
    pub const fn new(
        transform: Transform3x4,
        custom_index: u32,
        mask: u8,
        hit_group_offset: u32,
        flags: u8,
        bottom_level_address: u64,
    ) -> Self {
        Self {
            transform,
            custom_index_and_mask: pack_24_8(custom_index, mask),
            hit_group_offset_and_flags: pack_24_8(hit_group_offset, flags),
            bottom_level_address,
        }
    }

    #[inline]
    pub const fn custom_index(&self) -> u32 {
        self.custom_index_and_mask & 0x00FF_FFFF
    }

    #[inline]
    pub const fn mask(&self) -> u8 {
        (self.custom_index_and_mask >> 24) as u8
    }

    #[inline]
    pub const fn hit_group_offset(&self) -> u32 {
        self.hit_group_offset_and_flags & 0x00FF_FFFF
    }

    #[inline]
    pub const fn flags(&self) -> u8 {
        (self.hit_group_offset_and_flags >> 24) as u8
    }
}

const fn pack_24_8(low: u32, high: u8) -> u32 {
    (low & 0x00FF_FFFF) | ((high as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_core::math::IDENTITY_3X4;

    #[test]
    fn instance_descriptor_layout() {
        assert_eq!(InstanceDescriptor::SIZE, 64);
        assert_eq!(std::mem::align_of::<InstanceDescriptor>(), 8);
    }

    #[test]
    fn instance_descriptor_packing() {
        let desc = InstanceDescriptor::new(IDENTITY_3X4, 5, 0xFF, 2, 0x1, 0xDEAD_0000);
        assert_eq!(desc.custom_index(), 5);
        assert_eq!(desc.mask(), 0xFF);
        assert_eq!(desc.hit_group_offset(), 2);
        assert_eq!(desc.flags(), 0x1);
        assert_eq!(desc.custom_index_and_mask, 0xFF00_0005);

        let bytes = bytemuck::bytes_of(&desc);
        assert_eq!(&bytes[56..64], &0xDEAD_0000u64.to_le_bytes());
    }

    #[test]
    fn wide_fields_are_truncated() {
        let desc = InstanceDescriptor::new(IDENTITY_3X4, 0x0100_0001, 0, 0, 0, 0);
        assert_eq!(desc.custom_index(), 1);
    }

    #[test]
    fn scratch_accounts_for_updates_only_when_allowed() {
        let sizes = BuildSizes {
            result: 1024,
            build_scratch: 256,
            update_scratch: 512,
        };
        assert_eq!(sizes.scratch_for(BuildFlags::PREFER_FAST_TRACE), 256);
        assert_eq!(sizes.scratch_for(BuildFlags::ALLOW_UPDATE), 512);
    }

    #[test]
    fn bottom_inputs_report_triangle_counts() {
        let geometry = TriangleGeometry {
            vertex_address: 0,
            vertex_stride: 24,
            vertex_count: 4,
            index_address: 0,
            index_count: 6,
            transform_address: 0,
        };
        let geometries = [geometry, geometry];
        let inputs = BuildInputs::Bottom {
            geometries: &geometries,
            flags: BuildFlags::empty(),
        };
        assert_eq!(inputs.level(), StructureLevel::Bottom);
        assert_eq!(inputs.primitive_counts(), vec![2, 2]);
    }
}
