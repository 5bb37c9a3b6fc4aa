//! Vulkan implementation of [`AccelerationDevice`].
//!
//! Structure builds use `VK_KHR_acceleration_structure`, dispatch uses
//! `VK_KHR_ray_tracing_pipeline`. The ray tracing pipeline itself is created
//! by the caller and handed over through [`RayTracingBindings`].

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use kinetic_gpu::{
    begin_command_buffer, end_command_buffer, submit_command_buffer, write_acceleration_structure,
    write_storage_buffer, CommandPool, DescriptorHandle, FrameSyncManager, GpuBuffer, GpuContext,
    GpuError,
};

use crate::device::{
    AccelerationDevice, BufferDesc, BufferKind, BuildFlags, BuildInputs, BuildMode, BuildSizes,
    DeviceLimits, DispatchRays, InstanceDescriptor, ShaderTableRegion, StructureLevel,
};
use crate::error::{Result, RtError};
use crate::sbt::ShaderIdentifiers;

const _: () = assert!(
    std::mem::size_of::<InstanceDescriptor>()
        == std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
);

/// Pipeline objects the dispatch binds.
#[derive(Clone, Copy, Debug)]
pub struct RayTracingBindings {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    /// Binding of the storage buffer array holding geometry views.
    pub geometry_binding: u32,
    /// Binding of the top-level structure.
    pub top_level_binding: u32,
}

/// Acceleration structure with its backing storage.
pub struct VulkanStructure {
    handle: vk::AccelerationStructureKHR,
    buffer: GpuBuffer,
    address: vk::DeviceAddress,
    level: StructureLevel,
}

impl VulkanStructure {
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    pub fn level(&self) -> StructureLevel {
        self.level
    }
}

/// [`AccelerationDevice`] over a [`GpuContext`].
///
/// Owns one command pool and a command buffer plus fence per frame slot.
/// Resources created through the trait must be destroyed through it before
/// this device is dropped.
pub struct VulkanDevice {
    context: Arc<GpuContext>,
    pool: CommandPool,
    frames: FrameSyncManager,
    bindings: Option<RayTracingBindings>,
}

impl VulkanDevice {
    /// Create per-frame command buffers and fences for `frames_in_flight` slots.
    pub fn new(context: Arc<GpuContext>, frames_in_flight: usize) -> Result<Self> {
        if context.capabilities().ray_tracing.is_none() {
            return Err(GpuError::ExtensionNotSupported(
                "VK_KHR_ray_tracing_pipeline".to_string(),
            )
            .into());
        }

        let device = context.device();
        let pool = unsafe { CommandPool::new(device, context.queue_family())? };
        let frames = unsafe { FrameSyncManager::new(device, &pool, frames_in_flight.max(1))? };

        tracing::info!(
            frames_in_flight = frames.frames_in_flight(),
            device = %context.capabilities().device_name,
            "Vulkan acceleration device created"
        );

        Ok(Self {
            context,
            pool,
            frames,
            bindings: None,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    /// Pipeline, layout and descriptor set used by dispatch and descriptor writes.
    pub fn set_bindings(&mut self, bindings: RayTracingBindings) {
        self.bindings = Some(bindings);
    }

    pub fn bindings(&self) -> Option<&RayTracingBindings> {
        self.bindings.as_ref()
    }

    /// Raw shader group handles of `pipeline`, `group_count` handles back to back.
    pub fn shader_group_handles(&self, pipeline: vk::Pipeline, group_count: u32) -> Result<Vec<u8>> {
        let handle_size = self.context.ray_tracing().shader_group_handle_size as usize;
        let handles = unsafe {
            self.context
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    group_count as usize * handle_size,
                )
                .map_err(GpuError::from)?
        };
        Ok(handles)
    }

    /// Identifiers of a pipeline whose groups are ordered ray generation,
    /// miss per ray type, hit group per ray type.
    pub fn shader_identifiers(&self, pipeline: vk::Pipeline) -> Result<ShaderIdentifiers> {
        let group_count = 1 + 2 * kinetic_core::RayType::COUNT as u32;
        let handles = self.shader_group_handles(pipeline, group_count)?;
        ShaderIdentifiers::from_group_handles(
            &handles,
            self.context.ray_tracing().shader_group_handle_size as usize,
        )
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }

    fn bindings_or_err(&self) -> Result<RayTracingBindings> {
        self.bindings
            .ok_or(RtError::NotInitialized("ray tracing pipeline bindings"))
    }
}

impl AccelerationDevice for VulkanDevice {
    type Buffer = GpuBuffer;
    type Structure = VulkanStructure;
    type CommandBuffer = vk::CommandBuffer;

    fn limits(&self) -> DeviceLimits {
        let rt = self.context.ray_tracing();
        DeviceLimits {
            shader_group_handle_size: rt.shader_group_handle_size,
            shader_group_handle_alignment: rt.shader_group_handle_alignment,
            shader_group_base_alignment: rt.shader_group_base_alignment,
            scratch_alignment: rt.min_scratch_offset_alignment,
        }
    }

    fn query_build_sizes(&self, inputs: &BuildInputs<'_>) -> Result<BuildSizes> {
        let geometries = vk_geometries(inputs);
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk_structure_type(inputs.level()))
            .flags(vk_build_flags(inputs.flags()))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let primitive_counts = inputs.primitive_counts();
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.context
                .acceleration_structure()
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &primitive_counts,
                    &mut sizes,
                );
        }

        Ok(BuildSizes {
            result: sizes.acceleration_structure_size,
            build_scratch: sizes.build_scratch_size,
            update_scratch: sizes.update_scratch_size,
        })
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<GpuBuffer> {
        let rt = self.context.ray_tracing();
        let address = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        let build_input = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;

        let (usage, alignment) = match desc.kind {
            BufferKind::Scratch => (
                vk::BufferUsageFlags::STORAGE_BUFFER | address,
                u64::from(rt.min_scratch_offset_alignment),
            ),
            BufferKind::Geometry | BufferKind::Instances | BufferKind::FrameRing => {
                (vk::BufferUsageFlags::STORAGE_BUFFER | build_input | address, 1)
            }
            BufferKind::ShaderTable => (
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | address,
                u64::from(rt.shader_group_base_alignment),
            ),
        };
        let location = if desc.kind.is_host_visible() {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let buffer = self.context.allocator().lock().create_buffer_aligned(
            desc.size,
            usage,
            location,
            alignment.max(1),
            desc.name,
        )?;
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.write_bytes(offset, data)?;
        Ok(())
    }

    fn buffer_address(&self, buffer: &GpuBuffer) -> u64 {
        buffer.device_address(self.device())
    }

    fn destroy_buffer(&mut self, mut buffer: GpuBuffer) -> Result<()> {
        self.context.allocator().lock().free_buffer(&mut buffer)?;
        Ok(())
    }

    fn create_structure(
        &mut self,
        level: StructureLevel,
        size: u64,
        name: &str,
    ) -> Result<VulkanStructure> {
        let mut buffer = self.context.allocator().lock().create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.buffer)
            .offset(0)
            .size(size)
            .ty(vk_structure_type(level));

        let loader = self.context.acceleration_structure();
        let handle = match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(handle) => handle,
            Err(err) => {
                self.context.allocator().lock().free_buffer(&mut buffer)?;
                return Err(GpuError::from(err).into());
            }
        };

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        let address = unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        tracing::trace!(name, size, ?level, "acceleration structure created");
        Ok(VulkanStructure {
            handle,
            buffer,
            address,
            level,
        })
    }

    fn structure_address(&self, structure: &VulkanStructure) -> u64 {
        structure.address
    }

    fn destroy_structure(&mut self, mut structure: VulkanStructure) -> Result<()> {
        unsafe {
            self.context
                .acceleration_structure()
                .destroy_acceleration_structure(structure.handle, None);
        }
        self.context
            .allocator()
            .lock()
            .free_buffer(&mut structure.buffer)?;
        Ok(())
    }

    fn record_build(
        &mut self,
        cmd: vk::CommandBuffer,
        inputs: &BuildInputs<'_>,
        destination: &VulkanStructure,
        mode: BuildMode,
        scratch_address: u64,
    ) -> Result<()> {
        let geometries = vk_geometries(inputs);
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk_structure_type(inputs.level()))
            .flags(vk_build_flags(inputs.flags()))
            .dst_acceleration_structure(destination.handle)
            .geometries(&geometries)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });
        build_info = match mode {
            BuildMode::Build => build_info.mode(vk::BuildAccelerationStructureModeKHR::BUILD),
            // Refit in place
            BuildMode::Update => build_info
                .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
                .src_acceleration_structure(destination.handle),
        };

        let ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR> = inputs
            .primitive_counts()
            .into_iter()
            .map(|count| {
                vk::AccelerationStructureBuildRangeInfoKHR::default()
                    .primitive_count(count)
                    .primitive_offset(0)
                    .first_vertex(0)
                    .transform_offset(0)
            })
            .collect();

        unsafe {
            self.context
                .acceleration_structure()
                .cmd_build_acceleration_structures(cmd, &[build_info], &[ranges.as_slice()]);
        }
        Ok(())
    }

    fn record_pre_build_barrier(&mut self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR)
            .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR);
        let dependency_info =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device().cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn record_build_barrier(&mut self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .dst_access_mask(
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            );
        let dependency_info =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device().cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn record_trace_barrier(&mut self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR)
            .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR);
        let dependency_info =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device().cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    fn record_trace_rays(&mut self, cmd: vk::CommandBuffer, dispatch: &DispatchRays) -> Result<()> {
        let bindings = self.bindings_or_err()?;
        let device = self.device();

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, bindings.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                bindings.layout,
                0,
                &[bindings.descriptor_set],
                &[],
            );
            self.context.ray_tracing_pipeline().cmd_trace_rays(
                cmd,
                &vk_region(dispatch.ray_generation),
                &vk_region(dispatch.miss),
                &vk_region(dispatch.hit_group),
                &vk::StridedDeviceAddressRegionKHR::default(),
                dispatch.width,
                dispatch.height,
                1,
            );
        }
        Ok(())
    }

    fn expose_buffer(&mut self, slot: DescriptorHandle, buffer: &GpuBuffer) -> Result<()> {
        let Some(bindings) = self.bindings else {
            tracing::trace!(slot = slot.index(), "no descriptor set bound, view not written");
            return Ok(());
        };
        unsafe {
            write_storage_buffer(
                self.device(),
                bindings.descriptor_set,
                bindings.geometry_binding,
                slot,
                buffer.buffer,
                0,
                vk::WHOLE_SIZE,
            );
        }
        Ok(())
    }

    fn expose_top_level(&mut self, structure: &VulkanStructure) -> Result<()> {
        let Some(bindings) = self.bindings else {
            tracing::trace!("no descriptor set bound, top level not written");
            return Ok(());
        };
        unsafe {
            write_acceleration_structure(
                self.device(),
                bindings.descriptor_set,
                bindings.top_level_binding,
                structure.handle,
            );
        }
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: usize) -> Result<vk::CommandBuffer> {
        let sync = self.frames.frame(frame_index);
        unsafe {
            sync.wait(self.device())?;
            begin_command_buffer(self.device(), sync.command_buffer)?;
        }
        Ok(sync.command_buffer)
    }

    fn submit_frame(&mut self, frame_index: usize, cmd: vk::CommandBuffer) -> Result<()> {
        let sync = self.frames.frame(frame_index);
        unsafe {
            end_command_buffer(self.device(), cmd)?;
            sync.reset(self.device())?;
            submit_command_buffer(self.device(), self.context.queue(), cmd, sync.in_flight)?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.context.wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let live = self.context.allocator().lock().live_buffers();
        if live > 0 {
            tracing::warn!(live, "acceleration device dropped with live buffers");
        }
        unsafe {
            let device = self.context.device();
            let _ = device.device_wait_idle();
            self.frames.destroy(device);
            self.pool.destroy(device);
        }
    }
}

fn vk_structure_type(level: StructureLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        StructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        StructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

fn vk_build_flags(flags: BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut out = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.contains(BuildFlags::PREFER_FAST_TRACE) {
        out |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(BuildFlags::PREFER_FAST_BUILD) {
        out |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    if flags.contains(BuildFlags::ALLOW_UPDATE) {
        out |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    if flags.contains(BuildFlags::LOW_MEMORY) {
        out |= vk::BuildAccelerationStructureFlagsKHR::LOW_MEMORY;
    }
    out
}

fn vk_geometries(inputs: &BuildInputs<'_>) -> Vec<vk::AccelerationStructureGeometryKHR<'static>> {
    match inputs {
        BuildInputs::Bottom { geometries, .. } => geometries
            .iter()
            .map(|g| {
                let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: g.vertex_address,
                    })
                    .vertex_stride(g.vertex_stride)
                    .max_vertex(g.vertex_count.saturating_sub(1))
                    .index_type(vk::IndexType::UINT16)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: g.index_address,
                    })
                    .transform_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: g.transform_address,
                    });
                vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            })
            .collect(),
        BuildInputs::Top {
            instances_address, ..
        } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: *instances_address,
                });
            vec![vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .flags(vk::GeometryFlagsKHR::OPAQUE)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })]
        }
    }
}

fn vk_region(region: ShaderTableRegion) -> vk::StridedDeviceAddressRegionKHR {
    vk::StridedDeviceAddressRegionKHR::default()
        .device_address(region.address)
        .stride(region.stride)
        .size(region.size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_map_one_to_one() {
        let flags = BuildFlags::PREFER_FAST_TRACE | BuildFlags::ALLOW_UPDATE;
        assert_eq!(
            vk_build_flags(flags),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
                | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        );
        assert!(vk_build_flags(BuildFlags::empty()).is_empty());
        assert_eq!(
            vk_build_flags(BuildFlags::PREFER_FAST_BUILD | BuildFlags::LOW_MEMORY),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD
                | vk::BuildAccelerationStructureFlagsKHR::LOW_MEMORY
        );
    }

    #[test]
    fn top_level_has_one_instance_geometry() {
        let inputs = BuildInputs::Top {
            instances_address: 0x1000,
            instance_count: 4,
            flags: BuildFlags::empty(),
        };
        let geometries = vk_geometries(&inputs);
        assert_eq!(geometries.len(), 1);
        assert_eq!(geometries[0].geometry_type, vk::GeometryTypeKHR::INSTANCES);
    }

    #[test]
    fn region_copies_fields() {
        let region = vk_region(ShaderTableRegion {
            address: 64,
            size: 128,
            stride: 32,
        });
        assert_eq!(region.device_address, 64);
        assert_eq!(region.size, 128);
        assert_eq!(region.stride, 32);
    }
}
