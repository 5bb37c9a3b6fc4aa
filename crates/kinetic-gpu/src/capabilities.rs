//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Device extensions the acceleration structure path cannot run without.
pub const RAY_TRACING_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Ray tracing limits relevant to structure builds and shader tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    /// Size of one shader group handle in bytes.
    pub shader_group_handle_size: u32,
    /// Required alignment of each shader record.
    pub shader_group_handle_alignment: u32,
    /// Required alignment of each shader table start.
    pub shader_group_base_alignment: u32,
    /// Largest record stride accepted by `vkCmdTraceRaysKHR`.
    pub max_shader_group_stride: u32,
    /// Maximum trace recursion depth.
    pub max_ray_recursion_depth: u32,
    /// Alignment of build scratch addresses.
    pub min_scratch_offset_alignment: u32,
    /// Maximum instances in one top-level structure.
    pub max_instance_count: u64,
    /// Maximum geometries in one bottom-level structure.
    pub max_geometry_count: u64,
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub device_name: String,
    pub api_version: u32,
    /// Buffer device addresses, required by every build input.
    pub supports_buffer_device_address: bool,
    pub device_local_memory_mb: u64,
    /// Ray tracing limits, if every ray tracing extension is present.
    pub ray_tracing: Option<RayTracingCapabilities>,
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version;
        let has_vulkan_1_2 =
            vk::api_version_major(api_version) >= 1 && vk::api_version_minor(api_version) >= 2;

        let has_ray_tracing = RAY_TRACING_EXTENSIONS.iter().all(|name| {
            name.to_str()
                .is_ok_and(|name| available_extensions.contains(name))
        });

        let ray_tracing = has_ray_tracing.then(|| {
            let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut as_properties =
                vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut rt_properties)
                .push_next(&mut as_properties);
            instance.get_physical_device_properties2(physical_device, &mut properties2);

            RayTracingCapabilities {
                shader_group_handle_size: rt_properties.shader_group_handle_size,
                shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
                shader_group_base_alignment: rt_properties.shader_group_base_alignment,
                max_shader_group_stride: rt_properties.max_shader_group_stride,
                max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
                min_scratch_offset_alignment: as_properties
                    .min_acceleration_structure_scratch_offset_alignment,
                max_instance_count: as_properties.max_instance_count,
                max_geometry_count: as_properties.max_geometry_count,
            }
        });

        Self {
            device_name,
            api_version,
            supports_buffer_device_address: has_vulkan_1_2
                || available_extensions.contains("VK_KHR_buffer_device_address"),
            device_local_memory_mb,
            ray_tracing,
            available_extensions,
        }
    }

    /// Check if the GPU can run the acceleration structure path.
    pub fn meets_requirements(&self) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return false;
        }

        // Builds and shader tables are addressed by device address
        if !self.supports_buffer_device_address {
            return false;
        }

        self.ray_tracing.is_some()
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        let ray_tracing = self.ray_tracing.map_or_else(
            || "no ray tracing".to_string(),
            |rt| {
                format!(
                    "handles {}B, scratch alignment {}",
                    rt.shader_group_handle_size, rt.min_scratch_offset_alignment
                )
            },
        );
        format!(
            "{} - Vulkan {}.{} - {} MB - {ray_tracing}",
            self.device_name,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(ray_tracing: Option<RayTracingCapabilities>) -> GpuCapabilities {
        GpuCapabilities {
            device_name: "test".to_string(),
            api_version: vk::API_VERSION_1_3,
            supports_buffer_device_address: true,
            device_local_memory_mb: 4096,
            ray_tracing,
            available_extensions: HashSet::new(),
        }
    }

    #[test]
    fn ray_tracing_is_required() {
        assert!(!capabilities(None).meets_requirements());

        let limits = RayTracingCapabilities {
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            max_shader_group_stride: 4096,
            max_ray_recursion_depth: 31,
            min_scratch_offset_alignment: 128,
            max_instance_count: 1 << 24,
            max_geometry_count: 1 << 24,
        };
        let caps = capabilities(Some(limits));
        assert!(caps.meets_requirements());
        assert!(caps.summary().contains("scratch alignment 128"));
    }

    #[test]
    fn ray_tracing_extension_names() {
        let names: Vec<&str> = RAY_TRACING_EXTENSIONS
            .iter()
            .map(|n| n.to_str().unwrap())
            .collect();
        assert!(names.contains(&"VK_KHR_acceleration_structure"));
        assert!(names.contains(&"VK_KHR_ray_tracing_pipeline"));
    }
}
