//! Headless Vulkan layer for the Kinetic acceleration structure engine.
//!
//! This crate provides:
//! - Vulkan instance and device management with ray tracing enabled
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command buffer and per-frame fence management
//! - Descriptor slot allocation for bindless buffer arrays

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod sync;

pub use capabilities::{GpuCapabilities, RayTracingCapabilities, RAY_TRACING_EXTENSIONS};
pub use command::{begin_command_buffer, end_command_buffer, submit_command_buffer, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_acceleration_structure, write_storage_buffer, DescriptorArena, DescriptorHandle,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer};
pub use sync::{create_fence, FrameSync, FrameSyncManager};
