//! Acceleration structure lifecycle for dynamic raytraced geometry.
//!
//! This crate provides:
//! - Geometry upload with shader-visible index/vertex views
//! - Bottom-level structures (one per group) and one top-level structure
//! - Per-frame build-or-refit decisions driven by a [`BuildPolicy`]
//! - A shared scratch buffer used by one build at a time
//! - A shader dispatch table with per-geometry material root arguments
//! - A frame scheduler sequencing builds, barriers and ray dispatch
//!
//! All GPU access goes through [`AccelerationDevice`]; [`vulkan::VulkanDevice`]
//! implements it with `VK_KHR_acceleration_structure`.
//!
//! # Example
//!
//! ```ignore
//! use kinetic_rt::{AccelerationStructureManager, FrameScheduler};
//!
//! let mut manager = AccelerationStructureManager::new(config);
//! let mut scheduler = FrameScheduler::default();
//! loop {
//!     let report = scheduler.run_frame(&mut device, &mut manager, &mut meshes, Some(&target))?;
//! }
//! ```

pub mod bottom_level;
pub mod device;
pub mod error;
pub mod frame_ring;
pub mod geometry;
pub mod manager;
pub mod policy;
pub mod sbt;
pub mod scene;
pub mod scheduler;
pub mod scratch;
pub mod top_level;
pub mod vulkan;

pub use bottom_level::BottomLevelStructure;
pub use device::{
    AccelerationDevice, BufferDesc, BufferKind, BuildFlags, BuildInputs, BuildMode, BuildSizes,
    DeviceLimits, DispatchRays, InstanceDescriptor, ShaderTableRegion, StructureLevel,
    TriangleGeometry,
};
pub use error::{Result, RtError};
pub use frame_ring::FrameRing;
pub use geometry::{GeometryBuffer, GeometrySet, GeometrySource};
pub use manager::{AccelerationStats, AccelerationStructureManager, FrameBuildReport};
pub use policy::BuildPolicy;
pub use sbt::{hit_group_index, ShaderDispatchTable, ShaderIdentifiers, ShaderTableLayout};
pub use scene::SceneAnimation;
pub use scheduler::{FrameReport, FrameScheduler, TraceTarget};
pub use scratch::SharedScratch;
pub use top_level::TopLevelStructure;
pub use vulkan::{RayTracingBindings, VulkanDevice, VulkanStructure};
