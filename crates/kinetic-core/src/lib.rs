//! Core types, configuration and math for the Kinetic raytracing workspace.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Geometry kinds, bottom-level roles and ray types
//! - Scene configuration with range clamping
//! - Transform packing and alignment helpers
//! - Common error types

pub mod config;
pub mod error;
pub mod math;
pub mod types;

pub use config::{BuildQuality, SceneConfig, UpdateMode};
pub use error::{Error, Result};
pub use types::{GeometryKind, GeometryRole, Index, MaterialConstants, MeshData, RayType, Vertex};

/// Workspace-wide constants
pub mod constants {
    /// Maximum number of sphere group structures.
    pub const MAX_GROUPS: u32 = 64;
    /// Frames recorded ahead of the GPU.
    pub const FRAME_COUNT: usize = 3;
    /// Radius of one sphere geometry.
    pub const GEOMETRY_RADIUS: f32 = 3.0;
}
