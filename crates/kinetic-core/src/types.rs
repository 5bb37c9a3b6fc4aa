//! Core scene types shared by the acceleration structure and dispatch layers.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Index type used by every geometry buffer.
pub type Index = u16;

/// Kind of geometry a bottom-level structure is built from.
///
/// The discriminant doubles as the geometry's row in the hit-group table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryKind {
    /// Ground plane.
    Plane = 0,
    /// Tessellated sphere, instanced inside each group.
    Sphere = 1,
}

impl GeometryKind {
    /// Number of geometry kinds.
    pub const COUNT: usize = 2;

    /// All kinds in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::Plane, Self::Sphere];

    /// Position of this kind in per-kind arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// First hit-group record for this kind; add a [`RayType`] index to select a record.
    #[inline]
    pub const fn hit_group_base(self) -> u32 {
        (self as u32) * RayType::COUNT as u32
    }
}

/// Role of a bottom-level structure in the scene.
///
/// Roles are resolved once when acceleration structures are initialized and
/// replace positional conventions ("slot 0 is the plane").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryRole {
    /// The single ground plane.
    Plane,
    /// A cluster of sphere instances; the payload is the group number.
    Group(u32),
}

impl GeometryRole {
    /// Geometry kind this role is built from.
    #[inline]
    pub const fn kind(self) -> GeometryKind {
        match self {
            Self::Plane => GeometryKind::Plane,
            Self::Group(_) => GeometryKind::Sphere,
        }
    }

    /// Roles for a scene with `group_count` groups, in instance order.
    pub fn scene_roles(group_count: u32) -> Vec<Self> {
        std::iter::once(Self::Plane)
            .chain((0..group_count).map(Self::Group))
            .collect()
    }
}

/// Ray classes traced by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RayType {
    /// Camera rays.
    Primary = 0,
    /// Occlusion rays towards the light.
    Shadow = 1,
}

impl RayType {
    /// Number of ray types.
    pub const COUNT: usize = 2;

    /// All ray types in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::Primary, Self::Shadow];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Vertex layout of every geometry buffer (24 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    /// Stride of one vertex in bytes.
    pub const STRIDE: u64 = std::mem::size_of::<Self>() as u64;

    #[inline]
    pub const fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self { position, normal }
    }
}

/// CPU-side mesh handed over by a geometry builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<Index>,
}

impl MeshData {
    /// Number of triangles described by the index list.
    #[inline]
    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Check that the mesh is a non-empty, well-formed triangle list.
    pub fn validate(&self) -> crate::Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(crate::Error::InvalidData("empty mesh".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(crate::Error::InvalidData(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let vertex_count = self.vertices.len();
        if let Some(&bad) = self
            .indices
            .iter()
            .find(|&&i| usize::from(i) >= vertex_count)
        {
            return Err(crate::Error::OutOfBounds(format!(
                "index {bad} references one of {vertex_count} vertices"
            )));
        }
        Ok(())
    }
}

/// Material constants passed as hit-group root arguments (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub albedo: [f32; 4],
    pub reflectance: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
    pub step_scale: f32,
    pub _padding: [f32; 3],
}

impl MaterialConstants {
    /// Light grey, mostly diffuse ground material.
    pub const PLANE: Self = Self::new([0.75, 0.75, 0.75, 1.0], 0.0, 1.0, 0.4, 50.0);

    /// Green sphere material.
    pub const SPHERE: Self = Self::new([0.1, 1.0, 0.5, 1.0], 0.0, 0.9, 0.7, 50.0);

    pub const fn new(
        albedo: [f32; 4],
        reflectance: f32,
        diffuse: f32,
        specular: f32,
        specular_power: f32,
    ) -> Self {
        Self {
            albedo,
            reflectance,
            diffuse,
            specular,
            specular_power,
            step_scale: 1.0,
            _padding: [0.0; 3],
        }
    }

    /// Material used for a geometry kind.
    pub const fn for_kind(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Plane => Self::PLANE,
            GeometryKind::Sphere => Self::SPHERE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 48);
    }

    #[test]
    fn roles_start_with_plane() {
        let roles = GeometryRole::scene_roles(3);
        assert_eq!(
            roles,
            vec![
                GeometryRole::Plane,
                GeometryRole::Group(0),
                GeometryRole::Group(1),
                GeometryRole::Group(2),
            ]
        );
        assert_eq!(roles[0].kind(), GeometryKind::Plane);
        assert_eq!(roles[3].kind(), GeometryKind::Sphere);
    }

    #[test]
    fn hit_group_base_is_kind_times_ray_count() {
        assert_eq!(GeometryKind::Plane.hit_group_base(), 0);
        assert_eq!(GeometryKind::Sphere.hit_group_base(), 2);
    }

    #[test]
    fn mesh_validation() {
        let v = Vertex::new([0.0; 3], [0.0, 1.0, 0.0]);
        let ok = MeshData {
            vertices: vec![v; 3],
            indices: vec![0, 1, 2],
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.triangle_count(), 1);

        let ragged = MeshData {
            vertices: vec![v; 3],
            indices: vec![0, 1],
        };
        assert!(ragged.validate().is_err());

        let dangling = MeshData {
            vertices: vec![v; 3],
            indices: vec![0, 1, 3],
        };
        assert!(matches!(
            dangling.validate(),
            Err(crate::Error::OutOfBounds(_))
        ));
    }
}
