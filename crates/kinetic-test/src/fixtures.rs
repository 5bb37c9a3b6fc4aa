//! Procedural meshes for tests and the bench driver.

use std::f32::consts::{PI, TAU};

use kinetic_core::constants::GEOMETRY_RADIUS;
use kinetic_core::{GeometryKind, Index, MeshData, Vertex};
use kinetic_rt::GeometrySource;

/// Unit quad in the XZ plane spanning `[0, 1]`, facing +Y.
pub fn plane() -> MeshData {
    let up = [0.0, 1.0, 0.0];
    MeshData {
        vertices: vec![
            Vertex::new([0.0, 0.0, 0.0], up),
            Vertex::new([1.0, 0.0, 0.0], up),
            Vertex::new([1.0, 0.0, 1.0], up),
            Vertex::new([0.0, 0.0, 1.0], up),
        ],
        indices: vec![0, 2, 1, 0, 3, 2],
    }
}

/// Octahedron of the given radius: 6 vertices, 8 triangles.
pub fn octahedron(radius: f32) -> MeshData {
    let axes = [
        [1.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, -1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, -1.0],
    ];
    let vertices = axes
        .iter()
        .map(|n| Vertex::new([n[0] * radius, n[1] * radius, n[2] * radius], *n))
        .collect();
    #[rustfmt::skip]
    let indices = vec![
        4, 0, 2,  1, 4, 2,  5, 1, 2,  0, 5, 2,
        0, 4, 3,  4, 1, 3,  1, 5, 3,  5, 0, 3,
    ];
    MeshData { vertices, indices }
}

/// Latitude-longitude sphere with `stacks` rings and `2 * stacks` segments.
pub fn uv_sphere(radius: f32, stacks: u32) -> MeshData {
    let stacks = stacks.max(3);
    let slices = stacks * 2;

    let mut vertices = Vec::with_capacity(((stacks + 1) * (slices + 1)) as usize);
    for i in 0..=stacks {
        let theta = PI * i as f32 / stacks as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for j in 0..=slices {
            let phi = TAU * j as f32 / slices as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();
            let normal = [sin_theta * cos_phi, cos_theta, sin_theta * sin_phi];
            vertices.push(Vertex::new(
                [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                normal,
            ));
        }
    }

    let stride = slices + 1;
    let mut indices = Vec::with_capacity((6 * stacks * slices) as usize);
    for i in 0..stacks {
        for j in 0..slices {
            let a = (i * stride + j) as Index;
            let b = ((i + 1) * stride + j) as Index;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    MeshData { vertices, indices }
}

/// [`GeometrySource`] producing the plane and a sphere whose detail follows
/// the tessellation factor (0 is an octahedron).
#[derive(Debug, Default)]
pub struct FixtureMeshes {
    calls: u32,
}

impl FixtureMeshes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Meshes generated so far.
    pub fn calls(&self) -> u32 {
        self.calls
    }
}

impl GeometrySource for FixtureMeshes {
    fn mesh(&mut self, kind: GeometryKind, tessellation_factor: u32) -> MeshData {
        self.calls += 1;
        match kind {
            GeometryKind::Plane => plane(),
            GeometryKind::Sphere if tessellation_factor == 0 => octahedron(GEOMETRY_RADIUS),
            GeometryKind::Sphere => uv_sphere(GEOMETRY_RADIUS, tessellation_factor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use kinetic_core::config::TESSELLATION_RANGE;

    #[test]
    fn plane_is_two_triangles() {
        let mesh = plane();
        assert_eq!(mesh.triangle_count(), 2);
        mesh.validate().unwrap();
    }

    #[test]
    fn octahedron_vertices_on_sphere() {
        let mesh = octahedron(3.0);
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.triangle_count(), 8);
        for v in &mesh.vertices {
            let p = glam::Vec3::from(v.position);
            assert_relative_eq!(p.length(), 3.0);
        }
    }

    #[test]
    fn sphere_triangle_count() {
        let mesh = uv_sphere(1.0, 4);
        assert_eq!(mesh.triangle_count(), 2 * 4 * 8);
        mesh.validate().unwrap();
    }

    #[test]
    fn highest_tessellation_fits_16_bit_indices() {
        let mesh = uv_sphere(1.0, *TESSELLATION_RANGE.end());
        assert!(mesh.vertices.len() <= usize::from(Index::MAX) + 1);
        mesh.validate().unwrap();
    }

    #[test]
    fn source_switches_on_tessellation() {
        let mut source = FixtureMeshes::new();
        assert_eq!(source.mesh(GeometryKind::Sphere, 0).triangle_count(), 8);
        assert!(source.mesh(GeometryKind::Sphere, 5).triangle_count() > 8);
        assert_eq!(source.mesh(GeometryKind::Plane, 5).triangle_count(), 2);
        assert_eq!(source.calls(), 3);
    }
}
