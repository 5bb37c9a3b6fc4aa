//! Device-resident geometry.
//!
//! Geometry is produced by a [`GeometrySource`], uploaded once per geometry
//! initialization and replaced wholesale on the next one.

use crate::device::{AccelerationDevice, BufferDesc, BufferKind, TriangleGeometry};
use crate::error::Result;
use kinetic_core::math::align_up;
use kinetic_core::{GeometryKind, Index, MeshData, Vertex};
use kinetic_gpu::{DescriptorArena, DescriptorHandle};

/// Procedural mesh generator supplied by the application.
pub trait GeometrySource {
    /// Generate the mesh for `kind` at the given tessellation factor.
    fn mesh(&mut self, kind: GeometryKind, tessellation_factor: u32) -> MeshData;
}

/// Index and vertex buffers of one geometry kind, with their shader views.
///
/// The vertex view always occupies the slot right after the index view so
/// shaders can address both from a single base index.
pub struct GeometryBuffer<D: AccelerationDevice> {
    kind: GeometryKind,
    index_buffer: D::Buffer,
    vertex_buffer: D::Buffer,
    index_count: u32,
    vertex_count: u32,
    index_view: DescriptorHandle,
}

impl<D: AccelerationDevice> GeometryBuffer<D> {
    /// Upload `mesh` and expose it to shaders through two adjacent slots.
    pub fn upload(
        device: &mut D,
        arena: &mut DescriptorArena,
        kind: GeometryKind,
        mesh: &MeshData,
    ) -> Result<Self> {
        mesh.validate()?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);

        let index_size = index_buffer_size(mesh.indices.len());

        let index_buffer = device.create_buffer(&BufferDesc {
            size: index_size,
            kind: BufferKind::Geometry,
            name: "geometry_indices",
        })?;
        device.write_buffer(&index_buffer, 0, index_bytes)?;

        let vertex_buffer = device.create_buffer(&BufferDesc {
            size: vertex_bytes.len() as u64,
            kind: BufferKind::Geometry,
            name: "geometry_vertices",
        })?;
        device.write_buffer(&vertex_buffer, 0, vertex_bytes)?;

        let index_view = arena.allocate_contiguous(2)?;
        device.expose_buffer(index_view, &index_buffer)?;
        device.expose_buffer(index_view.offset(1), &vertex_buffer)?;

        tracing::debug!(
            ?kind,
            vertices = mesh.vertices.len(),
            indices = mesh.indices.len(),
            index_view = index_view.index(),
            "geometry uploaded"
        );

        Ok(Self {
            kind,
            index_buffer,
            vertex_buffer,
            index_count: mesh.indices.len() as u32,
            vertex_count: mesh.vertices.len() as u32,
            index_view,
        })
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    /// Descriptor slot of the index view.
    pub fn index_view(&self) -> DescriptorHandle {
        self.index_view
    }

    /// Descriptor slot of the vertex view.
    pub fn vertex_view(&self) -> DescriptorHandle {
        self.index_view.offset(1)
    }

    /// Build description of this geometry with the given transform address.
    pub fn triangles(&self, device: &D, transform_address: u64) -> TriangleGeometry {
        TriangleGeometry {
            vertex_address: device.buffer_address(&self.vertex_buffer),
            vertex_stride: Vertex::STRIDE,
            vertex_count: self.vertex_count,
            index_address: device.buffer_address(&self.index_buffer),
            index_count: self.index_count,
            transform_address,
        }
    }

    /// Destroy both buffers and return the view slots.
    pub fn release(self, device: &mut D, arena: &mut DescriptorArena) -> Result<()> {
        arena.release(self.index_view)?;
        arena.release(self.index_view.offset(1))?;
        device.destroy_buffer(self.index_buffer)?;
        device.destroy_buffer(self.vertex_buffer)?;
        Ok(())
    }
}

/// One [`GeometryBuffer`] per [`GeometryKind`].
pub struct GeometrySet<D: AccelerationDevice> {
    buffers: Vec<GeometryBuffer<D>>,
}

impl<D: AccelerationDevice> GeometrySet<D> {
    /// Generate and upload every geometry kind.
    pub fn build(
        device: &mut D,
        arena: &mut DescriptorArena,
        source: &mut dyn GeometrySource,
        tessellation_factor: u32,
    ) -> Result<Self> {
        let mut buffers = Vec::with_capacity(GeometryKind::COUNT);
        for kind in GeometryKind::ALL {
            let mesh = source.mesh(kind, tessellation_factor);
            match GeometryBuffer::upload(device, arena, kind, &mesh) {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    // Keep the arena and device consistent for the next attempt
                    for buffer in buffers {
                        buffer.release(device, arena)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self { buffers })
    }

    /// Geometry of `kind`.
    pub fn get(&self, kind: GeometryKind) -> &GeometryBuffer<D> {
        &self.buffers[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeometryBuffer<D>> {
        self.buffers.iter()
    }

    /// Destroy every geometry.
    pub fn release(self, device: &mut D, arena: &mut DescriptorArena) -> Result<()> {
        for buffer in self.buffers {
            buffer.release(device, arena)?;
        }
        Ok(())
    }
}

/// Size in bytes of an index buffer holding `count` indices.
///
/// 16-bit indices are read as raw 32-bit words by shaders, so the size is
/// padded to a multiple of four.
pub const fn index_buffer_size(count: usize) -> u64 {
    align_up((count * std::mem::size_of::<Index>()) as u64, 4)
}
