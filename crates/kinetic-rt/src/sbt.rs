//! Shader dispatch table.
//!
//! The table is one buffer holding three linear sub-tables:
//! - Ray generation: one record
//! - Miss: one record per ray type
//! - Hit groups: one record per (geometry kind, ray type), ray type innermost
//!
//! Hit records carry the material constants of their geometry kind as root
//! arguments. An instance selects its records through the hit group offset
//! `kind * RayType::COUNT`; shaders add the ray type and trace with a zero
//! geometry stride, so every geometry of an instance shares its records.

use kinetic_core::math::align_up;
use kinetic_core::{GeometryKind, MaterialConstants, RayType};

use crate::device::{
    AccelerationDevice, BufferDesc, BufferKind, DeviceLimits, DispatchRays, ShaderTableRegion,
};
use crate::error::{Result, RtError};

/// Record stride applied per geometry index by shaders.
pub const GEOMETRY_CONTRIBUTION_STRIDE: u32 = 0;

/// Hit group record index traced for `kind` and `ray`.
#[inline]
pub const fn hit_group_index(kind: GeometryKind, ray: RayType) -> u32 {
    kind.hit_group_base() + ray.index() as u32
}

/// Shader group identifiers of the external ray tracing pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderIdentifiers {
    pub ray_generation: Vec<u8>,
    /// Indexed by [`RayType::index`].
    pub miss: [Vec<u8>; RayType::COUNT],
    /// Triangle hit group per ray type, indexed by [`RayType::index`].
    pub hit_groups: [Vec<u8>; RayType::COUNT],
}

impl ShaderIdentifiers {
    /// Split `handles`, as returned for a pipeline whose groups are ordered
    /// ray generation, miss per ray type, hit group per ray type.
    pub fn from_group_handles(handles: &[u8], handle_size: usize) -> Result<Self> {
        let expected = (1 + 2 * RayType::COUNT) * handle_size;
        if handle_size == 0 || handles.len() < expected {
            return Err(RtError::InvalidConfig(format!(
                "{} bytes of shader group handles, expected {expected}",
                handles.len()
            )));
        }
        let mut chunks = handles.chunks_exact(handle_size).map(<[u8]>::to_vec);
        let mut next = || chunks.next().unwrap_or_default();
        let ray_generation = next();
        let miss = std::array::from_fn(|_| next());
        let hit_groups = std::array::from_fn(|_| next());
        Ok(Self {
            ray_generation,
            miss,
            hit_groups,
        })
    }
}

/// One shader record: identifier followed by optional root arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderRecord {
    pub identifier: Vec<u8>,
    pub root_arguments: Vec<u8>,
}

impl ShaderRecord {
    pub fn new(identifier: Vec<u8>) -> Self {
        Self {
            identifier,
            root_arguments: Vec::new(),
        }
    }

    pub fn with_root_arguments(mut self, arguments: &[u8]) -> Self {
        self.root_arguments = arguments.to_vec();
        self
    }

    pub fn size(&self) -> usize {
        self.identifier.len() + self.root_arguments.len()
    }
}

/// A linear table of equally strided records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderTable {
    records: Vec<ShaderRecord>,
    stride: u64,
}

impl ShaderTable {
    /// Lay out `records` with stride `align_up(largest record, alignment)`.
    pub fn new(records: Vec<ShaderRecord>, record_alignment: u32) -> Self {
        let largest = records.iter().map(ShaderRecord::size).max().unwrap_or(0);
        let stride = align_up(largest as u64, u64::from(record_alignment.max(1)));
        Self { records, stride }
    }

    pub fn records(&self) -> &[ShaderRecord] {
        &self.records
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Byte size of the whole table.
    pub fn size(&self) -> u64 {
        self.stride * self.records.len() as u64
    }

    fn write_into(&self, bytes: &mut [u8]) {
        for (i, record) in self.records.iter().enumerate() {
            let start = i * self.stride as usize;
            let id_end = start + record.identifier.len();
            bytes[start..id_end].copy_from_slice(&record.identifier);
            bytes[id_end..id_end + record.root_arguments.len()]
                .copy_from_slice(&record.root_arguments);
        }
    }
}

/// The three tables and their placement in one buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderTableLayout {
    pub ray_generation: ShaderTable,
    pub miss: ShaderTable,
    pub hit_group: ShaderTable,
    pub miss_offset: u64,
    pub hit_group_offset: u64,
    pub total_size: u64,
}

impl ShaderTableLayout {
    /// Build the tables for `identifiers` under the device's alignment rules.
    pub fn new(identifiers: &ShaderIdentifiers, limits: &DeviceLimits) -> Result<Self> {
        let handle_size = limits.shader_group_handle_size as usize;
        let all = std::iter::once(&identifiers.ray_generation)
            .chain(&identifiers.miss)
            .chain(&identifiers.hit_groups);
        for identifier in all {
            if identifier.len() != handle_size {
                return Err(RtError::InvalidConfig(format!(
                    "shader identifier of {} bytes, device handles are {handle_size}",
                    identifier.len()
                )));
            }
        }

        let record_alignment = limits.shader_group_handle_alignment;
        let base_alignment = u64::from(limits.shader_group_base_alignment.max(1));

        let ray_generation = ShaderTable::new(
            vec![ShaderRecord::new(identifiers.ray_generation.clone())],
            record_alignment,
        );

        let miss = ShaderTable::new(
            RayType::ALL
                .iter()
                .map(|ray| ShaderRecord::new(identifiers.miss[ray.index()].clone()))
                .collect(),
            record_alignment,
        );

        let mut hit_records = Vec::with_capacity(GeometryKind::COUNT * RayType::COUNT);
        for kind in GeometryKind::ALL {
            let material = MaterialConstants::for_kind(kind);
            for ray in RayType::ALL {
                hit_records.push(
                    ShaderRecord::new(identifiers.hit_groups[ray.index()].clone())
                        .with_root_arguments(bytemuck::bytes_of(&material)),
                );
            }
        }
        let hit_group = ShaderTable::new(hit_records, record_alignment);

        let miss_offset = align_up(ray_generation.size(), base_alignment);
        let hit_group_offset = align_up(miss_offset + miss.size(), base_alignment);
        let total_size = hit_group_offset + hit_group.size();

        Ok(Self {
            ray_generation,
            miss,
            hit_group,
            miss_offset,
            hit_group_offset,
            total_size,
        })
    }

    /// Serialize every table at its offset.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.total_size as usize];
        self.ray_generation.write_into(&mut bytes);
        self.miss
            .write_into(&mut bytes[self.miss_offset as usize..]);
        self.hit_group
            .write_into(&mut bytes[self.hit_group_offset as usize..]);
        bytes
    }
}

/// Shader dispatch table uploaded to the device.
pub struct ShaderDispatchTable<D: AccelerationDevice> {
    buffer: Option<D::Buffer>,
    layout: ShaderTableLayout,
    ray_generation: ShaderTableRegion,
    miss: ShaderTableRegion,
    hit_group: ShaderTableRegion,
}

impl<D: AccelerationDevice> ShaderDispatchTable<D> {
    /// Lay out and upload the tables.
    pub fn upload(device: &mut D, identifiers: &ShaderIdentifiers) -> Result<Self> {
        let layout = ShaderTableLayout::new(identifiers, &device.limits())?;

        let buffer = device.create_buffer(&BufferDesc {
            size: layout.total_size,
            kind: BufferKind::ShaderTable,
            name: "shader_dispatch_table",
        })?;
        device.write_buffer(&buffer, 0, &layout.to_bytes())?;
        let base = device.buffer_address(&buffer);

        // Ray generation size must equal its stride
        let ray_generation = ShaderTableRegion {
            address: base,
            size: layout.ray_generation.stride(),
            stride: layout.ray_generation.stride(),
        };
        let miss = ShaderTableRegion {
            address: base + layout.miss_offset,
            size: layout.miss.size(),
            stride: layout.miss.stride(),
        };
        let hit_group = ShaderTableRegion {
            address: base + layout.hit_group_offset,
            size: layout.hit_group.size(),
            stride: layout.hit_group.stride(),
        };

        tracing::info!(
            size = layout.total_size,
            miss_stride = miss.stride,
            hit_group_stride = hit_group.stride,
            "shader dispatch table uploaded"
        );

        Ok(Self {
            buffer: Some(buffer),
            layout,
            ray_generation,
            miss,
            hit_group,
        })
    }

    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    pub fn ray_generation_region(&self) -> ShaderTableRegion {
        self.ray_generation
    }

    pub fn miss_region(&self) -> ShaderTableRegion {
        self.miss
    }

    pub fn hit_group_region(&self) -> ShaderTableRegion {
        self.hit_group
    }

    /// Dispatch of `width` x `height` rays against these tables.
    pub fn dispatch(&self, width: u32, height: u32) -> DispatchRays {
        DispatchRays {
            ray_generation: self.ray_generation,
            miss: self.miss,
            hit_group: self.hit_group,
            width,
            height,
        }
    }

    /// Destroy the buffer. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            scratch_alignment: 128,
        }
    }

    fn identifiers() -> ShaderIdentifiers {
        let id = |tag: u8| vec![tag; 32];
        ShaderIdentifiers {
            ray_generation: id(1),
            miss: [id(2), id(3)],
            hit_groups: [id(4), id(5)],
        }
    }

    #[test]
    fn hit_group_addressing() {
        assert_eq!(hit_group_index(GeometryKind::Plane, RayType::Primary), 0);
        assert_eq!(hit_group_index(GeometryKind::Plane, RayType::Shadow), 1);
        assert_eq!(hit_group_index(GeometryKind::Sphere, RayType::Primary), 2);
        assert_eq!(hit_group_index(GeometryKind::Sphere, RayType::Shadow), 3);
    }

    #[test]
    fn strides_and_offsets_are_aligned() {
        let layout = ShaderTableLayout::new(&identifiers(), &limits()).unwrap();

        assert_eq!(layout.ray_generation.stride(), 32);
        assert_eq!(layout.miss.stride(), 32);
        // 32-byte identifier + 48-byte material, rounded to 32
        assert_eq!(layout.hit_group.stride(), 96);
        assert_eq!(layout.hit_group.len(), GeometryKind::COUNT * RayType::COUNT);

        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.hit_group_offset, 128);
        assert_eq!(layout.miss_offset % 64, 0);
        assert_eq!(layout.hit_group_offset % 64, 0);
        assert_eq!(layout.total_size, 128 + 4 * 96);
    }

    #[test]
    fn hit_records_are_ray_type_innermost() {
        let layout = ShaderTableLayout::new(&identifiers(), &limits()).unwrap();
        let bytes = layout.to_bytes();
        let stride = layout.hit_group.stride() as usize;

        for kind in GeometryKind::ALL {
            for ray in RayType::ALL {
                let start =
                    layout.hit_group_offset as usize + hit_group_index(kind, ray) as usize * stride;
                assert_eq!(bytes[start], 4 + ray.index() as u8);
                let material = MaterialConstants::for_kind(kind);
                assert_eq!(
                    &bytes[start + 32..start + 32 + 48],
                    bytemuck::bytes_of(&material)
                );
            }
        }
    }

    #[test]
    fn miss_records_follow_ray_types() {
        let layout = ShaderTableLayout::new(&identifiers(), &limits()).unwrap();
        let bytes = layout.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[layout.miss_offset as usize], 2);
        assert_eq!(bytes[layout.miss_offset as usize + 32], 3);
    }

    #[test]
    fn wrong_identifier_size_is_rejected() {
        let mut ids = identifiers();
        ids.miss[1] = vec![0; 16];
        assert!(matches!(
            ShaderTableLayout::new(&ids, &limits()),
            Err(RtError::InvalidConfig(_))
        ));
    }

    #[test]
    fn group_handles_are_split_in_pipeline_order() {
        let handles: Vec<u8> = (1..=5u8).flat_map(|tag| vec![tag; 8]).collect();
        let ids = ShaderIdentifiers::from_group_handles(&handles, 8).unwrap();
        assert_eq!(ids.ray_generation, vec![1; 8]);
        assert_eq!(ids.miss, [vec![2; 8], vec![3; 8]]);
        assert_eq!(ids.hit_groups, [vec![4; 8], vec![5; 8]]);
        assert!(ShaderIdentifiers::from_group_handles(&handles[..16], 8).is_err());
    }
}
