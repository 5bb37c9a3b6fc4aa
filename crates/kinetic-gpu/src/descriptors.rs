//! Descriptor slot allocation and descriptor writes.
//!
//! Shader-visible buffers are addressed through a bindless storage-buffer
//! array. [`DescriptorArena`] hands out stable slots in that array; the write
//! helpers below fill a slot once its buffer exists.

use crate::error::{GpuError, Result};
use ash::vk;

/// Stable handle to one slot of a [`DescriptorArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle(u32);

impl DescriptorHandle {
    /// Array element this handle refers to.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Handle `offset` slots after this one.
    #[inline]
    pub const fn offset(self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

/// Fixed-capacity arena of descriptor slots.
///
/// Allocation is first-fit, so releasing everything and replaying the same
/// allocation sequence yields the same handles.
#[derive(Debug, Clone)]
pub struct DescriptorArena {
    occupied: Vec<bool>,
    live: u32,
}

impl DescriptorArena {
    /// Create an arena with `capacity` slots.
    pub fn new(capacity: u32) -> Self {
        Self {
            occupied: vec![false; capacity as usize],
            live: 0,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.occupied.len() as u32
    }

    /// Number of slots currently allocated.
    pub fn live_count(&self) -> u32 {
        self.live
    }

    /// Whether `handle` is currently allocated.
    pub fn is_live(&self, handle: DescriptorHandle) -> bool {
        self.occupied
            .get(handle.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Allocate a single slot.
    pub fn allocate(&mut self) -> Result<DescriptorHandle> {
        self.allocate_contiguous(1)
    }

    /// Allocate `count` adjacent slots and return the first.
    pub fn allocate_contiguous(&mut self, count: u32) -> Result<DescriptorHandle> {
        let capacity = self.capacity();
        let exhausted = move || GpuError::DescriptorHeapExhausted {
            requested: count,
            capacity,
        };
        let count = count as usize;
        if count == 0 || count > self.occupied.len() {
            return Err(exhausted());
        }

        let start = (0..=self.occupied.len() - count)
            .find(|&start| self.occupied[start..start + count].iter().all(|&o| !o))
            .ok_or_else(exhausted)?;

        for slot in &mut self.occupied[start..start + count] {
            *slot = true;
        }
        self.live += count as u32;
        Ok(DescriptorHandle(start as u32))
    }

    /// Release a slot.
    pub fn release(&mut self, handle: DescriptorHandle) -> Result<()> {
        match self.occupied.get_mut(handle.0 as usize) {
            Some(slot) if *slot => {
                *slot = false;
                self.live -= 1;
                Ok(())
            }
            Some(_) => Err(GpuError::InvalidState(format!(
                "descriptor slot {} released twice",
                handle.0
            ))),
            None => Err(GpuError::ResourceNotFound(format!(
                "descriptor slot {} outside arena of {}",
                handle.0,
                self.capacity()
            ))),
        }
    }

    /// Release every slot.
    pub fn release_all(&mut self) {
        self.occupied.fill(false);
        self.live = 0;
    }
}

/// Write one element of a storage buffer array.
///
/// # Safety
/// Device and buffer must be valid; the set must not be in use by the GPU.
pub unsafe fn write_storage_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    slot: DescriptorHandle,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .dst_array_element(slot.index())
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write an acceleration structure descriptor.
///
/// # Safety
/// Device and acceleration structure must be valid; the set must not be in use by the GPU.
pub unsafe fn write_acceleration_structure(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    acceleration_structure: vk::AccelerationStructureKHR,
) {
    let structures = [acceleration_structure];
    let mut as_info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
        .acceleration_structures(&structures);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .descriptor_count(1)
        .push_next(&mut as_info);

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_exhausted() {
        let mut arena = DescriptorArena::new(3);
        assert_eq!(arena.allocate().unwrap().index(), 0);
        assert_eq!(arena.allocate().unwrap().index(), 1);
        assert_eq!(arena.allocate().unwrap().index(), 2);
        assert!(matches!(
            arena.allocate(),
            Err(GpuError::DescriptorHeapExhausted {
                requested: 1,
                capacity: 3
            })
        ));
        assert_eq!(arena.live_count(), 3);
    }

    #[test]
    fn released_slots_are_reused_first_fit() {
        let mut arena = DescriptorArena::new(4);
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        let _c = arena.allocate().unwrap();
        arena.release(a).unwrap();
        arena.release(b).unwrap();
        assert_eq!(arena.allocate_contiguous(2).unwrap(), a);
        assert_eq!(arena.live_count(), 3);
    }

    #[test]
    fn contiguous_skips_fragmented_gaps() {
        let mut arena = DescriptorArena::new(5);
        let a = arena.allocate().unwrap();
        let _b = arena.allocate().unwrap();
        arena.release(a).unwrap();
        let pair = arena.allocate_contiguous(2).unwrap();
        assert_eq!(pair.index(), 2);
        assert!(arena.is_live(pair) && arena.is_live(pair.offset(1)));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut arena = DescriptorArena::new(2);
        let a = arena.allocate().unwrap();
        arena.release(a).unwrap();
        assert!(matches!(arena.release(a), Err(GpuError::InvalidState(_))));
        assert!(matches!(
            arena.release(DescriptorHandle(7)),
            Err(GpuError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn release_all_resets() {
        let mut arena = DescriptorArena::new(2);
        arena.allocate_contiguous(2).unwrap();
        arena.release_all();
        assert_eq!(arena.live_count(), 0);
        assert_eq!(arena.allocate().unwrap().index(), 0);
    }
}
