//! Per-frame host-written buffers.

use std::marker::PhantomData;

use crate::device::{AccelerationDevice, BufferDesc, BufferKind};
use crate::error::{Result, RtError};

/// A host-visible buffer holding one region of `T`s per frame in flight.
///
/// The host writes the region of the frame being recorded while the GPU may
/// still read the regions of earlier frames.
pub struct FrameRing<D: AccelerationDevice, T> {
    buffer: D::Buffer,
    element_count: u32,
    frames: usize,
    _marker: PhantomData<T>,
}

impl<D: AccelerationDevice, T: bytemuck::Pod> FrameRing<D, T> {
    const ELEMENT_SIZE: u64 = std::mem::size_of::<T>() as u64;

    /// Create a ring of `frames` regions with `element_count` elements each.
    pub fn new(
        device: &mut D,
        element_count: u32,
        frames: usize,
        kind: BufferKind,
        name: &str,
    ) -> Result<Self> {
        if frames == 0 {
            return Err(RtError::InvalidConfig(format!(
                "{name}: frame ring needs at least one frame"
            )));
        }
        let region = Self::ELEMENT_SIZE * u64::from(element_count.max(1));
        let buffer = device.create_buffer(&BufferDesc {
            size: region * frames as u64,
            kind,
            name,
        })?;

        Ok(Self {
            buffer,
            element_count,
            frames,
            _marker: PhantomData,
        })
    }

    pub const fn element_count(&self) -> u32 {
        self.element_count
    }

    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Byte size of one frame's region.
    pub fn region_size(&self) -> u64 {
        Self::ELEMENT_SIZE * u64::from(self.element_count.max(1))
    }

    /// Byte offset of element `element` in the region of `frame_index`.
    pub fn offset_of(&self, frame_index: usize, element: u32) -> u64 {
        (frame_index % self.frames) as u64 * self.region_size()
            + u64::from(element) * Self::ELEMENT_SIZE
    }

    /// Device address of element `element` in the region of `frame_index`.
    pub fn address_of(&self, device: &D, frame_index: usize, element: u32) -> u64 {
        device.buffer_address(&self.buffer) + self.offset_of(frame_index, element)
    }

    /// Overwrite the region of `frame_index`.
    pub fn write(&self, device: &mut D, frame_index: usize, data: &[T]) -> Result<()> {
        if data.len() > self.element_count as usize {
            return Err(RtError::InvalidConfig(format!(
                "{} elements written to a frame ring of {}",
                data.len(),
                self.element_count
            )));
        }
        device.write_buffer(
            &self.buffer,
            self.offset_of(frame_index, 0),
            bytemuck::cast_slice(data),
        )
    }

    /// Destroy the buffer.
    pub fn release(self, device: &mut D) -> Result<()> {
        device.destroy_buffer(self.buffer)
    }
}
