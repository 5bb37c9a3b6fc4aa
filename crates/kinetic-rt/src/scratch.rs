//! Shared build scratch.

use crate::device::{AccelerationDevice, BufferDesc, BufferKind};
use crate::error::{Result, RtError};
use kinetic_core::math::align_up;

/// One scratch buffer reused by every build of a frame.
///
/// Builds run strictly one after another: [`Self::record`] hands the scratch
/// to a single build and records a build barrier before the next use.
pub struct SharedScratch<D: AccelerationDevice> {
    buffer: Option<D::Buffer>,
    size: u64,
    in_use: bool,
}

impl<D: AccelerationDevice> SharedScratch<D> {
    pub const fn new() -> Self {
        Self {
            buffer: None,
            size: 0,
            in_use: false,
        }
    }

    /// Allocated size in bytes; zero when unallocated.
    pub const fn size(&self) -> u64 {
        self.size
    }

    pub const fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Make the buffer exactly `required` bytes, rounded to the device
    /// scratch alignment. An equally sized buffer is kept.
    pub fn resize(&mut self, device: &mut D, required: u64) -> Result<()> {
        let alignment = u64::from(device.limits().scratch_alignment.max(1));
        let size = align_up(required.max(1), alignment);
        if self.buffer.is_some() && self.size == size {
            return Ok(());
        }

        self.release(device)?;
        self.buffer = Some(device.create_buffer(&BufferDesc {
            size,
            kind: BufferKind::Scratch,
            name: "acceleration_structure_scratch",
        })?);
        self.size = size;
        tracing::debug!(size, "scratch allocated");
        Ok(())
    }

    /// Run one build against the scratch, then record a build barrier.
    pub fn record<T>(
        &mut self,
        device: &mut D,
        cmd: D::CommandBuffer,
        build: impl FnOnce(&mut D, u64) -> Result<T>,
    ) -> Result<T> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or(RtError::NotInitialized("scratch buffer"))?;
        debug_assert!(!self.in_use, "scratch buffer used by two builds at once");

        let address = device.buffer_address(buffer);
        self.in_use = true;
        let result = build(device, address);
        device.record_build_barrier(cmd);
        self.in_use = false;
        result
    }

    /// Destroy the buffer. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) -> Result<()> {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer)?;
        }
        self.size = 0;
        Ok(())
    }
}

impl<D: AccelerationDevice> Default for SharedScratch<D> {
    fn default() -> Self {
        Self::new()
    }
}
