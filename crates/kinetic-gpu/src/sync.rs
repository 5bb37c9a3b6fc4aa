//! Synchronization primitives.

use crate::command::CommandPool;
use crate::error::Result;
use ash::vk;

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Per-frame recording resources.
pub struct FrameSync {
    /// Command buffer recorded for this frame slot.
    pub command_buffer: vk::CommandBuffer,
    /// Fence signaled when this slot's last submission completes.
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        Ok(Self {
            command_buffer: pool.allocate_command_buffer(device, vk::CommandBufferLevel::PRIMARY)?,
            in_flight: create_fence(device, true)?,
        })
    }

    /// Wait until the GPU has finished this slot's previous submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.in_flight, u64::MAX)
    }

    /// Reset the fence for the next submission.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        reset_fence(device, self.in_flight)
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.in_flight, None);
    }
}

/// Manages synchronization for multiple frames in flight.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        pool: &CommandPool,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let mut frame_syncs = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            frame_syncs.push(FrameSync::new(device, pool)?);
        }

        Ok(Self { frame_syncs })
    }

    /// Sync resources of a frame slot.
    pub fn frame(&self, frame_index: usize) -> &FrameSync {
        &self.frame_syncs[frame_index % self.frame_syncs.len()]
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.frame_syncs.len()
    }

    /// Wait for every frame slot to finish.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_all(&self, device: &ash::Device) -> Result<()> {
        let fences: Vec<vk::Fence> = self.frame_syncs.iter().map(|f| f.in_flight).collect();
        device.wait_for_fences(&fences, true, u64::MAX)?;
        Ok(())
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.frame_syncs {
            sync.destroy(device);
        }
    }
}
