//! Frame scheduling over a fixed ring of in-flight frames.

use kinetic_core::constants::FRAME_COUNT;

use crate::device::AccelerationDevice;
use crate::error::Result;
use crate::geometry::GeometrySource;
use crate::manager::{AccelerationStructureManager, FrameBuildReport};
use crate::sbt::ShaderDispatchTable;

/// Where a frame's rays are dispatched.
pub struct TraceTarget<'a, D: AccelerationDevice> {
    pub table: &'a ShaderDispatchTable<D>,
    pub width: u32,
    pub height: u32,
}

/// What one frame recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_index: usize,
    pub frame_number: u64,
    pub reinitialized: bool,
    pub builds: FrameBuildReport,
    pub traced: bool,
}

/// Drives one frame at a time:
///
/// 1. wait for the frame slot and begin its command buffer
/// 2. service reinitialization requests
/// 3. record structure builds
/// 4. barrier, then ray dispatch
/// 5. submit and advance to the next slot
pub struct FrameScheduler {
    frame_index: usize,
    frame_count: usize,
    frames_submitted: u64,
}

impl FrameScheduler {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_index: 0,
            frame_count: frame_count.max(1),
            frames_submitted: 0,
        }
    }

    /// Slot the next frame records into.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Record and submit one frame.
    ///
    /// Without a `target`, or before any top-level structure exists, the
    /// frame only carries builds.
    pub fn run_frame<D: AccelerationDevice>(
        &mut self,
        device: &mut D,
        manager: &mut AccelerationStructureManager<D>,
        source: &mut dyn GeometrySource,
        target: Option<&TraceTarget<'_, D>>,
    ) -> Result<FrameReport> {
        let frame_index = self.frame_index;
        let cmd = device.begin_frame(frame_index)?;

        let reinitialized = manager.prepare_frame(device, source)?;
        let builds = manager.update(device, cmd, frame_index)?;

        let traced = match target {
            Some(target) if manager.top_level().is_some() => {
                device.record_trace_barrier(cmd);
                device.record_trace_rays(cmd, &target.table.dispatch(target.width, target.height))?;
                true
            }
            _ => false,
        };

        device.submit_frame(frame_index, cmd)?;

        let report = FrameReport {
            frame_index,
            frame_number: self.frames_submitted,
            reinitialized,
            builds,
            traced,
        };
        tracing::trace!(?report, "frame submitted");

        self.frames_submitted += 1;
        self.frame_index = (frame_index + 1) % self.frame_count;
        Ok(report)
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(FRAME_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_first_slot() {
        let scheduler = FrameScheduler::default();
        assert_eq!(scheduler.frame_index(), 0);
        assert_eq!(scheduler.frame_count(), FRAME_COUNT);
        assert_eq!(scheduler.frames_submitted(), 0);
    }

    #[test]
    fn zero_frames_means_one() {
        assert_eq!(FrameScheduler::new(0).frame_count(), 1);
    }
}
