//! Headless scene harness: a recording device driving the full frame loop.

use kinetic_core::SceneConfig;
use kinetic_rt::{
    AccelerationStructureManager, FrameReport, FrameScheduler, ShaderDispatchTable, TraceTarget,
};

use crate::fixtures::FixtureMeshes;
use crate::recording::{RecordedFrame, RecordingDevice};
use crate::{Result, TestError};

pub const DEFAULT_WIDTH: u32 = 64;
pub const DEFAULT_HEIGHT: u32 = 32;

/// Manager, scheduler and dispatch table over a [`RecordingDevice`].
pub struct SceneHarness {
    pub device: RecordingDevice,
    pub manager: AccelerationStructureManager<RecordingDevice>,
    pub scheduler: FrameScheduler,
    pub meshes: FixtureMeshes,
    table: ShaderDispatchTable<RecordingDevice>,
    width: u32,
    height: u32,
}

impl SceneHarness {
    pub fn new(config: SceneConfig) -> Result<Self> {
        let mut device = RecordingDevice::new();
        let identifiers = device.shader_identifiers()?;
        let table = ShaderDispatchTable::upload(&mut device, &identifiers)?;

        Ok(Self {
            device,
            manager: AccelerationStructureManager::new(config),
            scheduler: FrameScheduler::default(),
            meshes: FixtureMeshes::new(),
            table,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        })
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn table(&self) -> &ShaderDispatchTable<RecordingDevice> {
        &self.table
    }

    /// Run one frame and fail on any device rule violation.
    pub fn run_frame(&mut self) -> Result<FrameReport> {
        let target = TraceTarget {
            table: &self.table,
            width: self.width,
            height: self.height,
        };
        let report = self.scheduler.run_frame(
            &mut self.device,
            &mut self.manager,
            &mut self.meshes,
            Some(&target),
        )?;

        if let Some(violation) = self.device.violations().first() {
            return Err(TestError::Violation(violation.clone()));
        }
        Ok(report)
    }

    pub fn run_frames(&mut self, count: usize) -> Result<Vec<FrameReport>> {
        (0..count).map(|_| self.run_frame()).collect()
    }

    /// Commands of the last submitted frame.
    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.device.last_frame()
    }

    /// Release every device resource, including the dispatch table.
    pub fn shutdown(mut self) -> Result<RecordingDevice> {
        self.manager.release_device_resources(&mut self.device)?;
        self.table.release(&mut self.device)?;
        Ok(self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_initializes_and_traces() {
        let mut harness = SceneHarness::new(SceneConfig::default()).unwrap();
        let report = harness.run_frame().unwrap();
        assert!(report.reinitialized);
        assert!(report.traced);
        assert!(harness.last_frame().unwrap().traced());
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut harness = SceneHarness::new(SceneConfig::default()).unwrap();
        harness.run_frames(2).unwrap();
        let device = harness.shutdown().unwrap();
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_structures(), 0);
    }
}
