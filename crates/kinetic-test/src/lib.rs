//! Test harness for the Kinetic acceleration structure engine.
//!
//! Provides a recording device, fixture meshes and a scene harness that runs
//! whole frames headlessly.

pub mod fixtures;
pub mod harness;
pub mod recording;

pub use fixtures::FixtureMeshes;
pub use harness::SceneHarness;
pub use recording::{Command, RecordedFrame, RecordingDevice};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Acceleration structure error: {0}")]
    Rt(#[from] kinetic_rt::RtError),
    #[error("Device rule violated: {0}")]
    Violation(String),
}

pub type Result<T> = std::result::Result<T, TestError>;
