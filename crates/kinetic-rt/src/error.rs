//! Error types for acceleration structure management.

use kinetic_gpu::GpuError;
use thiserror::Error;

/// Errors raised while building, updating or dispatching against
/// acceleration structures.
#[derive(Error, Debug)]
pub enum RtError {
    /// Device-level failure.
    #[error("GPU error: {0}")]
    Gpu(#[source] GpuError),

    /// Engine-level failure (invalid mesh, configuration out of range).
    #[error(transparent)]
    Core(#[from] kinetic_core::Error),

    /// No free descriptor slots remain.
    #[error("Descriptor heap exhausted: {requested} slot(s) requested, capacity {capacity}")]
    DescriptorHeapExhausted { requested: u32, capacity: u32 },

    /// A resource was used before it was initialized or after it was released.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Configuration rejected at runtime.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<GpuError> for RtError {
    fn from(err: GpuError) -> Self {
        match err {
            GpuError::DescriptorHeapExhausted { requested, capacity } => {
                Self::DescriptorHeapExhausted {
                    requested,
                    capacity,
                }
            }
            other => Self::Gpu(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_exhaustion_is_lifted() {
        let err: RtError = GpuError::DescriptorHeapExhausted {
            requested: 2,
            capacity: 8,
        }
        .into();
        assert!(matches!(
            err,
            RtError::DescriptorHeapExhausted {
                requested: 2,
                capacity: 8
            }
        ));
    }

    #[test]
    fn other_gpu_errors_are_wrapped() {
        let err: RtError = GpuError::NoSuitableDevice.into();
        assert!(matches!(err, RtError::Gpu(GpuError::NoSuitableDevice)));
    }
}
