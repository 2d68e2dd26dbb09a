//! Error handling for the lattice deformation engine
//!
//! Setup problems are reported through `DeformError` and then folded into a
//! per-target `TargetFault`, so a broken target never blocks the rest of a
//! frame.

use crate::gpu::BufferId;
use crate::mesh::{VertexAttribute, VertexFormat};
use crate::schedule::StageLabel;

/// Main error type for lattice deformation
#[derive(Debug, thiserror::Error)]
pub enum DeformError {
    // Setup Errors
    #[error("No source mesh available for '{target}'")]
    MissingSourceMesh { target: String },

    #[error("Mesh '{name}' is not readable. Enable read/write access on the source asset")]
    UnreadableMesh { name: String },

    #[error("Mesh '{name}' has no {attribute:?} attribute")]
    MissingAttribute {
        name: String,
        attribute: VertexAttribute,
    },

    #[error(
        "Attribute {attribute:?} of mesh '{name}' is misaligned (offset {offset}, stride {stride})"
    )]
    MisalignedAttribute {
        name: String,
        attribute: VertexAttribute,
        offset: u32,
        stride: u32,
    },

    #[error("Attribute {attribute:?} of mesh '{name}' uses unsupported format {format:?}")]
    UnsupportedFormat {
        name: String,
        attribute: VertexAttribute,
        format: VertexFormat,
    },

    #[error("Mesh '{name}' vertex data is {actual} bytes, layout requires {expected}")]
    VertexDataSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Lattice has {handles} handles but the shared upload buffer holds {capacity}")]
    HandleCapacityExceeded { handles: usize, capacity: usize },

    // Device Errors
    #[error("Buffer {0:?} is not allocated")]
    BufferNotFound(BufferId),

    #[error("Write of {len} bytes at offset {offset} overflows buffer {id:?} of {size} bytes")]
    BufferOverflow {
        id: BufferId,
        offset: u64,
        len: u64,
        size: u64,
    },

    #[error("Compute device lost")]
    DeviceLost,

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    // Scheduling Errors
    #[error("Stage {0:?} is not part of the frame schedule")]
    MissingStage(StageLabel),

    // Configuration Errors
    #[error("Invalid config field {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Results in the lattice engine
pub type DeformResult<T> = Result<T, DeformError>;

/// Why a target was excluded from dispatch
///
/// A faulted target stays excluded until it is re-activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFault {
    MissingSourceMesh,
    UnreadableMesh,
    InvalidLayout,
    HandleCapacityExceeded,
    DeviceFailure,
}

impl DeformError {
    /// Classify an error that stopped a target from deforming
    pub fn target_fault(&self) -> TargetFault {
        match self {
            DeformError::MissingSourceMesh { .. } => TargetFault::MissingSourceMesh,
            DeformError::UnreadableMesh { .. } => TargetFault::UnreadableMesh,
            DeformError::MissingAttribute { .. }
            | DeformError::MisalignedAttribute { .. }
            | DeformError::UnsupportedFormat { .. }
            | DeformError::VertexDataSize { .. } => TargetFault::InvalidLayout,
            DeformError::HandleCapacityExceeded { .. } => TargetFault::HandleCapacityExceeded,
            _ => TargetFault::DeviceFailure,
        }
    }
}

/// Convert Option to Result with a lazily built error
pub trait OptionExt<T> {
    fn ok_or_deform<F>(self, f: F) -> DeformResult<T>
    where
        F: FnOnce() -> DeformError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_deform<F>(self, f: F) -> DeformResult<T>
    where
        F: FnOnce() -> DeformError,
    {
        self.ok_or_else(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeformError::HandleCapacityExceeded {
            handles: 2000,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Lattice has 2000 handles but the shared upload buffer holds 1024"
        );
    }

    #[test]
    fn test_option_ext() {
        let opt: Option<i32> = None;
        let result = opt.ok_or_deform(|| DeformError::DeviceLost);
        assert!(matches!(result, Err(DeformError::DeviceLost)));
    }

    #[test]
    fn test_fault_classification() {
        let unreadable = DeformError::UnreadableMesh {
            name: "Cube".to_string(),
        };
        assert_eq!(unreadable.target_fault(), TargetFault::UnreadableMesh);

        let misaligned = DeformError::MisalignedAttribute {
            name: "Cube".to_string(),
            attribute: VertexAttribute::Normal,
            offset: 13,
            stride: 40,
        };
        assert_eq!(misaligned.target_fault(), TargetFault::InvalidLayout);
        assert_eq!(
            DeformError::DeviceLost.target_fault(),
            TargetFault::DeviceFailure
        );
    }
}
