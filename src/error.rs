//! Error types for the layout dispatch and iteration driver
//!
//! Every variant is fatal for the pass that raised it. The driver never
//! retries and never rolls back partially written data.

use std::fmt;

use crate::decomposition::SelectionError;
use crate::grid::SliceIndex;
use crate::store::StoreError;
use crate::timing::TimingError;
use crate::verify::VerifyError;

/// Invalid or unsupported run configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported dimensionality {0} (supported: 2, 3, 4)")]
    UnsupportedDimensionality(u8),

    #[error("unsupported slowest axis `{0}` (supported: step, array)")]
    UnsupportedAxis(String),

    #[error("{field} must be at least 1")]
    ZeroExtent { field: &'static str },

    #[error("strong scaling requires {extent_name}={extent} to be divisible by {grid_name}={grid}")]
    IndivisibleExtent {
        extent_name: &'static str,
        extent: u64,
        grid_name: &'static str,
        grid: u64,
    },

    #[error("process id {linear_id} outside a {proc_rows}x{proc_cols} process grid")]
    ProcessOutOfGrid {
        linear_id: u64,
        proc_rows: u64,
        proc_cols: u64,
    },

    #[error("the memory backend cannot be shared across child processes; use processing_mode: threads")]
    MemoryBackendInProcesses,

    #[error("dataset_path must not be empty")]
    EmptyDatasetPath,

    #[error("{quantity} overflows 64 bits")]
    ExtentOverflow { quantity: &'static str },
}

/// Object-management operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOp {
    CreateContainer,
    OpenContainer,
    CloseContainer,
    Create,
    Open,
    Close,
    AddressSpace,
    Release,
}

impl fmt::Display for ObjectOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectOp::CreateContainer => "create container",
            ObjectOp::OpenContainer => "open container",
            ObjectOp::CloseContainer => "close container",
            ObjectOp::Create => "create object",
            ObjectOp::Open => "open object",
            ObjectOp::Close => "close object",
            ObjectOp::AddressSpace => "get address space",
            ObjectOp::Release => "release selection",
        };
        f.write_str(s)
    }
}

/// Transfer direction of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Write,
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => f.write_str("write"),
            Direction::Read => f.write_str("read"),
        }
    }
}

/// Errors raised by a write or read pass
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{op} failed for `{path}` at {slice}: {source}")]
    ObjectLifecycle {
        op: ObjectOp,
        path: String,
        slice: SliceIndex,
        #[source]
        source: StoreError,
    },

    #[error("selection failed at {slice}: {source}")]
    Selection {
        slice: SliceIndex,
        #[source]
        source: SelectionError,
    },

    #[error("{direction} transfer failed at {slice}: {source}")]
    Transfer {
        direction: Direction,
        slice: SliceIndex,
        #[source]
        source: StoreError,
    },

    #[error("verification failed at {slice}: {source}")]
    VerificationMismatch {
        slice: SliceIndex,
        #[source]
        source: VerifyError,
    },

    #[error(transparent)]
    Timing(#[from] TimingError),
}

impl DriverError {
    /// Slice at which the pass aborted, if the failure is tied to one
    pub fn slice(&self) -> Option<SliceIndex> {
        match self {
            DriverError::ObjectLifecycle { slice, .. }
            | DriverError::Selection { slice, .. }
            | DriverError::Transfer { slice, .. }
            | DriverError::VerificationMismatch { slice, .. } => Some(*slice),
            DriverError::Configuration(_) | DriverError::Timing(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_error_names_operation_and_slice() {
        let err = DriverError::ObjectLifecycle {
            op: ObjectOp::Open,
            path: "array=1".to_string(),
            slice: SliceIndex::new(2, 1),
            source: StoreError::NotFound("array=1".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("open object"));
        assert!(msg.contains("array=1"));
        assert!(msg.contains("step=2"));
        assert_eq!(err.slice(), Some(SliceIndex::new(2, 1)));
    }

    #[test]
    fn test_config_error_has_no_slice() {
        let err = DriverError::from(ConfigError::UnsupportedDimensionality(1));
        assert!(err.to_string().contains("unsupported dimensionality 1"));
        assert_eq!(err.slice(), None);
    }
}
