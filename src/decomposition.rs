//! Decomposition engine: turns (process coordinate, slice) into a hyperslab
//!
//! The driver hands over the object's whole dataspace; the engine narrows it
//! to the block this process transfers for the slice.

use crate::config::RunConfig;
use crate::grid::{ProcessCoordinate, SliceIndex};
use crate::layout::Layout;
use crate::store::Dataspace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("selection has {found} dimensions, dataspace has {expected}")]
    RankMismatch { expected: usize, found: usize },

    #[error("dimension {dim}: start {start} + count {count} exceeds extent {extent}")]
    OutOfBounds { dim: usize, start: u64, count: u64, extent: u64 },
}

/// Region selection contract consumed by the iteration driver
pub trait Decomposition {
    /// Narrow `space` to this process's region of `slice`
    fn select_region(
        &self,
        config: &RunConfig,
        space: &mut Dataspace,
        coord: &ProcessCoordinate,
        slice: SliceIndex,
    ) -> Result<(), SelectionError>;
}

/// Regular block decomposition
///
/// Each process owns one `local_rows x local_cols` tile at
/// `(process_row * local_rows, process_col * local_cols)`. The leading
/// dimensions select exactly one slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockDecomposition;

impl BlockDecomposition {
    /// Start and count vectors for a slice, without touching a dataspace
    pub fn hyperslab(config: &RunConfig, coord: &ProcessCoordinate, slice: SliceIndex) -> (Vec<u64>, Vec<u64>) {
        let layout = Layout::for_run(config);
        let (local_rows, local_cols) = config.local_extent();

        let mut start = layout.leading_index(slice);
        let mut count = vec![1; start.len()];
        start.push(coord.process_row * local_rows);
        start.push(coord.process_col * local_cols);
        count.push(local_rows);
        count.push(local_cols);
        (start, count)
    }
}

impl Decomposition for BlockDecomposition {
    fn select_region(
        &self,
        config: &RunConfig,
        space: &mut Dataspace,
        coord: &ProcessCoordinate,
        slice: SliceIndex,
    ) -> Result<(), SelectionError> {
        let (start, count) = Self::hyperslab(config, coord, slice);
        space.select_hyperslab(&start, &count)
    }
}
