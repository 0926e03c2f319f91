//! Process grid coordinates and logical slice indices

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Position of one process in the logical 2D process grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCoordinate {
    pub process_row: u64,
    pub process_col: u64,
    pub linear_id: u64,
    pub total_processes: u64,
}

impl ProcessCoordinate {
    /// Derive grid coordinates from a linear process id (row-major grid)
    pub fn from_linear(linear_id: u64, proc_rows: u64, proc_cols: u64) -> Result<Self, ConfigError> {
        if proc_rows == 0 {
            return Err(ConfigError::ZeroExtent { field: "proc_rows" });
        }
        if proc_cols == 0 {
            return Err(ConfigError::ZeroExtent { field: "proc_cols" });
        }
        let total_processes = proc_rows * proc_cols;
        if linear_id >= total_processes {
            return Err(ConfigError::ProcessOutOfGrid { linear_id, proc_rows, proc_cols });
        }
        Ok(Self {
            process_row: linear_id / proc_cols,
            process_col: linear_id % proc_cols,
            linear_id,
            total_processes,
        })
    }

    /// The coordinate of a single-process run
    pub fn single() -> Self {
        Self { process_row: 0, process_col: 0, linear_id: 0, total_processes: 1 }
    }
}

/// Logical coordinate of one 2D slice of the 4D dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceIndex {
    pub step: u64,
    pub array: u64,
}

impl SliceIndex {
    pub fn new(step: u64, array: u64) -> Self {
        Self { step, array }
    }
}

impl fmt::Display for SliceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(step={}, array={})", self.step, self.array)
    }
}

/// Row-major walk over all slices: step outer, array inner
pub fn slices(steps: u64, arrays: u64) -> impl Iterator<Item = SliceIndex> {
    (0..steps).flat_map(move |step| (0..arrays).map(move |array| SliceIndex::new(step, array)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_linear_row_major() {
        let c = ProcessCoordinate::from_linear(5, 2, 3).unwrap();
        assert_eq!(c.process_row, 1);
        assert_eq!(c.process_col, 2);
        assert_eq!(c.total_processes, 6);

        let c = ProcessCoordinate::from_linear(0, 2, 3).unwrap();
        assert_eq!((c.process_row, c.process_col), (0, 0));
    }

    #[test]
    fn test_from_linear_out_of_grid() {
        let err = ProcessCoordinate::from_linear(4, 2, 2).unwrap_err();
        assert_eq!(err, ConfigError::ProcessOutOfGrid { linear_id: 4, proc_rows: 2, proc_cols: 2 });
    }

    #[test]
    fn test_slices_order() {
        let order: Vec<_> = slices(2, 2).collect();
        assert_eq!(
            order,
            vec![
                SliceIndex::new(0, 0),
                SliceIndex::new(0, 1),
                SliceIndex::new(1, 0),
                SliceIndex::new(1, 1),
            ]
        );
        assert_eq!(slices(0, 5).count(), 0);
    }
}
