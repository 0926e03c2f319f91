//! Deterministic buffer fill and check
//!
//! Every element written for a slice carries its own C-order linear index in
//! the logical 4D array, so a read can be checked without keeping the
//! written data around.
//!
//! The C-order index of `[i0, i1, i2, i3]` in extents `[D0, D1, D2, D3]` is
//! `((i0*D1 + i1)*D2 + i2)*D3 + i3`.

use crate::config::{Axis, RunConfig, Scaling};
use crate::grid::{ProcessCoordinate, SliceIndex};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("element {index}: expected {expected}, found {found}")]
    Mismatch { index: usize, expected: f64, found: f64 },

    #[error("buffer holds {found} elements, expected {expected}")]
    Length { expected: usize, found: usize },
}

/// Extents and partition offsets of the logical 4D array for one slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalFrame {
    pub extents: [u64; 4],
    pub offsets: [u64; 4],
}

impl LogicalFrame {
    pub fn new(config: &RunConfig, coord: &ProcessCoordinate, slice: SliceIndex) -> Self {
        let (d0, d1, o0, o1) = match config.slowest_axis {
            Axis::Step => (config.steps, config.arrays, slice.step, slice.array),
            Axis::Array => (config.arrays, config.steps, slice.array, slice.step),
        };
        let (local_rows, local_cols) = config.local_extent();
        let (d2, d3, o2, o3) = match config.scaling {
            Scaling::Strong => (
                config.rows,
                config.cols,
                coord.linear_id * local_rows,
                coord.linear_id * local_cols,
            ),
            Scaling::Weak => (
                config.rows * config.proc_rows,
                config.cols * config.proc_cols,
                coord.process_row * config.rows,
                coord.process_col * config.cols,
            ),
        };
        Self { extents: [d0, d1, d2, d3], offsets: [o0, o1, o2, o3] }
    }

    pub fn linear_index(&self, i0: u64, i1: u64, i2: u64, i3: u64) -> u64 {
        let [_, d1, d2, d3] = self.extents;
        ((i0 * d1 + i1) * d2 + i2) * d3 + i3
    }

    /// Expected value of local cell `(i, j)`
    fn expected(&self, i: u64, j: u64) -> f64 {
        let [o0, o1, o2, o3] = self.offsets;
        self.linear_index(o0, o1, o2 + i, o3 + j) as f64
    }
}

/// Write the expected values of one slice into `buf`
pub fn fill_buffer(buf: &mut [f64], local_rows: u64, local_cols: u64, frame: &LogicalFrame) -> Result<(), VerifyError> {
    check_len(buf.len(), local_rows, local_cols)?;
    for i in 0..local_rows {
        for j in 0..local_cols {
            buf[(i * local_cols + j) as usize] = frame.expected(i, j);
        }
    }
    Ok(())
}

fn check_len(found: usize, local_rows: u64, local_cols: u64) -> Result<(), VerifyError> {
    let expected = (local_rows * local_cols) as usize;
    if found != expected {
        return Err(VerifyError::Length { expected, found });
    }
    Ok(())
}

/// Compare `buf` against the values [`fill_buffer`] would have written
pub fn check_buffer(buf: &[f64], local_rows: u64, local_cols: u64, frame: &LogicalFrame) -> Result<(), VerifyError> {
    check_len(buf.len(), local_rows, local_cols)?;
    for i in 0..local_rows {
        for j in 0..local_cols {
            let index = (i * local_cols + j) as usize;
            let expected = frame.expected(i, j);
            let found = buf[index];
            if found != expected {
                return Err(VerifyError::Mismatch { index, expected, found });
            }
        }
    }
    Ok(())
}

/// Buffer contents used when verification is off
pub fn constant_fill(buf: &mut [f64], coord: &ProcessCoordinate) {
    buf.fill((coord.process_row + coord.process_col) as f64);
}
