//! Layout strategy selector
//!
//! Maps the logical `{step, array, row, col}` index space onto storage
//! objects. The dimensionality picks the lifecycle class and the slowest axis
//! picks the nesting order:
//!
//! | dimensionality | slowest | lifecycle    | object path          |
//! |----------------|---------|--------------|----------------------|
//! | 4              | any     | Flat         | `dataset`            |
//! | 3              | step    | PerStep      | `step=<s>`           |
//! | 3              | array   | PerArray     | `array=<a>`          |
//! | 2              | step    | PerStepArray | `step=<s>/array=<a>` |
//! | 2              | array   | PerStepArray | `array=<a>/step=<s>` |
//!
//! These paths are the persisted layout and must not change.

use std::fmt;

use crate::config::{Axis, Dimensionality, RunConfig};
use crate::constants::FLAT_OBJECT_NAME;
use crate::error::Direction;
use crate::grid::SliceIndex;

/// How long one storage object lives relative to the step x array loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// One object for the whole pass
    Flat,
    /// One object per step, shared by all arrays of that step
    PerStep,
    /// One object per array; created on step 0, reopened on later steps
    PerArray,
    /// One object per (step, array), opened and closed every iteration
    PerStepArray,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Flat => "flat",
            Lifecycle::PerStep => "per-step",
            Lifecycle::PerArray => "per-array",
            Lifecycle::PerStepArray => "per-step-array",
        };
        f.write_str(s)
    }
}

/// What the driver must do to hold the slice's object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Create,
    Open,
    /// The handle from the previous iteration is still open
    Reuse,
}

/// Resolved decision for one slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPlan {
    pub lifecycle: Lifecycle,
    pub path: String,
    pub acquire: Acquire,
    pub close_after: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Flat { slowest: Axis },
    PerStep,
    PerArray,
    PerStepArray { slowest: Axis },
}

impl Layout {
    pub fn new(dimensionality: Dimensionality, slowest: Axis) -> Self {
        match (dimensionality, slowest) {
            (Dimensionality::Four, slowest) => Layout::Flat { slowest },
            (Dimensionality::Three, Axis::Step) => Layout::PerStep,
            (Dimensionality::Three, Axis::Array) => Layout::PerArray,
            (Dimensionality::Two, slowest) => Layout::PerStepArray { slowest },
        }
    }

    pub fn for_run(config: &RunConfig) -> Self {
        Self::new(config.dimensionality, config.slowest_axis)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            Layout::Flat { .. } => Lifecycle::Flat,
            Layout::PerStep => Lifecycle::PerStep,
            Layout::PerArray => Lifecycle::PerArray,
            Layout::PerStepArray { .. } => Lifecycle::PerStepArray,
        }
    }

    pub fn object_path(&self, slice: SliceIndex) -> String {
        match self {
            Layout::Flat { .. } => FLAT_OBJECT_NAME.to_string(),
            Layout::PerStep => format!("step={}", slice.step),
            Layout::PerArray => format!("array={}", slice.array),
            Layout::PerStepArray { slowest: Axis::Step } => {
                format!("step={}/array={}", slice.step, slice.array)
            }
            Layout::PerStepArray { slowest: Axis::Array } => {
                format!("array={}/step={}", slice.array, slice.step)
            }
        }
    }

    /// True when this slice is the first one ever to touch its object
    pub fn first_visit(&self, slice: SliceIndex) -> bool {
        match self {
            Layout::Flat { .. } => slice.step == 0 && slice.array == 0,
            Layout::PerStep => slice.array == 0,
            Layout::PerArray => slice.step == 0,
            Layout::PerStepArray { .. } => true,
        }
    }

    /// True when the object is not already open from the previous iteration
    fn needs_acquire(&self, slice: SliceIndex) -> bool {
        match self {
            Layout::Flat { .. } => slice.step == 0 && slice.array == 0,
            Layout::PerStep => slice.array == 0,
            Layout::PerArray | Layout::PerStepArray { .. } => true,
        }
    }

    pub fn acquire(&self, slice: SliceIndex, direction: Direction) -> Acquire {
        if !self.needs_acquire(slice) {
            return Acquire::Reuse;
        }
        match direction {
            Direction::Read => Acquire::Open,
            Direction::Write if self.first_visit(slice) => Acquire::Create,
            Direction::Write => Acquire::Open,
        }
    }

    /// True when the object must be closed once this slice is done
    pub fn closes_after(&self, slice: SliceIndex, steps: u64, arrays: u64) -> bool {
        let last_array = slice.array + 1 == arrays;
        match self {
            Layout::Flat { .. } => last_array && slice.step + 1 == steps,
            Layout::PerStep => last_array,
            Layout::PerArray | Layout::PerStepArray { .. } => true,
        }
    }

    pub fn plan(&self, slice: SliceIndex, direction: Direction, steps: u64, arrays: u64) -> ObjectPlan {
        ObjectPlan {
            lifecycle: self.lifecycle(),
            path: self.object_path(slice),
            acquire: self.acquire(slice, direction),
            close_after: self.closes_after(slice, steps, arrays),
        }
    }

    /// Shape of every object of this layout
    pub fn object_shape(&self, config: &RunConfig) -> Vec<u64> {
        let (rows, cols) = config.global_extent();
        match self {
            Layout::Flat { slowest: Axis::Step } => vec![config.steps, config.arrays, rows, cols],
            Layout::Flat { slowest: Axis::Array } => vec![config.arrays, config.steps, rows, cols],
            Layout::PerStep => vec![config.arrays, rows, cols],
            Layout::PerArray => vec![config.steps, rows, cols],
            Layout::PerStepArray { .. } => vec![rows, cols],
        }
    }

    /// Index of the slice along the object's leading (non row/col) dimensions
    pub fn leading_index(&self, slice: SliceIndex) -> Vec<u64> {
        match self {
            Layout::Flat { slowest: Axis::Step } => vec![slice.step, slice.array],
            Layout::Flat { slowest: Axis::Array } => vec![slice.array, slice.step],
            Layout::PerStep => vec![slice.array],
            Layout::PerArray => vec![slice.step],
            Layout::PerStepArray { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Flat { slowest } => write!(f, "flat 4D ({}-major)", slowest),
            Layout::PerStep => f.write_str("3D dataset per step"),
            Layout::PerArray => f.write_str("3D dataset per array"),
            Layout::PerStepArray { slowest } => write!(f, "2D dataset per step and array ({} groups)", slowest),
        }
    }
}
