//! Storage backend contract and engines
//!
//! The driver only talks to [`ObjectStore`]. Handles are opaque ids owned by
//! the store that issued them; a handle from one store instance means nothing
//! to another, even when both share the same underlying data.
//!
//! Creation is collective: every process of the grid creates the same
//! container and the same objects, so `create_*` is idempotent for an
//! identical shape. Removing stale data is an explicit reset done once by the
//! coordinator before a run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::decomposition::SelectionError;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Handle of an open container (the file that holds all objects)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u64);

/// Handle of an open storage object (one dataset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("`{0}` not found")]
    NotFound(String),

    #[error("invalid handle {0}")]
    InvalidHandle(u64),

    #[error("unknown or already released selection {0}")]
    UnknownSpace(u64),

    #[error("`{0}` is open read-only")]
    ReadOnly(String),

    #[error("`{path}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        path: String,
        expected: Vec<u64>,
        found: Vec<u64>,
    },

    #[error("buffer holds {found} elements, selection needs {expected}")]
    BufferSize { expected: usize, found: usize },

    #[error("corrupt object header in `{path}`: {reason}")]
    CorruptHeader { path: String, reason: String },

    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}

/// Storage engine consumed by the iteration driver
///
/// All transfers are synchronous. Buffers are row-major and hold exactly the
/// selected elements of the dataspace, in row-major order.
pub trait ObjectStore {
    /// Backend name for logs and reports
    fn name(&self) -> &'static str;

    fn create_container(&mut self, path: &str) -> Result<ContainerId, StoreError>;
    fn open_container(&mut self, path: &str, mode: AccessMode) -> Result<ContainerId, StoreError>;
    fn close_container(&mut self, container: ContainerId) -> Result<(), StoreError>;

    /// Bytes occupied by everything in the container
    fn container_size(&self, container: ContainerId) -> Result<u64, StoreError>;

    fn create_object(&mut self, container: ContainerId, path: &str, shape: &[u64]) -> Result<ObjectId, StoreError>;
    fn open_object(&mut self, container: ContainerId, path: &str, mode: AccessMode) -> Result<ObjectId, StoreError>;
    fn close_object(&mut self, object: ObjectId) -> Result<(), StoreError>;

    /// Fresh descriptor of the object's whole address space
    fn address_space(&mut self, object: ObjectId) -> Result<Dataspace, StoreError>;
    fn release_space(&mut self, space: Dataspace) -> Result<(), StoreError>;

    fn write(&mut self, object: ObjectId, space: &Dataspace, buf: &[f64]) -> Result<(), StoreError>;
    fn read(&mut self, object: ObjectId, space: &Dataspace, buf: &mut [f64]) -> Result<(), StoreError>;
}

/// Address space of one object plus a rectangular selection within it
#[derive(Debug, PartialEq, Eq)]
pub struct Dataspace {
    id: u64,
    shape: Vec<u64>,
    start: Vec<u64>,
    count: Vec<u64>,
}

impl Dataspace {
    /// Descriptor with everything selected
    pub(crate) fn all(id: u64, shape: &[u64]) -> Self {
        Self {
            id,
            shape: shape.to_vec(),
            start: vec![0; shape.len()],
            count: shape.to_vec(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn start(&self) -> &[u64] {
        &self.start
    }

    pub fn count(&self) -> &[u64] {
        &self.count
    }

    /// Replace the selection with one hyperslab
    pub fn select_hyperslab(&mut self, start: &[u64], count: &[u64]) -> Result<(), SelectionError> {
        if start.len() != self.shape.len() || count.len() != self.shape.len() {
            return Err(SelectionError::RankMismatch {
                expected: self.shape.len(),
                found: start.len().max(count.len()),
            });
        }
        for dim in 0..self.shape.len() {
            if start[dim] + count[dim] > self.shape[dim] {
                return Err(SelectionError::OutOfBounds {
                    dim,
                    start: start[dim],
                    count: count[dim],
                    extent: self.shape[dim],
                });
            }
        }
        self.start = start.to_vec();
        self.count = count.to_vec();
        Ok(())
    }

    /// Number of selected elements
    pub fn selected_elements(&self) -> usize {
        self.count.iter().product::<u64>() as usize
    }

    /// Total elements of the address space
    pub fn total_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Contiguous runs of the selection as `(element offset, length)`, row-major
    pub fn runs(&self) -> Vec<(u64, u64)> {
        let ndims = self.shape.len();
        if ndims == 0 || self.count.iter().any(|&c| c == 0) {
            return Vec::new();
        }
        let last = ndims - 1;
        let mut strides = vec![1u64; ndims];
        for dim in (0..last).rev() {
            strides[dim] = strides[dim + 1] * self.shape[dim + 1];
        }

        let outer: u64 = self.count[..last].iter().product();
        let mut runs = Vec::with_capacity(outer as usize);
        let mut idx = vec![0u64; last];
        for _ in 0..outer {
            let mut offset = self.start[last];
            for dim in 0..last {
                offset += (self.start[dim] + idx[dim]) * strides[dim];
            }
            runs.push((offset, self.count[last]));

            // odometer over the leading dimensions
            for dim in (0..last).rev() {
                idx[dim] += 1;
                if idx[dim] < self.count[dim] {
                    break;
                }
                idx[dim] = 0;
            }
        }
        runs
    }
}

impl fmt::Display for Dataspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape={:?} start={:?} count={:?}", self.shape, self.start, self.count)
    }
}

/// Id allocator + table of open handles
#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    next: u64,
    entries: HashMap<u64, T>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self { next: 1, entries: HashMap::new() }
    }
}

impl<T> HandleTable<T> {
    pub(crate) fn insert(&mut self, value: T) -> u64 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, value);
        id
    }

    pub(crate) fn get(&self, id: u64) -> Result<&T, StoreError> {
        self.entries.get(&id).ok_or(StoreError::InvalidHandle(id))
    }

    pub(crate) fn get_mut(&mut self, id: u64) -> Result<&mut T, StoreError> {
        self.entries.get_mut(&id).ok_or(StoreError::InvalidHandle(id))
    }

    pub(crate) fn remove(&mut self, id: u64) -> Result<T, StoreError> {
        self.entries.remove(&id).ok_or(StoreError::InvalidHandle(id))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Tracks dataspaces handed out and not yet released
#[derive(Debug, Default)]
pub(crate) struct SpaceTracker {
    next: u64,
    outstanding: HashSet<u64>,
}

impl SpaceTracker {
    pub(crate) fn issue(&mut self, shape: &[u64]) -> Dataspace {
        self.next += 1;
        self.outstanding.insert(self.next);
        Dataspace::all(self.next, shape)
    }

    pub(crate) fn release(&mut self, space: Dataspace) -> Result<(), StoreError> {
        if self.outstanding.remove(&space.id) {
            Ok(())
        } else {
            Err(StoreError::UnknownSpace(space.id))
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// Shared checks before a transfer
pub(crate) fn check_transfer(
    path: &str,
    object_shape: &[u64],
    space: &Dataspace,
    buf_len: usize,
) -> Result<(), StoreError> {
    if space.shape() != object_shape {
        return Err(StoreError::ShapeMismatch {
            path: path.to_string(),
            expected: object_shape.to_vec(),
            found: space.shape().to_vec(),
        });
    }
    let expected = space.selected_elements();
    if buf_len != expected {
        return Err(StoreError::BufferSize { expected, found: buf_len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_whole_2d() {
        let space = Dataspace::all(1, &[2, 3]);
        assert_eq!(space.runs(), vec![(0, 3), (3, 3)]);
        assert_eq!(space.selected_elements(), 6);
    }

    #[test]
    fn test_runs_4d_hyperslab() {
        // [steps=2, arrays=3, rows=4, cols=5], select slice (1,2), rows 2..4, cols 1..4
        let mut space = Dataspace::all(1, &[2, 3, 4, 5]);
        space.select_hyperslab(&[1, 2, 2, 1], &[1, 1, 2, 3]).unwrap();
        // (step 1 * 3 arrays + array 2) * (4 * 5) elements per 2D array
        let base: u64 = (3 + 2) * 20;
        assert_eq!(space.runs(), vec![(base + 2 * 5 + 1, 3), (base + 3 * 5 + 1, 3)]);
        assert_eq!(space.selected_elements(), 6);
    }

    #[test]
    fn test_select_out_of_bounds() {
        let mut space = Dataspace::all(1, &[4, 4]);
        let err = space.select_hyperslab(&[3, 0], &[2, 4]).unwrap_err();
        assert!(matches!(err, SelectionError::OutOfBounds { dim: 0, .. }));
        // selection unchanged on failure
        assert_eq!(space.count(), &[4, 4]);
    }

    #[test]
    fn test_select_rank_mismatch() {
        let mut space = Dataspace::all(1, &[4, 4]);
        assert!(matches!(
            space.select_hyperslab(&[0, 0, 0], &[1, 1, 1]),
            Err(SelectionError::RankMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_space_tracker_release_once() {
        let mut tracker = SpaceTracker::default();
        let a = tracker.issue(&[2]);
        let id = a.id();
        assert_eq!(tracker.outstanding(), 1);
        tracker.release(a).unwrap();
        assert_eq!(tracker.outstanding(), 0);
        let forged = Dataspace::all(id, &[2]);
        assert!(matches!(tracker.release(forged), Err(StoreError::UnknownSpace(_))));
    }

    #[test]
    fn test_handle_table() {
        let mut table = HandleTable::default();
        let a = table.insert("a");
        let b = table.insert("b");
        assert_ne!(a, b);
        assert_eq!(*table.get(a).unwrap(), "a");
        table.remove(a).unwrap();
        assert!(matches!(table.get(a), Err(StoreError::InvalidHandle(_))));
        assert_eq!(table.len(), 1);
    }
}
