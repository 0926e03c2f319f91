//! Iteration driver: the step x array loop of one write or read pass
//!
//! For every slice the driver asks the layout which object holds it and how
//! to acquire that object, lets the decomposition engine narrow the object's
//! dataspace to this process's tile, and moves one buffer. Container and
//! object acquisition and region selection are charged to the object bucket;
//! the transfer call alone is charged to the transfer bucket. Filling and
//! checking buffers, fetching and releasing dataspaces and closing objects
//! are not timed.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::RunConfig;
use crate::decomposition::Decomposition;
use crate::error::{Direction, DriverError, ObjectOp};
use crate::grid::{slices, ProcessCoordinate, SliceIndex};
use crate::layout::{Acquire, Layout};
use crate::metrics::OpKind;
use crate::store::{AccessMode, ContainerId, ObjectId, ObjectStore, StoreError};
use crate::timing::PassMetrics;
use crate::verify::{check_buffer, constant_fill, fill_buffer, LogicalFrame};

/// Runs passes for one process of the grid against one store
pub struct Driver<'a, S: ObjectStore + ?Sized, D: Decomposition> {
    config: &'a RunConfig,
    coord: ProcessCoordinate,
    layout: Layout,
    store: &'a mut S,
    decomposition: D,
}

impl<'a, S: ObjectStore + ?Sized, D: Decomposition> Driver<'a, S, D> {
    pub fn new(
        store: &'a mut S,
        decomposition: D,
        config: &'a RunConfig,
        coord: ProcessCoordinate,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        Ok(Self {
            config,
            coord,
            layout: Layout::for_run(config),
            store,
            decomposition,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Create the container and every object, writing this process's tiles
    ///
    /// Returns the container handle, still open; the caller closes it.
    pub fn write_pass(&mut self, metrics: &mut PassMetrics) -> Result<ContainerId, DriverError> {
        let path = self.config.dataset_path.clone();
        debug!(
            "write pass: process {} layout {} container {}",
            self.coord.linear_id, self.layout, path
        );

        let store = &mut *self.store;
        let (created, elapsed) = metrics.timing.object.time(|| store.create_container(&path))?;
        metrics.latencies.record(OpKind::Create, elapsed);
        let container = created.map_err(|source| container_error(ObjectOp::CreateContainer, &path, source))?;
        metrics.counters.containers_created += 1;

        let mut buf = vec![0.0f64; self.config.local_elements()];
        if self.config.verify {
            warn!("data verification enabled; timings will be distorted");
        } else {
            constant_fill(&mut buf, &self.coord);
        }

        self.run_slices(Direction::Write, container, &mut buf, metrics)?;
        Ok(container)
    }

    /// Open the container read-only and read back every tile
    pub fn read_pass(&mut self, metrics: &mut PassMetrics) -> Result<(), DriverError> {
        let path = self.config.dataset_path.clone();
        debug!(
            "read pass: process {} layout {} container {}",
            self.coord.linear_id, self.layout, path
        );

        let store = &mut *self.store;
        let (opened, elapsed) = metrics
            .timing
            .object
            .time(|| store.open_container(&path, AccessMode::ReadOnly))?;
        metrics.latencies.record(OpKind::Open, elapsed);
        let container = opened.map_err(|source| container_error(ObjectOp::OpenContainer, &path, source))?;
        metrics.counters.containers_opened += 1;

        let mut buf = vec![0.0f64; self.config.local_elements()];
        self.run_slices(Direction::Read, container, &mut buf, metrics)?;

        self.store
            .close_container(container)
            .map_err(|source| container_error(ObjectOp::CloseContainer, &path, source))
    }

    fn run_slices(
        &mut self,
        direction: Direction,
        container: ContainerId,
        buf: &mut [f64],
        metrics: &mut PassMetrics,
    ) -> Result<(), DriverError> {
        let config = self.config;
        let shape = self.layout.object_shape(config);
        let (local_rows, local_cols) = config.local_extent();
        let mut current: Option<ObjectId> = None;

        for slice in slices(config.steps, config.arrays) {
            let plan = self.layout.plan(slice, direction, config.steps, config.arrays);
            trace!("{} {:?} `{}` at {}", direction, plan.acquire, plan.path, slice);

            let object = match (plan.acquire, current) {
                (Acquire::Reuse, Some(object)) => {
                    metrics.counters.objects_reused += 1;
                    object
                }
                (Acquire::Create, _) => {
                    let store = &mut *self.store;
                    let (created, elapsed) = metrics
                        .timing
                        .object
                        .time(|| store.create_object(container, &plan.path, &shape))?;
                    metrics.latencies.record(OpKind::Create, elapsed);
                    metrics.counters.objects_created += 1;
                    created.map_err(|source| lifecycle_error(ObjectOp::Create, &plan.path, slice, source))?
                }
                (Acquire::Open, _) | (Acquire::Reuse, None) => {
                    let mode = match direction {
                        Direction::Write => AccessMode::ReadWrite,
                        Direction::Read => AccessMode::ReadOnly,
                    };
                    let store = &mut *self.store;
                    let (opened, elapsed) = metrics
                        .timing
                        .object
                        .time(|| store.open_object(container, &plan.path, mode))?;
                    metrics.latencies.record(OpKind::Open, elapsed);
                    metrics.counters.objects_opened += 1;
                    opened.map_err(|source| lifecycle_error(ObjectOp::Open, &plan.path, slice, source))?
                }
            };
            current = Some(object);

            let frame = LogicalFrame::new(config, &self.coord, slice);
            if direction == Direction::Write && config.verify {
                fill_buffer(buf, local_rows, local_cols, &frame)
                    .map_err(|source| DriverError::VerificationMismatch { slice, source })?;
            }

            self.transfer_slice(direction, object, &plan.path, slice, buf, metrics)?;

            if plan.close_after {
                let started = std::time::Instant::now();
                self.store
                    .close_object(object)
                    .map_err(|source| lifecycle_error(ObjectOp::Close, &plan.path, slice, source))?;
                metrics.latencies.record(OpKind::Close, started.elapsed());
                metrics.counters.objects_closed += 1;
                current = None;
            }

            if direction == Direction::Read && config.verify {
                check_buffer(buf, local_rows, local_cols, &frame)
                    .map_err(|source| DriverError::VerificationMismatch { slice, source })?;
            }
        }
        Ok(())
    }

    /// Select this process's region of `object` and move `buf`
    ///
    /// The dataspace is released whether selection and transfer succeed or
    /// not; the first error wins.
    fn transfer_slice(
        &mut self,
        direction: Direction,
        object: ObjectId,
        path: &str,
        slice: SliceIndex,
        buf: &mut [f64],
        metrics: &mut PassMetrics,
    ) -> Result<(), DriverError> {
        let mut space = self
            .store
            .address_space(object)
            .map_err(|source| lifecycle_error(ObjectOp::AddressSpace, path, slice, source))?;

        let outcome = (|| -> Result<Duration, DriverError> {
            let (selected, elapsed) = metrics.timing.object.time(|| {
                self.decomposition
                    .select_region(self.config, &mut space, &self.coord, slice)
            })?;
            metrics.latencies.record(OpKind::Select, elapsed);
            metrics.counters.selections += 1;
            selected.map_err(|source| DriverError::Selection { slice, source })?;

            let store = &mut *self.store;
            let space = &space;
            let (moved, elapsed) = match direction {
                Direction::Write => {
                    let data: &[f64] = buf;
                    metrics.timing.transfer.time(|| store.write(object, space, data))?
                }
                Direction::Read => metrics.timing.transfer.time(|| store.read(object, space, buf))?,
            };
            moved.map_err(|source| DriverError::Transfer { direction, slice, source })?;
            Ok(elapsed)
        })();

        let released = self.store.release_space(space);
        let elapsed = outcome?;
        released.map_err(|source| lifecycle_error(ObjectOp::Release, path, slice, source))?;

        let kind = match direction {
            Direction::Write => OpKind::Write,
            Direction::Read => OpKind::Read,
        };
        metrics.latencies.record(kind, elapsed);
        metrics.counters.transfers += 1;
        metrics.counters.bytes += (buf.len() as u64) * crate::constants::ELEMENT_SIZE;
        Ok(())
    }
}

fn container_error(op: ObjectOp, path: &str, source: StoreError) -> DriverError {
    lifecycle_error(op, path, SliceIndex::new(0, 0), source)
}

fn lifecycle_error(op: ObjectOp, path: &str, slice: SliceIndex, source: StoreError) -> DriverError {
    DriverError::ObjectLifecycle {
        op,
        path: path.to_string(),
        slice,
        source,
    }
}

/// Write pass for one process, without constructing a [`Driver`] by hand
pub fn run_write_pass<S, D>(
    store: &mut S,
    decomposition: D,
    config: &RunConfig,
    coord: ProcessCoordinate,
    metrics: &mut PassMetrics,
) -> Result<ContainerId, DriverError>
where
    S: ObjectStore + ?Sized,
    D: Decomposition,
{
    Driver::new(store, decomposition, config, coord)?.write_pass(metrics)
}

/// Read pass for one process
pub fn run_read_pass<S, D>(
    store: &mut S,
    decomposition: D,
    config: &RunConfig,
    coord: ProcessCoordinate,
    metrics: &mut PassMetrics,
) -> Result<(), DriverError>
where
    S: ObjectStore + ?Sized,
    D: Decomposition,
{
    Driver::new(store, decomposition, config, coord)?.read_pass(metrics)
}
