//! Object-management vs transfer timing
//!
//! A pass keeps two accumulating stopwatches. Each bracketed interval is
//! charged to exactly one of them; the driver never nests brackets, and the
//! closure form of [`Stopwatch::time`] makes nesting on the same stopwatch
//! impossible to express.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::Direction;
use crate::metrics::OpLatencies;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimingError {
    #[error("stopwatch started while already running")]
    AlreadyRunning,

    #[error("stopwatch stopped while not running")]
    NotRunning,
}

/// Accumulating monotonic stopwatch
#[derive(Debug, Default, Clone)]
pub struct Stopwatch {
    total: Duration,
    open: Option<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) -> Result<(), TimingError> {
        if self.open.is_some() {
            return Err(TimingError::AlreadyRunning);
        }
        self.open = Some(Instant::now());
        Ok(())
    }

    /// Close the open bracket and return its length
    pub fn stop(&mut self) -> Result<Duration, TimingError> {
        let started = self.open.take().ok_or(TimingError::NotRunning)?;
        let elapsed = started.elapsed();
        self.total += elapsed;
        Ok(elapsed)
    }

    /// Run `f` inside one bracket
    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> Result<(R, Duration), TimingError> {
        self.start()?;
        let out = f();
        let elapsed = self.stop()?;
        Ok((out, elapsed))
    }

    pub fn is_running(&self) -> bool {
        self.open.is_some()
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn secs(&self) -> f64 {
        self.total.as_secs_f64()
    }

    pub fn reset(&mut self) {
        self.total = Duration::ZERO;
        self.open = None;
    }
}

/// The two timing buckets of one pass
#[derive(Debug, Default, Clone)]
pub struct TimingBuckets {
    /// Container and object create/open plus region selection
    pub object: Stopwatch,
    /// Data movement only
    pub transfer: Stopwatch,
}

impl TimingBuckets {
    pub fn object_secs(&self) -> f64 {
        self.object.secs()
    }

    pub fn transfer_secs(&self) -> f64 {
        self.transfer.secs()
    }

    pub fn reset(&mut self) {
        self.object.reset();
        self.transfer.reset();
    }
}

/// Operation counts of one pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounters {
    pub containers_created: u64,
    pub containers_opened: u64,
    pub objects_created: u64,
    pub objects_opened: u64,
    pub objects_reused: u64,
    pub objects_closed: u64,
    pub selections: u64,
    pub transfers: u64,
    pub bytes: u64,
}

impl PassCounters {
    pub fn merge(&mut self, other: &PassCounters) {
        self.containers_created += other.containers_created;
        self.containers_opened += other.containers_opened;
        self.objects_created += other.objects_created;
        self.objects_opened += other.objects_opened;
        self.objects_reused += other.objects_reused;
        self.objects_closed += other.objects_closed;
        self.selections += other.selections;
        self.transfers += other.transfers;
        self.bytes += other.bytes;
    }
}

/// Everything a single process measures during one pass
#[derive(Debug, Clone)]
pub struct PassMetrics {
    pub direction: Direction,
    pub timing: TimingBuckets,
    pub counters: PassCounters,
    pub latencies: OpLatencies,
}

impl PassMetrics {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            timing: TimingBuckets::default(),
            counters: PassCounters::default(),
            latencies: OpLatencies::new(),
        }
    }
}
