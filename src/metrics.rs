//! Per-operation latency histograms
//!
//! One HDR histogram per driver operation, recorded in microseconds.

use anyhow::{bail, Context, Result};
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{HIST_HIGH_US, HIST_LOW_US, HIST_SIGFIG};

/// Number of tracked operation kinds
pub const NUM_OPS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Create,
    Open,
    Select,
    Write,
    Read,
    Close,
}

impl OpKind {
    pub const ALL: [OpKind; NUM_OPS] = [
        OpKind::Create,
        OpKind::Open,
        OpKind::Select,
        OpKind::Write,
        OpKind::Read,
        OpKind::Close,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Open => "open",
            OpKind::Select => "select",
            OpKind::Write => "write",
            OpKind::Read => "read",
            OpKind::Close => "close",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW_US, HIST_HIGH_US, HIST_SIGFIG)
        .expect("failed to allocate histogram")
}

/// Latency percentiles of one operation kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub op: OpKind,
    pub count: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone)]
pub struct OpLatencies {
    hists: Vec<Histogram<u64>>,
}

impl OpLatencies {
    pub fn new() -> Self {
        OpLatencies {
            hists: (0..NUM_OPS).map(|_| new_histogram()).collect(),
        }
    }

    pub fn record(&mut self, op: OpKind, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let _ = self.hists[op.index()].record(micros.min(HIST_HIGH_US));
    }

    pub fn histogram(&self, op: OpKind) -> &Histogram<u64> {
        &self.hists[op.index()]
    }

    pub fn count(&self, op: OpKind) -> u64 {
        self.hists[op.index()].len()
    }

    /// Merge another set into this one (for combining process results)
    pub fn merge(&mut self, other: &OpLatencies) {
        for (mine, theirs) in self.hists.iter_mut().zip(other.hists.iter()) {
            mine.add(theirs).ok();
        }
    }

    /// Summaries of every operation that was recorded at least once
    pub fn summaries(&self) -> Vec<LatencySummary> {
        OpKind::ALL
            .iter()
            .filter_map(|&op| {
                let hist = self.histogram(op);
                if hist.len() == 0 {
                    return None;
                }
                Some(LatencySummary {
                    op,
                    count: hist.len(),
                    mean_us: hist.mean(),
                    p50_us: hist.value_at_quantile(0.50),
                    p95_us: hist.value_at_quantile(0.95),
                    p99_us: hist.value_at_quantile(0.99),
                    max_us: hist.max(),
                })
            })
            .collect()
    }

    pub fn print_summary(&self, title: &str) {
        println!("\n{} latency (µs):", title);
        for s in self.summaries() {
            println!(
                "  [{:>6}] count={:<8} mean={:<8.0} p50={:<8} p95={:<8} p99={:<8} max={:<8}",
                s.op.label(),
                s.count,
                s.mean_us,
                s.p50_us,
                s.p95_us,
                s.p99_us,
                s.max_us
            );
        }
    }

    /// Base64-encoded V2 histograms, one per operation kind, for IPC
    pub fn serialize(&self) -> Result<Vec<String>> {
        use base64::Engine;

        let mut serializer = V2Serializer::new();
        let mut out = Vec::with_capacity(NUM_OPS);
        for (op, hist) in OpKind::ALL.iter().zip(self.hists.iter()) {
            let mut buf = Vec::new();
            serializer
                .serialize(hist, &mut buf)
                .map_err(|e| anyhow::anyhow!("Failed to serialize {} histogram: {:?}", op.label(), e))?;
            out.push(base64::engine::general_purpose::STANDARD.encode(&buf));
        }
        Ok(out)
    }

    /// Inverse of [`OpLatencies::serialize`]
    pub fn deserialize(encoded: &[String]) -> Result<Self> {
        use base64::Engine;

        if encoded.len() != NUM_OPS {
            bail!("expected {} serialized histograms, got {}", NUM_OPS, encoded.len());
        }
        let mut deserializer = Deserializer::new();
        let mut hists = Vec::with_capacity(NUM_OPS);
        for item in encoded {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(item)
                .context("Failed to decode base64 histogram")?;
            let mut cursor = std::io::Cursor::new(&bytes);
            let hist: Histogram<u64> = deserializer
                .deserialize(&mut cursor)
                .context("Failed to deserialize histogram")?;
            hists.push(hist);
        }
        Ok(OpLatencies { hists })
    }
}

impl Default for OpLatencies {
    fn default() -> Self {
        Self::new()
    }
}
