//! Per-flow probes: ICMP latency via `ping` and TCP throughput via `iperf3`.
//!
//! Both probes run inside the source endpoint and degrade to an explicit
//! "no data" variant instead of failing when the tool itself fails.

pub mod latency;
pub mod throughput;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::latency::measure_latency;
pub use self::throughput::measure_throughput;

/// Tool output that ran successfully but no longer matches the expected format.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unexpected {tool} output: {reason}")]
    Parse { tool: &'static str, reason: String },
}

/// Parameters applied to every flow of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// ICMP echo requests per flow.
    pub ping_count: u32,
    /// Seconds per iperf3 run.
    pub duration_secs: u32,
    /// Parallel iperf3 streams (`-P`).
    pub streams: u32,
    pub iperf_port: u16,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ping_count: 10,
            duration_secs: 5,
            streams: 1,
            iperf_port: 5201,
        }
    }
}

/// Round-trip statistics from a ping summary line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttStats {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    /// mdev (iputils) or stddev (BSD).
    pub jitter_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyResult {
    Measured { rtt: RttStats, loss_pct: f64 },
    /// No echo reply came back: 100% loss, no RTT statistics.
    NoReply,
}

impl LatencyResult {
    pub fn rtt(&self) -> Option<&RttStats> {
        match self {
            Self::Measured { rtt, .. } => Some(rtt),
            Self::NoReply => None,
        }
    }

    pub fn loss_pct(&self) -> f64 {
        match self {
            Self::Measured { loss_pct, .. } => *loss_pct,
            Self::NoReply => 100.0,
        }
    }

    pub fn min_ms(&self) -> Option<f64> {
        self.rtt().map(|r| r.min_ms)
    }

    pub fn avg_ms(&self) -> Option<f64> {
        self.rtt().map(|r| r.avg_ms)
    }

    pub fn max_ms(&self) -> Option<f64> {
        self.rtt().map(|r| r.max_ms)
    }

    pub fn jitter_ms(&self) -> Option<f64> {
        self.rtt().map(|r| r.jitter_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThroughputResult {
    Measured { bandwidth_mbps: f64, retransmits: u64 },
    /// iperf3 could not be run or exited with an error.
    Failed,
}

impl ThroughputResult {
    pub fn bandwidth_mbps(&self) -> f64 {
        match self {
            Self::Measured { bandwidth_mbps, .. } => *bandwidth_mbps,
            Self::Failed => 0.0,
        }
    }

    pub fn retransmits(&self) -> Option<u64> {
        match self {
            Self::Measured { retransmits, .. } => Some(*retransmits),
            Self::Failed => None,
        }
    }
}
