//! Flow test orchestrator: run every planned flow on a bounded worker pool.
//!
//! Each worker pulls the next pair from a shared queue and probes it
//! (latency first, then throughput, never overlapping on one pair). Finished
//! records go through a channel to a single collector, so no record is shared
//! between tasks. A batch always runs to completion; probe failures become
//! degraded records, not retries.

use crate::lab::registry::Naming;
use crate::lab::RemoteExec;
use crate::planner::FlowPair;
use crate::probes::{
    measure_latency, measure_throughput, LatencyResult, ProbeConfig, ProbeError, ThroughputResult,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Concurrent flows tested in parallel.
pub const DEFAULT_CONCURRENCY: usize = 6;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("flow worker crashed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// One output row per tested flow.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRecord {
    pub timestamp: String,
    pub tool_version: String,
    pub scenario: String,
    pub src: String,
    pub dst: String,
    pub ping_count: u32,
    pub iperf_secs: u32,
    pub num_streams: u32,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub loss_pct: f64,
    pub bandwidth_mbps: f64,
    pub retransmits: Option<u64>,
}

impl FlowRecord {
    pub fn new(
        at: DateTime<Utc>,
        scenario: &str,
        src: &str,
        dst: &str,
        probe: &ProbeConfig,
        latency: &LatencyResult,
        throughput: &ThroughputResult,
    ) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            scenario: scenario.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
            ping_count: probe.ping_count,
            iperf_secs: probe.duration_secs,
            num_streams: probe.streams,
            min_ms: latency.min_ms(),
            avg_ms: latency.avg_ms(),
            max_ms: latency.max_ms(),
            jitter_ms: latency.jitter_ms(),
            loss_pct: latency.loss_pct(),
            bandwidth_mbps: throughput.bandwidth_mbps(),
            retransmits: throughput.retransmits(),
        }
    }
}

/// Everything a worker needs to turn a pair into a record.
struct FlowContext {
    exec: Arc<dyn RemoteExec>,
    probe: ProbeConfig,
    scenario: String,
    naming: Naming,
}

impl FlowContext {
    async fn test_flow(&self, pair: &FlowPair) -> Result<FlowRecord, ProbeError> {
        let src = &pair.source.name;
        let dst_addr = &pair.destination.address;

        let latency = measure_latency(&*self.exec, src, dst_addr, self.probe.ping_count).await?;
        let throughput = measure_throughput(&*self.exec, src, dst_addr, &self.probe).await?;

        Ok(FlowRecord::new(
            Utc::now(),
            &self.scenario,
            self.naming.display_name(src),
            self.naming.display_name(&pair.destination.name),
            &self.probe,
            &latency,
            &throughput,
        ))
    }
}

pub struct FlowTester {
    ctx: Arc<FlowContext>,
    concurrency: usize,
}

impl FlowTester {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        probe: ProbeConfig,
        scenario: impl Into<String>,
        naming: Naming,
    ) -> Self {
        Self {
            ctx: Arc::new(FlowContext {
                exec,
                probe,
                scenario: scenario.into(),
                naming,
            }),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Cap on flows in flight at once. Values below 1 are treated as 1.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Probe a single flow on the current task.
    pub async fn test_flow(&self, pair: &FlowPair) -> Result<FlowRecord, ProbeError> {
        self.ctx.test_flow(pair).await
    }

    /// Test every pair; one record per pair, in completion order.
    pub async fn run_batch(&self, pairs: Vec<FlowPair>) -> Result<Vec<FlowRecord>, BatchError> {
        self.run_batch_with(pairs, |_| {}).await
    }

    /// Like [`Self::run_batch`], calling `on_record` as each flow finishes.
    pub async fn run_batch_with<F>(
        &self,
        pairs: Vec<FlowPair>,
        mut on_record: F,
    ) -> Result<Vec<FlowRecord>, BatchError>
    where
        F: FnMut(&FlowRecord),
    {
        let total = pairs.len();
        let workers = self.concurrency.min(total);
        info!(flows = total, workers, "starting flow batch");

        let queue = Arc::new(Mutex::new(VecDeque::from(pairs)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker(id, self.ctx.clone(), queue.clone(), tx.clone()));
        }
        // The channel closes once every worker has dropped its sender.
        drop(tx);

        let mut records = Vec::with_capacity(total);
        while let Some(record) = rx.recv().await {
            info!(
                src = %record.src,
                dst = %record.dst,
                avg_ms = ?record.avg_ms,
                loss_pct = record.loss_pct,
                bandwidth_mbps = record.bandwidth_mbps,
                "flow complete"
            );
            on_record(&record);
            records.push(record);
        }

        let mut first_err = None;
        while let Some(joined) = pool.join_next().await {
            let outcome = joined.map_err(BatchError::from).and_then(|r| r.map_err(BatchError::from));
            if let Err(e) = outcome {
                first_err.get_or_insert(e);
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        debug_assert_eq!(records.len(), total);
        info!(flows = records.len(), "flow batch finished");
        Ok(records)
    }
}

async fn worker(
    id: usize,
    ctx: Arc<FlowContext>,
    queue: Arc<Mutex<VecDeque<FlowPair>>>,
    tx: mpsc::UnboundedSender<FlowRecord>,
) -> Result<(), ProbeError> {
    loop {
        let next = queue.lock().await.pop_front();
        let Some(pair) = next else {
            debug!(worker = id, "queue drained");
            return Ok(());
        };
        let record = ctx.test_flow(&pair).await?;
        if tx.send(record).is_err() {
            return Ok(());
        }
    }
}
