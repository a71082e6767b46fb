//! flowbench -- latency and throughput benchmarking for multi-host network labs.
//!
//! Discovers the lab's endpoints, starts iperf3 servers and waits until they
//! are up, then pings and iperfs every planned (source, destination) flow on
//! a bounded worker pool. Results land in a CSV file, and the router's
//! iptables counters are captured around the batch.

pub mod config;
pub mod lab;
pub mod orchestrator;
pub mod planner;
pub mod probes;
pub mod readiness;
pub mod report;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::FlowbenchConfig;
use crate::lab::registry::Naming;
use crate::lab::{Endpoint, Lab};
use crate::orchestrator::{FlowRecord, FlowTester};
use crate::planner::{FlowPair, PlanOptions};
use crate::probes::ProbeConfig;

/// Everything one benchmark run needs, fixed before it starts.
#[derive(Debug, Clone)]
pub struct BenchRequest {
    /// Free-text label, copied verbatim into every record.
    pub scenario: String,
    pub probe: ProbeConfig,
    pub plan: PlanOptions,
    pub workers: usize,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub seed: Option<u64>,
    pub naming: Naming,
    pub output_dir: PathBuf,
}

impl BenchRequest {
    pub fn from_config(config: &FlowbenchConfig, scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            probe: config.probes.clone(),
            plan: PlanOptions::default(),
            workers: config.run.workers,
            readiness_timeout: Duration::from_secs(config.run.readiness_timeout_secs),
            poll_interval: Duration::from_millis(config.run.poll_interval_ms),
            seed: config.run.seed,
            naming: config.lab.naming(),
            output_dir: config.output.dir.clone(),
        }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[derive(Debug)]
pub struct BenchOutcome {
    pub endpoints: Vec<Endpoint>,
    pub records: Vec<FlowRecord>,
    pub csv_path: PathBuf,
    pub counters_path: PathBuf,
}

/// Discover endpoints and plan flows without touching the lab otherwise.
pub async fn plan_flows(lab: &Lab, req: &BenchRequest) -> Result<(Vec<Endpoint>, Vec<FlowPair>)> {
    let endpoints = lab::discover(&*lab.control, &req.naming)
        .await
        .context("endpoint discovery failed")?;
    let pairs = planner::plan(&endpoints, req.plan, &mut req.rng())?;
    Ok((endpoints, pairs))
}

/// Run a full benchmark: discover, start and await iperf3 servers, reset
/// counters, plan, test every flow, capture counters, write the reports.
///
/// Any failure before the batch aborts the run without writing output files.
/// `on_record` sees each flow as it completes.
pub async fn run_benchmark<F>(lab: &Lab, req: &BenchRequest, on_record: F) -> Result<BenchOutcome>
where
    F: FnMut(&FlowRecord),
{
    let endpoints = lab::discover(&*lab.control, &req.naming)
        .await
        .context("endpoint discovery failed")?;
    info!(scenario = %req.scenario, endpoints = endpoints.len(), "starting benchmark");

    lab::start_throughput_servers(&*lab.exec, &endpoints).await;
    let names: Vec<String> = endpoints.iter().map(|e| e.name.clone()).collect();
    readiness::await_ready(&*lab.exec, &names, req.readiness_timeout, req.poll_interval).await?;

    lab.counters
        .reset()
        .await
        .context("failed to reset counters")?;

    let pairs = planner::plan(&endpoints, req.plan, &mut req.rng())?;
    if pairs.is_empty() {
        anyhow::bail!("no flows left to test after filtering");
    }

    let tester = FlowTester::new(
        lab.exec.clone(),
        req.probe.clone(),
        req.scenario.clone(),
        req.naming.clone(),
    )
    .with_concurrency(req.workers);
    let records = tester.run_batch_with(pairs, on_record).await?;

    let dump = lab
        .counters
        .dump()
        .await
        .context("failed to capture counters")?;

    let csv_path = report::csv_path(&req.output_dir, &req.scenario);
    let counters_path = report::counters_path(&req.output_dir, &req.scenario);
    report::write_csv(&csv_path, &records)?;
    report::write_counters(&counters_path, &dump)?;

    Ok(BenchOutcome {
        endpoints,
        records,
        csv_path,
        counters_path,
    })
}
