//! Batch and pipeline tests against an in-process fake lab.

use anyhow::Result;
use flowbench::lab::registry::Naming;
use flowbench::lab::{ControlPlane, CounterState, Endpoint, ExecOutput, Lab, RemoteExec};
use flowbench::orchestrator::FlowTester;
use flowbench::planner::{self, FlowPair, PlanOptions};
use flowbench::probes::ProbeConfig;
use flowbench::BenchRequest;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PING_OK: &str = "\
--- ping statistics ---
10 packets transmitted, 10 received, 0% packet loss, time 9010ms
rtt min/avg/max/mdev = 0.045/0.067/0.089/0.012 ms
";

const PING_LOST: &str = "\
--- ping statistics ---
10 packets transmitted, 0 received, 100% packet loss, time 9010ms
";

const IPERF_OK: &str = r#"{"end": {
    "sum_sent": { "bits_per_second": 95000000.0, "retransmits": 4 },
    "sum_received": { "bits_per_second": 94000000.0 }
}}"#;

/// Lab with configurable failures and an in-flight probe counter.
#[derive(Default)]
struct FakeLab {
    containers: Vec<(String, String)>,
    /// Destination addresses that drop everything.
    blackholed: HashSet<String>,
    /// Endpoints whose iperf3 server never starts.
    no_server: HashSet<String>,
    probe_delay: Duration,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    probe_calls: AtomicUsize,
    counter_log: Mutex<Vec<&'static str>>,
    server_starts: Mutex<Vec<String>>,
}

impl FakeLab {
    fn with_devices(names: &[&str]) -> Self {
        Self {
            containers: names
                .iter()
                .enumerate()
                .map(|(i, n)| (n.to_string(), format!("172.20.0.{}", i + 2)))
                .collect(),
            ..Default::default()
        }
    }

    fn address(&self, name: &str) -> String {
        self.containers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a.clone())
            .unwrap_or_default()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn out(stdout: &str, code: i32) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(code),
    }
}

#[async_trait::async_trait]
impl ControlPlane for FakeLab {
    async fn list_endpoints(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.containers.iter().map(|(n, _)| n.clone()).collect();
        names.push("matter-docker-router".to_string());
        Ok(names)
    }

    async fn address_of(&self, name: &str) -> Result<String> {
        Ok(format!("{} ", self.address(name)))
    }
}

#[async_trait::async_trait]
impl RemoteExec for FakeLab {
    async fn execute(&self, endpoint: &str, command: &[String]) -> Result<ExecOutput> {
        let dst = command.last().cloned().unwrap_or_default();
        match command.first().map(String::as_str) {
            Some("pgrep") => Ok(out("", if self.no_server.contains(endpoint) { 1 } else { 0 })),
            Some("ping") => {
                self.enter();
                tokio::time::sleep(self.probe_delay).await;
                self.leave();
                if self.blackholed.contains(&dst) {
                    Ok(out(PING_LOST, 1))
                } else {
                    Ok(out(PING_OK, 0))
                }
            }
            Some("iperf3") => {
                self.enter();
                tokio::time::sleep(self.probe_delay).await;
                self.leave();
                if self.blackholed.contains(&dst) {
                    Ok(out(r#"{"error": "unable to connect to server"}"#, 1))
                } else {
                    Ok(out(IPERF_OK, 0))
                }
            }
            other => anyhow::bail!("unexpected command {:?}", other),
        }
    }

    async fn spawn_detached(&self, endpoint: &str, _command: &[String]) -> Result<()> {
        self.server_starts.lock().unwrap().push(endpoint.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl CounterState for FakeLab {
    async fn reset(&self) -> Result<()> {
        self.counter_log.lock().unwrap().push("reset");
        Ok(())
    }

    async fn dump(&self) -> Result<String> {
        self.counter_log.lock().unwrap().push("dump");
        Ok("Chain FORWARD (policy ACCEPT 120 packets, 9000 bytes)".to_string())
    }
}

fn lab_handle(fake: Arc<FakeLab>) -> Lab {
    Lab {
        control: fake.clone(),
        exec: fake.clone(),
        counters: fake,
    }
}

fn devices(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("matter-docker-zone{}_device{}", i % 3, i))
        .collect()
}

fn full_mesh(fake: &FakeLab) -> Vec<FlowPair> {
    let naming = Naming::default();
    let endpoints: Vec<Endpoint> = fake
        .containers
        .iter()
        .map(|(n, a)| Endpoint::new(n.clone(), a.clone(), &naming))
        .collect();
    planner::plan(&endpoints, PlanOptions::default(), &mut StdRng::seed_from_u64(0)).unwrap()
}

fn request(dir: &std::path::Path, scenario: &str) -> BenchRequest {
    BenchRequest {
        scenario: scenario.to_string(),
        probe: ProbeConfig::default(),
        plan: PlanOptions::default(),
        workers: 3,
        readiness_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        seed: Some(7),
        naming: Naming::default(),
        output_dir: dir.to_path_buf(),
    }
}

#[tokio::test]
async fn test_every_pair_yields_one_record_when_all_probes_fail() {
    let names = devices(4);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut fake = FakeLab::with_devices(&refs);
    fake.blackholed = fake.containers.iter().map(|(_, a)| a.clone()).collect();
    let fake = Arc::new(fake);

    let pairs = full_mesh(&fake);
    assert_eq!(pairs.len(), 12);

    let tester = FlowTester::new(fake.clone(), ProbeConfig::default(), "blackout", Naming::default())
        .with_concurrency(4);
    let records = tester.run_batch(pairs.clone()).await.unwrap();

    assert_eq!(records.len(), pairs.len());
    let seen: HashSet<(String, String)> = records.iter().map(|r| (r.src.clone(), r.dst.clone())).collect();
    assert_eq!(seen.len(), pairs.len());
    for r in &records {
        assert_eq!(r.loss_pct, 100.0);
        assert!(r.min_ms.is_none() && r.avg_ms.is_none() && r.max_ms.is_none() && r.jitter_ms.is_none());
        assert_eq!(r.bandwidth_mbps, 0.0);
        assert!(r.retransmits.is_none());
        assert_eq!(r.scenario, "blackout");
    }
}

#[tokio::test]
async fn test_concurrency_limit_caps_in_flight_probes() {
    let names = devices(5);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut fake = FakeLab::with_devices(&refs);
    fake.probe_delay = Duration::from_millis(15);
    let fake = Arc::new(fake);

    let pairs = full_mesh(&fake);
    let tester = FlowTester::new(fake.clone(), ProbeConfig::default(), "cap", Naming::default())
        .with_concurrency(2);
    let records = tester.run_batch(pairs.clone()).await.unwrap();

    assert_eq!(records.len(), 20);
    assert_eq!(fake.probe_calls.load(Ordering::SeqCst), 40);
    let high = fake.high_water.load(Ordering::SeqCst);
    assert!(high <= 2, "high-water mark {high} exceeds limit");
    assert!(high >= 1);
}

#[tokio::test]
async fn test_mixed_results_keep_measured_values() {
    let names = devices(3);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut fake = FakeLab::with_devices(&refs);
    let dead_addr = fake.address(&names[2]);
    fake.blackholed.insert(dead_addr);
    let fake = Arc::new(fake);

    let tester = FlowTester::new(fake.clone(), ProbeConfig::default(), "mixed", Naming::default());
    let records = tester.run_batch(full_mesh(&fake)).await.unwrap();
    assert_eq!(records.len(), 6);

    let by_pair: HashMap<(String, String), _> = records
        .into_iter()
        .map(|r| ((r.src.clone(), r.dst.clone()), r))
        .collect();

    let ok = &by_pair[&("zone0_device0".to_string(), "zone1_device1".to_string())];
    assert_eq!(ok.avg_ms, Some(0.067));
    assert_eq!(ok.loss_pct, 0.0);
    assert_eq!(ok.bandwidth_mbps, 94.0);
    assert_eq!(ok.retransmits, Some(4));

    let dead = &by_pair[&("zone0_device0".to_string(), "zone2_device2".to_string())];
    assert_eq!(dead.avg_ms, None);
    assert_eq!(dead.loss_pct, 100.0);
    assert_eq!(dead.retransmits, None);
}

#[tokio::test]
async fn test_full_run_writes_reports() {
    let names = devices(3);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let fake = Arc::new(FakeLab::with_devices(&refs));
    let dir = tempfile::TempDir::new().unwrap();

    let mut seen = 0;
    let outcome = flowbench::run_benchmark(&lab_handle(fake.clone()), &request(dir.path(), "baseline"), |_| {
        seen += 1
    })
    .await
    .unwrap();

    assert_eq!(outcome.endpoints.len(), 3);
    assert_eq!(outcome.records.len(), 6);
    assert_eq!(seen, 6);
    assert_eq!(*fake.counter_log.lock().unwrap(), vec!["reset", "dump"]);
    assert_eq!(fake.server_starts.lock().unwrap().len(), 3);

    let csv = std::fs::read_to_string(dir.path().join("benchmark_baseline.csv")).unwrap();
    assert_eq!(csv.lines().count(), 7);
    assert!(csv.lines().skip(1).all(|l| l.contains(",baseline,")));
    let fw = std::fs::read_to_string(dir.path().join("fw_baseline.txt")).unwrap();
    assert!(fw.starts_with("Chain FORWARD"));
}

#[tokio::test]
async fn test_cross_zone_sample_run() {
    let names = devices(6);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let fake = Arc::new(FakeLab::with_devices(&refs));
    let dir = tempfile::TempDir::new().unwrap();

    let mut req = request(dir.path(), "sampled");
    req.plan = PlanOptions {
        cross_zone_only: true,
        sample_size: 5,
    };
    let outcome = flowbench::run_benchmark(&lab_handle(fake), &req, |_| {})
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 5);
    let naming = Naming::default();
    for r in &outcome.records {
        assert_ne!(naming.zone_of(&r.src), naming.zone_of(&r.dst));
    }
}

#[tokio::test]
async fn test_readiness_timeout_aborts_before_probing() {
    let names = devices(3);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut fake = FakeLab::with_devices(&refs);
    fake.no_server.insert(names[1].clone());
    let fake = Arc::new(fake);
    let dir = tempfile::TempDir::new().unwrap();

    let err = flowbench::run_benchmark(&lab_handle(fake.clone()), &request(dir.path(), "stuck"), |_| {})
        .await
        .unwrap_err();

    assert!(err.to_string().contains(&names[1]));
    assert_eq!(fake.probe_calls.load(Ordering::SeqCst), 0);
    assert!(fake.counter_log.lock().unwrap().is_empty());
    assert!(!dir.path().join("benchmark_stuck.csv").exists());
    assert!(!dir.path().join("fw_stuck.txt").exists());
}

#[tokio::test]
async fn test_oversized_sample_aborts_without_output() {
    let names = devices(3);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let fake = Arc::new(FakeLab::with_devices(&refs));
    let dir = tempfile::TempDir::new().unwrap();

    let mut req = request(dir.path(), "toolarge");
    req.plan.sample_size = 7;
    let err = flowbench::run_benchmark(&lab_handle(fake.clone()), &req, |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "sample size 7 exceeds total flows 6");
    assert_eq!(fake.probe_calls.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("benchmark_toolarge.csv").exists());
}

#[tokio::test]
async fn test_single_device_lab_is_rejected() {
    let fake = Arc::new(FakeLab::with_devices(&["matter-docker-zone0_device0"]));
    let dir = tempfile::TempDir::new().unwrap();
    let err = flowbench::run_benchmark(&lab_handle(fake), &request(dir.path(), "lonely"), |_| {})
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("at least 2 are required"));
}
