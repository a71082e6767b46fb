//! Lab control plane: endpoint discovery, remote command execution, and the
//! shared counter state on the lab router.

pub mod counters;
pub mod docker;
pub mod registry;

use anyhow::Result;
use std::sync::Arc;

use crate::config::LabConfig;

pub use self::counters::{CounterState, IptablesCounters};
pub use self::docker::DockerLab;
pub use self::registry::{discover, DiscoveryError, Endpoint};

/// Captured result of a command executed on a lab endpoint.
///
/// A zero exit status does not imply usable output, and a non-zero one does
/// not imply the output is empty. Callers decide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, for parsers that scan every line the tool printed.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Lists running lab endpoints and resolves their addresses.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Names of every running endpoint, matching or not.
    async fn list_endpoints(&self) -> Result<Vec<String>>;

    /// First network address assigned to `name`.
    async fn address_of(&self, name: &str) -> Result<String>;
}

/// Runs commands inside lab endpoints.
#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `endpoint` and wait for it to exit.
    ///
    /// `Err` means the command could not be run at all; a command that ran and
    /// failed is an `Ok` with a non-zero exit code.
    async fn execute(&self, endpoint: &str, command: &[String]) -> Result<ExecOutput>;

    /// Start `command` on `endpoint` in the background and return immediately.
    /// Success only means the request was submitted.
    async fn spawn_detached(&self, endpoint: &str, command: &[String]) -> Result<()>;
}

/// The external collaborators a benchmark run talks to.
#[derive(Clone)]
pub struct Lab {
    pub control: Arc<dyn ControlPlane>,
    pub exec: Arc<dyn RemoteExec>,
    pub counters: Arc<dyn CounterState>,
}

impl Lab {
    /// Containers managed by the local docker daemon.
    pub fn docker(config: &LabConfig) -> Self {
        let docker = Arc::new(DockerLab::new(config.docker_path.clone()));
        let counters = Arc::new(IptablesCounters::new(docker.clone(), config.counter_host.clone()));
        Self {
            control: docker.clone(),
            exec: docker,
            counters,
        }
    }
}

/// Build an owned argv from string slices.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Fire-and-forget start of an iperf3 server on every endpoint.
///
/// Readiness is confirmed separately by [`crate::readiness::await_ready`].
pub async fn start_throughput_servers(exec: &dyn RemoteExec, endpoints: &[Endpoint]) {
    let command = argv(["sh", "-c", "pgrep iperf3 || iperf3 -s -D"]);
    for ep in endpoints {
        if let Err(e) = exec.spawn_detached(&ep.name, &command).await {
            tracing::warn!(endpoint = %ep.name, error = %e, "failed to request iperf3 server start");
        }
    }
    tracing::debug!(count = endpoints.len(), "requested iperf3 servers");
}
