//! Readiness barrier: block until every endpoint runs an iperf3 server.
//!
//! Server start requests are fire-and-forget, so a fixed sleep is not enough
//! under load. Each round checks only the endpoints still pending.

use crate::lab::{argv, RemoteExec};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("timed out after {waited:?} waiting for iperf3 on: {}", .pending.join(", "))]
    TimedOut {
        /// Endpoints never confirmed, sorted by name.
        pending: Vec<String>,
        waited: Duration,
    },
}

/// Poll `endpoints` until each has a running iperf3 process, or `timeout` elapses.
pub async fn await_ready(
    exec: &dyn RemoteExec,
    endpoints: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ReadinessError> {
    let start = Instant::now();
    let mut pending: BTreeSet<&str> = endpoints.iter().map(String::as_str).collect();
    let probe = argv(["pgrep", "iperf3"]);

    loop {
        let round: Vec<&str> = pending.iter().copied().collect();
        let checks = round.into_iter().map(|ep| {
            let probe = &probe;
            async move {
                let up = matches!(exec.execute(ep, probe).await, Ok(out) if out.success());
                (ep, up)
            }
        });
        for (ep, up) in join_all(checks).await {
            if up {
                debug!(endpoint = %ep, "iperf3 server up");
                pending.remove(ep);
            }
        }

        if pending.is_empty() {
            info!(waited = ?start.elapsed(), "all iperf3 servers ready");
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ReadinessError::TimedOut {
                pending: pending.into_iter().map(str::to_string).collect(),
                waited: elapsed,
            });
        }

        debug!(pending = pending.len(), "waiting for iperf3 servers");
        sleep(poll_interval.min(timeout - elapsed)).await;
    }
}
