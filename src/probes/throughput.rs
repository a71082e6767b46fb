//! iperf3 client wrapper -- run with `-J`, parse the JSON summary.

use super::{ProbeConfig, ProbeError, ThroughputResult};
use crate::lab::{argv, RemoteExec};
use serde::Deserialize;
use tracing::warn;

const TOOL: &str = "iperf3";

/// Parsed iperf3 JSON result (subset of fields we care about).
#[derive(Debug, Deserialize)]
pub struct Iperf3Result {
    pub end: Iperf3End,
    /// Present when iperf3 gave up, e.g. "unable to connect to server".
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3End {
    pub sum_sent: Iperf3Sum,
    pub sum_received: Iperf3Sum,
}

#[derive(Debug, Deserialize)]
pub struct Iperf3Sum {
    pub bits_per_second: f64,
    /// Only reported for TCP on platforms that expose it.
    #[serde(default)]
    pub retransmits: Option<u64>,
}

/// Run iperf3 from `source` towards the server on `destination`.
pub async fn measure_throughput(
    exec: &dyn RemoteExec,
    source: &str,
    destination: &str,
    config: &ProbeConfig,
) -> Result<ThroughputResult, ProbeError> {
    let duration = config.duration_secs.to_string();
    let streams = config.streams.to_string();
    let port = config.iperf_port.to_string();
    let command = argv([
        "iperf3",
        "-J",
        "-t",
        duration.as_str(),
        "-P",
        streams.as_str(),
        "-p",
        port.as_str(),
        "-c",
        destination,
    ]);

    let output = match exec.execute(source, &command).await {
        Ok(out) => out,
        Err(e) => {
            warn!(src = %source, dst = %destination, error = %e, "could not run iperf3");
            return Ok(ThroughputResult::Failed);
        }
    };

    if !output.success() {
        warn!(
            src = %source,
            dst = %destination,
            code = ?output.exit_code,
            stderr = %output.stderr.trim(),
            "iperf3 failed"
        );
        return Ok(ThroughputResult::Failed);
    }

    parse_output(&output.stdout)
}

/// Parse the JSON emitted by a successful `iperf3 -J` run.
///
/// Received bandwidth comes from `end.sum_received`, retransmits from
/// `end.sum_sent` (0 when the field is missing).
pub fn parse_output(json_str: &str) -> Result<ThroughputResult, ProbeError> {
    // An error report has no `end` section, so look for it before the full parse.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str) {
        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            warn!(error = %msg, "iperf3 reported an error");
            return Ok(ThroughputResult::Failed);
        }
    }

    let result: Iperf3Result = serde_json::from_str(json_str).map_err(|e| ProbeError::Parse {
        tool: TOOL,
        reason: e.to_string(),
    })?;

    Ok(ThroughputResult::Measured {
        bandwidth_mbps: result.end.sum_received.bits_per_second / 1_000_000.0,
        retransmits: result.end.sum_sent.retransmits.unwrap_or(0),
    })
}
