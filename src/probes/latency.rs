use super::{LatencyResult, ProbeError, RttStats};
use crate::lab::{argv, RemoteExec};
use tracing::warn;

const TOOL: &str = "ping";

/// Ping `destination` from inside `source` and summarise the round trips.
///
/// A non-zero exit from ping is normal under total loss, so its output is
/// parsed either way. Only a summary line that is present but unreadable is
/// an error.
pub async fn measure_latency(
    exec: &dyn RemoteExec,
    source: &str,
    destination: &str,
    count: u32,
) -> Result<LatencyResult, ProbeError> {
    let count = count.to_string();
    let command = argv(["ping", "-c", count.as_str(), destination]);

    let output = match exec.execute(source, &command).await {
        Ok(out) => out,
        Err(e) => {
            warn!(src = %source, dst = %destination, error = %e, "could not run ping");
            return Ok(LatencyResult::NoReply);
        }
    };

    let result = parse_output(&output.combined())?;
    if result == LatencyResult::NoReply {
        warn!(src = %source, dst = %destination, "no echo replies (100% loss)");
    }
    Ok(result)
}

/// Parse ping's summary.
///
/// ```text
/// 10 packets transmitted, 10 received, 0% packet loss, time 9213ms
/// rtt min/avg/max/mdev = 0.045/0.067/0.089/0.012 ms
/// ```
pub fn parse_output(output: &str) -> Result<LatencyResult, ProbeError> {
    let Some(rtt_line) = output.lines().find(|l| is_rtt_line(l)) else {
        return Ok(LatencyResult::NoReply);
    };
    let rtt = parse_rtt_line(rtt_line)?;

    let loss_line = output
        .lines()
        .find(|l| l.contains("packet loss"))
        .ok_or_else(|| parse_error("round-trip summary without a packet loss line"))?;
    let loss_pct = parse_loss_line(loss_line)?;

    Ok(LatencyResult::Measured { rtt, loss_pct })
}

fn is_rtt_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("rtt ") || line.starts_with("round-trip ")
}

fn parse_rtt_line(line: &str) -> Result<RttStats, ProbeError> {
    let (_, stats) = line
        .split_once('=')
        .ok_or_else(|| parse_error(format!("no '=' in {:?}", line)))?;
    let fields = stats
        .split_whitespace()
        .next()
        .ok_or_else(|| parse_error(format!("empty statistics in {:?}", line)))?;

    let values = fields
        .split('/')
        .map(|v| v.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_error(format!("{} in {:?}", e, line)))?;

    match values[..] {
        [min_ms, avg_ms, max_ms, jitter_ms] => Ok(RttStats {
            min_ms,
            avg_ms,
            max_ms,
            jitter_ms,
        }),
        _ => Err(parse_error(format!(
            "expected 4 round-trip values, found {} in {:?}",
            values.len(),
            line
        ))),
    }
}

fn parse_loss_line(line: &str) -> Result<f64, ProbeError> {
    let (before, _) = line
        .split_once('%')
        .ok_or_else(|| parse_error(format!("no '%' in {:?}", line)))?;
    let token = before
        .split_whitespace()
        .last()
        .ok_or_else(|| parse_error(format!("no loss value in {:?}", line)))?;
    token
        .parse::<f64>()
        .map_err(|e| parse_error(format!("{} in {:?}", e, line)))
}

fn parse_error(reason: impl Into<String>) -> ProbeError {
    ProbeError::Parse {
        tool: TOOL,
        reason: reason.into(),
    }
}
