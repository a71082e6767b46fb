//! Packet counters on the lab router, bracketing a benchmark run.

use super::{argv, RemoteExec};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Shared counter state: reset once before the batch, dumped once after.
#[async_trait::async_trait]
pub trait CounterState: Send + Sync {
    async fn reset(&self) -> Result<()>;

    /// Opaque text snapshot of every counter.
    async fn dump(&self) -> Result<String>;
}

/// iptables FORWARD-chain counters on the router container.
pub struct IptablesCounters {
    exec: Arc<dyn RemoteExec>,
    host: String,
}

impl IptablesCounters {
    pub fn new(exec: Arc<dyn RemoteExec>, host: impl Into<String>) -> Self {
        Self {
            exec,
            host: host.into(),
        }
    }

    async fn run(&self, command: Vec<String>) -> Result<String> {
        let out = self
            .exec
            .execute(&self.host, &command)
            .await
            .with_context(|| format!("failed to run {} on {}", command.join(" "), self.host))?;
        if !out.success() {
            anyhow::bail!(
                "`{}` on {} exited with {:?}: {}",
                command.join(" "),
                self.host,
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(out.stdout)
    }
}

#[async_trait::async_trait]
impl CounterState for IptablesCounters {
    async fn reset(&self) -> Result<()> {
        self.run(argv(["iptables", "-Z"])).await?;
        tracing::debug!(host = %self.host, "reset iptables counters");
        Ok(())
    }

    async fn dump(&self) -> Result<String> {
        let text = self
            .run(argv(["iptables", "-L", "FORWARD", "-v", "-n", "-x"]))
            .await?;
        Ok(text.trim_end().to_string())
    }
}
