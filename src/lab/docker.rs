//! Docker-backed lab: endpoints are containers, commands go through `docker exec`.

use super::{ControlPlane, ExecOutput, RemoteExec};
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

const ADDRESS_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}";

pub struct DockerLab {
    docker_path: String,
}

impl DockerLab {
    pub fn new(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<ExecOutput> {
        let output = Command::new(&self.docker_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to execute {}", self.docker_path))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    /// Like [`Self::docker`] but treats a non-zero exit as an error.
    async fn docker_checked(&self, args: &[&str]) -> Result<String> {
        let out = self.docker(args).await?;
        if !out.success() {
            anyhow::bail!(
                "`{} {}` exited with {:?}: {}",
                self.docker_path,
                args.join(" "),
                out.exit_code,
                out.stderr.trim()
            );
        }
        Ok(out.stdout)
    }
}

impl Default for DockerLab {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait::async_trait]
impl ControlPlane for DockerLab {
    async fn list_endpoints(&self) -> Result<Vec<String>> {
        let stdout = self.docker_checked(&["ps", "--format", "{{.Names}}"]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn address_of(&self, name: &str) -> Result<String> {
        let stdout = self
            .docker_checked(&["inspect", "-f", ADDRESS_TEMPLATE, name])
            .await?;
        // Containers on several networks list one address per network.
        Ok(stdout.split_whitespace().next().unwrap_or_default().to_string())
    }
}

#[async_trait::async_trait]
impl RemoteExec for DockerLab {
    async fn execute(&self, endpoint: &str, command: &[String]) -> Result<ExecOutput> {
        debug!(%endpoint, cmd = %command.join(" "), "docker exec");
        let mut args = vec!["exec", endpoint];
        args.extend(command.iter().map(String::as_str));
        self.docker(&args).await
    }

    async fn spawn_detached(&self, endpoint: &str, command: &[String]) -> Result<()> {
        debug!(%endpoint, cmd = %command.join(" "), "docker exec -d");
        Command::new(&self.docker_path)
            .arg("exec")
            .arg("-d")
            .arg(endpoint)
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to submit detached command to {}", endpoint))?;
        Ok(())
    }
}
