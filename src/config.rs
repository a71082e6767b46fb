//! TOML configuration for flowbench.
//!
//! Every section has defaults, so an empty file (or no file) is valid.
//! Command-line options override whatever is loaded here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lab::registry::Naming;
use crate::probes::ProbeConfig;

pub const CONFIG_ENV: &str = "FLOWBENCH_CONFIG";
pub const LOCAL_CONFIG: &str = "flowbench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowbenchConfig {
    #[serde(default)]
    pub lab: LabConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlowbenchConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. `explicit` (from `--config`); a broken file here is an error.
    /// 2. The path in `$FLOWBENCH_CONFIG`.
    /// 3. `./flowbench.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "FLOWBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Lab
// ---------------------------------------------------------------------------

/// How to reach the lab and read its naming scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Stripped from container names for zones and display.
    pub name_prefix: String,
    /// Substring identifying endpoint containers.
    pub device_marker: String,
    /// Zone is the name token before the first separator.
    pub zone_separator: String,
    /// Container holding the iptables counters.
    pub counter_host: String,
    pub docker_path: String,
}

impl Default for LabConfig {
    fn default() -> Self {
        let naming = Naming::default();
        Self {
            name_prefix: naming.prefix,
            device_marker: naming.marker,
            zone_separator: naming.separator,
            counter_host: "router".to_string(),
            docker_path: "docker".to_string(),
        }
    }
}

impl LabConfig {
    pub fn naming(&self) -> Naming {
        Naming {
            prefix: self.name_prefix.clone(),
            marker: self.device_marker.clone(),
            separator: self.zone_separator.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Flows tested concurrently.
    pub workers: usize,
    pub readiness_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Seed for `--sample`; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: crate::orchestrator::DEFAULT_CONCURRENCY,
            readiness_timeout_secs: crate::readiness::DEFAULT_TIMEOUT.as_secs(),
            poll_interval_ms: crate::readiness::DEFAULT_POLL_INTERVAL.as_millis() as u64,
            seed: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the CSV and counter files.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = FlowbenchConfig::default();

        assert_eq!(cfg.lab.name_prefix, "matter-docker-");
        assert_eq!(cfg.lab.device_marker, "_device");
        assert_eq!(cfg.lab.zone_separator, "_");
        assert_eq!(cfg.lab.counter_host, "router");
        assert_eq!(cfg.lab.docker_path, "docker");

        assert_eq!(cfg.probes.ping_count, 10);
        assert_eq!(cfg.probes.duration_secs, 5);
        assert_eq!(cfg.probes.streams, 1);
        assert_eq!(cfg.probes.iperf_port, 5201);

        assert_eq!(cfg.run.workers, 6);
        assert_eq!(cfg.run.readiness_timeout_secs, 10);
        assert_eq!(cfg.run.poll_interval_ms, 500);
        assert!(cfg.run.seed.is_none());

        assert_eq!(cfg.output.dir, PathBuf::from("."));
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[lab]
name_prefix = "lab-"
device_marker = "-node"
zone_separator = "-"
counter_host = "core-router"
docker_path = "/usr/local/bin/podman"

[probes]
ping_count = 20
duration_secs = 10
streams = 4
iperf_port = 5300

[run]
workers = 2
readiness_timeout_secs = 30
poll_interval_ms = 250
seed = 1234

[output]
dir = "/var/lib/flowbench"

[logging]
level = "debug"
json = true
"#;

        let cfg: FlowbenchConfig = toml::from_str(toml_str).unwrap();

        let naming = cfg.lab.naming();
        assert_eq!(naming.zone_of("lab-east-node1"), "east");
        assert_eq!(cfg.lab.counter_host, "core-router");
        assert_eq!(cfg.lab.docker_path, "/usr/local/bin/podman");
        assert_eq!(cfg.probes.ping_count, 20);
        assert_eq!(cfg.probes.streams, 4);
        assert_eq!(cfg.probes.iperf_port, 5300);
        assert_eq!(cfg.run.workers, 2);
        assert_eq!(cfg.run.seed, Some(1234));
        assert_eq!(cfg.output.dir, PathBuf::from("/var/lib/flowbench"));
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[probes]
ping_count = 3
"#;

        let cfg: FlowbenchConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.probes.ping_count, 3);
        assert_eq!(cfg.probes.duration_secs, 5);
        assert_eq!(cfg.run.workers, 6);
        assert_eq!(cfg.lab.counter_host, "router");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: FlowbenchConfig = toml::from_str("").unwrap();
        let defaults = FlowbenchConfig::default();

        assert_eq!(cfg.probes, defaults.probes);
        assert_eq!(cfg.lab.name_prefix, defaults.lab.name_prefix);
        assert_eq!(cfg.run.poll_interval_ms, defaults.run.poll_interval_ms);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("flowbench.toml");
        std::fs::write(
            &path,
            r#"
[run]
workers = 12
"#,
        )
        .unwrap();

        let cfg = FlowbenchConfig::resolve(Some(path.as_path())).unwrap();
        assert_eq!(cfg.run.workers, 12);
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = FlowbenchConfig::resolve(Some(Path::new("/nonexistent/flowbench.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = FlowbenchConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: FlowbenchConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.probes, roundtripped.probes);
        assert_eq!(cfg.run.workers, roundtripped.run.workers);
        assert_eq!(cfg.lab.counter_host, roundtripped.lab.counter_host);
    }
}
