//! Endpoint registry: resolve the lab's device containers to addresses.

use super::ControlPlane;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("found {found} endpoint(s) matching the lab naming scheme; at least 2 are required (is the lab up?)")]
    TooFewEndpoints { found: usize },

    #[error("endpoint {name} has no network address")]
    MissingAddress { name: String },

    #[error("endpoint query failed: {0:#}")]
    Query(anyhow::Error),
}

/// How lab container names encode device role and zone.
///
/// `matter-docker-kitchen_device2` has zone `kitchen` with the default scheme.
#[derive(Debug, Clone)]
pub struct Naming {
    /// Prefix stripped from names before deriving the zone and for display.
    pub prefix: String,
    /// Substring a name must contain to count as an endpoint.
    pub marker: String,
    /// The zone is the token before the first separator.
    pub separator: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            prefix: "matter-docker-".to_string(),
            marker: "_device".to_string(),
            separator: "_".to_string(),
        }
    }
}

impl Naming {
    pub fn is_endpoint(&self, name: &str) -> bool {
        name.contains(&self.marker)
    }

    pub fn display_name<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.prefix.as_str()).unwrap_or(name)
    }

    pub fn zone_of(&self, name: &str) -> String {
        let short = self.display_name(name);
        match short.split_once(self.separator.as_str()) {
            Some((zone, _)) => zone.to_string(),
            None => short.to_string(),
        }
    }
}

/// A lab host under test. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    pub zone: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>, naming: &Naming) -> Self {
        let name = name.into();
        let zone = naming.zone_of(&name);
        Self {
            name,
            address: address.into(),
            zone,
        }
    }
}

/// Query the control plane for every endpoint and its address.
///
/// Returned endpoints are sorted by name and unique. Fewer than two matching
/// endpoints, or any failed query, aborts the run.
pub async fn discover(
    control: &dyn ControlPlane,
    naming: &Naming,
) -> Result<Vec<Endpoint>, DiscoveryError> {
    let mut names: Vec<String> = control
        .list_endpoints()
        .await
        .map_err(DiscoveryError::Query)?
        .into_iter()
        .filter(|n| naming.is_endpoint(n))
        .collect();
    names.sort();
    names.dedup();

    if names.len() < 2 {
        return Err(DiscoveryError::TooFewEndpoints { found: names.len() });
    }

    let mut endpoints = Vec::with_capacity(names.len());
    for name in names {
        let address = control
            .address_of(&name)
            .await
            .map_err(DiscoveryError::Query)?;
        if address.trim().is_empty() {
            return Err(DiscoveryError::MissingAddress { name });
        }
        debug!(endpoint = %name, %address, "resolved endpoint");
        endpoints.push(Endpoint::new(name, address.trim(), naming));
    }

    info!(count = endpoints.len(), "discovered lab endpoints");
    Ok(endpoints)
}
