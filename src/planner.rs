//! Flow planning: expand endpoints into directed pairs, filter, sample.

use crate::lab::Endpoint;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("sample size {requested} exceeds total flows {available}")]
    SampleTooLarge { requested: usize, available: usize },
}

/// A directed flow under test. `source != destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPair {
    pub source: Endpoint,
    pub destination: Endpoint,
}

impl FlowPair {
    pub fn is_cross_zone(&self) -> bool {
        self.source.zone != self.destination.zone
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Keep only flows whose endpoints sit in different zones.
    pub cross_zone_only: bool,
    /// Randomly keep this many flows after filtering; 0 keeps all.
    pub sample_size: usize,
}

/// Build the flow list: all N·(N−1) ordered pairs, then the zone filter,
/// then sampling without replacement.
///
/// The result is deterministic for a given endpoint order and RNG state.
pub fn plan<R: Rng + ?Sized>(
    endpoints: &[Endpoint],
    options: PlanOptions,
    rng: &mut R,
) -> Result<Vec<FlowPair>, PlanError> {
    let mut pairs: Vec<FlowPair> = endpoints
        .iter()
        .flat_map(|src| {
            endpoints
                .iter()
                .filter(move |dst| dst.name != src.name)
                .map(move |dst| FlowPair {
                    source: src.clone(),
                    destination: dst.clone(),
                })
        })
        .collect();

    if options.cross_zone_only {
        pairs.retain(FlowPair::is_cross_zone);
        info!(flows = pairs.len(), "cross-zone flows only");
    }

    if options.sample_size > 0 {
        if options.sample_size > pairs.len() {
            return Err(PlanError::SampleTooLarge {
                requested: options.sample_size,
                available: pairs.len(),
            });
        }
        pairs = pairs
            .choose_multiple(rng, options.sample_size)
            .cloned()
            .collect();
        info!(flows = pairs.len(), "random sample");
    }

    Ok(pairs)
}
