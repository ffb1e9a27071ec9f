//! Cluster-state bundle codec
//!
//! The published cluster-state bundle is opaque to the store adapter; it
//! only moves encoded bytes. The codec is a collaborator so deployments
//! can swap wire formats without touching coordination logic.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The last cluster state a master published to the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateBundle {
    /// Version of the contained state
    pub version: u64,
    /// Baseline cluster state string
    pub baseline: String,
    /// Per-bucket-space derived states, keyed by space name
    pub space_states: BTreeMap<String, String>,
}

impl ClusterStateBundle {
    pub fn new(version: u64, baseline: impl Into<String>) -> Self {
        Self {
            version,
            baseline: baseline.into(),
            space_states: BTreeMap::new(),
        }
    }
}

/// Encoder/decoder for the published bundle entry
pub trait BundleCodec: Send + Sync {
    fn encode(&self, bundle: &ClusterStateBundle) -> Result<Vec<u8>>;
    fn decode(&self, raw: &[u8]) -> Result<ClusterStateBundle>;
}

/// Default codec: bincode over the serde model
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeBundleCodec;

impl BundleCodec for BincodeBundleCodec {
    fn encode(&self, bundle: &ClusterStateBundle) -> Result<Vec<u8>> {
        bincode::serialize(bundle).map_err(|e| Error::Internal(format!("Serialize error: {}", e)))
    }

    fn decode(&self, raw: &[u8]) -> Result<ClusterStateBundle> {
        bincode::deserialize(raw).map_err(|e| Error::Corrupted {
            path: "published-bundle".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_round_trip() {
        let mut bundle = ClusterStateBundle::new(42, "distributor:3 storage:3");
        bundle
            .space_states
            .insert("default".into(), "distributor:3 storage:3 .1.s:m".into());

        let codec = BincodeBundleCodec;
        let raw = codec.encode(&bundle).unwrap();
        assert_eq!(codec.decode(&raw).unwrap(), bundle);
    }

    #[test]
    fn test_garbage_is_corrupted() {
        let codec = BincodeBundleCodec;
        let err = codec.decode(b"\xff\xff\xff\xff\xff\xff").unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }));
    }
}
