//! Text codecs for persisted metadata blobs
//!
//! Wanted states and start timestamps are stored as newline-delimited
//! `key:value` records. A record that fails to parse is dropped with a
//! warning; the rest of the blob is still processed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Administratively wanted state for a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WantedState {
    Up,
    Down,
    Maintenance,
    Retired,
}

impl WantedState {
    /// Should this node take part in normal cluster work?
    pub fn is_up(&self) -> bool {
        matches!(self, WantedState::Up)
    }
}

impl Default for WantedState {
    fn default() -> Self {
        WantedState::Up
    }
}

impl fmt::Display for WantedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WantedState::Up => write!(f, "up"),
            WantedState::Down => write!(f, "down"),
            WantedState::Maintenance => write!(f, "maintenance"),
            WantedState::Retired => write!(f, "retired"),
        }
    }
}

impl FromStr for WantedState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "up" => Ok(WantedState::Up),
            "down" => Ok(WantedState::Down),
            "maintenance" => Ok(WantedState::Maintenance),
            "retired" => Ok(WantedState::Retired),
            other => Err(format!("unknown wanted state: {}", other)),
        }
    }
}

/// Encode a map as newline-delimited `key:value` records
pub fn encode_records<V: fmt::Display>(map: &BTreeMap<String, V>) -> Vec<u8> {
    let mut out = String::new();
    for (key, value) in map {
        out.push_str(key);
        out.push(':');
        out.push_str(&value.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Decode newline-delimited `key:value` records back into a map
///
/// Malformed records are skipped with a warning, never failing the whole
/// read. `what` names the blob in log output.
pub fn decode_records<V>(blob: &[u8], what: &str) -> BTreeMap<String, V>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    let text = String::from_utf8_lossy(blob);
    let mut map = BTreeMap::new();

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            tracing::warn!("Skipping malformed {} record: {:?}", what, line);
            continue;
        };
        if key.is_empty() {
            tracing::warn!("Skipping malformed {} record: {:?}", what, line);
            continue;
        }
        match value.parse::<V>() {
            Ok(parsed) => {
                map.insert(key.to_string(), parsed);
            }
            Err(e) => {
                tracing::warn!("Skipping malformed {} record {:?}: {}", what, line, e);
            }
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wanted_state_round_trip() {
        for state in [
            WantedState::Up,
            WantedState::Down,
            WantedState::Maintenance,
            WantedState::Retired,
        ] {
            assert_eq!(state.to_string().parse::<WantedState>().unwrap(), state);
        }
        assert!("sideways".parse::<WantedState>().is_err());
    }

    #[test]
    fn test_records_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("storage.0".to_string(), WantedState::Up);
        map.insert("storage.1".to_string(), WantedState::Maintenance);
        map.insert("distributor.0".to_string(), WantedState::Down);

        let blob = encode_records(&map);
        let decoded: BTreeMap<String, WantedState> = decode_records(&blob, "wanted state");
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_timestamp_records_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("storage.0".to_string(), 1_700_000_123u64);
        map.insert("storage.7".to_string(), 0u64);

        let decoded: BTreeMap<String, u64> = decode_records(&encode_records(&map), "start time");
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_corrupt_line_is_skipped() {
        let blob = b"storage.0:up\ngarbage-without-colon\nstorage.1:warp9\n:down\nstorage.2:down\n";
        let decoded: BTreeMap<String, WantedState> = decode_records(blob, "wanted state");

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["storage.0"], WantedState::Up);
        assert_eq!(decoded["storage.2"], WantedState::Down);
    }

    #[test]
    fn test_empty_blob() {
        let decoded: BTreeMap<String, u64> = decode_records(b"", "start time");
        assert!(decoded.is_empty());
    }
}
