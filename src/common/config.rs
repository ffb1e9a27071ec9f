//! Configuration for fleetcoord components

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster name (namespaces this cluster in the coordination store)
    pub cluster: String,

    /// This replica's fleet index (unique per controller replica)
    pub node_index: u16,

    /// Total number of controller replicas in the fleet
    #[serde(default = "default_fleet_size")]
    pub fleet_size: u16,

    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fleet_size() -> u16 {
    3
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordination store address (scheme decided by the deployed connector)
    #[serde(default = "default_store_addr")]
    pub store_addr: String,

    /// Store session timeout
    #[serde(default = "default_session_timeout")]
    pub session_timeout_ms: u64,

    /// Minimum interval between reconnect attempts
    #[serde(default = "default_retry_period")]
    pub retry_period_ms: u64,

    /// Interval between background ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_store_addr() -> String {
    "memory:".to_string()
}
fn default_session_timeout() -> u64 {
    30_000
}
fn default_retry_period() -> u64 {
    5_000
}
fn default_tick_interval() -> u64 {
    100
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            store_addr: default_store_addr(),
            session_timeout_ms: default_session_timeout(),
            retry_period_ms: default_retry_period(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl CoordinatorConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Config {
    /// Minimal config for a replica of a named cluster
    pub fn new(cluster: impl Into<String>, node_index: u16) -> Self {
        Self {
            cluster: cluster.into(),
            node_index,
            fleet_size: default_fleet_size(),
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }

    /// Sanity-check field values
    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster.is_empty() {
            return Err(crate::Error::InvalidConfig("cluster name is empty".into()));
        }
        if self.cluster.contains('/') {
            return Err(crate::Error::InvalidConfig(
                "cluster name must not contain '/'".into(),
            ));
        }
        if self.fleet_size == 0 {
            return Err(crate::Error::InvalidConfig("fleet_size must be > 0".into()));
        }
        if self.node_index >= self.fleet_size {
            return Err(crate::Error::InvalidConfig(format!(
                "node_index {} out of range for fleet of {}",
                self.node_index, self.fleet_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::new("content", 0);
        assert_eq!(cfg.fleet_size, 3);
        assert_eq!(cfg.coordinator.retry_period(), Duration::from_secs(5));
        assert_eq!(cfg.log_level, "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::new("", 0);
        assert!(cfg.validate().is_err());

        cfg = Config::new("a/b", 0);
        assert!(cfg.validate().is_err());

        cfg = Config::new("content", 3);
        assert!(cfg.validate().is_err(), "index must be below fleet size");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetcoord.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "cluster = \"content\"\nnode_index = 1\nfleet_size = 5\n\n\
             [coordinator]\nretry_period_ms = 250"
        )
        .unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.cluster, "content");
        assert_eq!(cfg.node_index, 1);
        assert_eq!(cfg.fleet_size, 5);
        assert_eq!(cfg.coordinator.retry_period_ms, 250);
        // untouched fields keep their defaults
        assert_eq!(cfg.coordinator.tick_interval_ms, 100);
    }
}
