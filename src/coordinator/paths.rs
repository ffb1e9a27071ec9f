//! Namespace layout in the coordination store
//!
//! Everything a cluster persists lives under `/fleetcoord/<cluster>`:
//!
//! ```text
//! /fleetcoord/<cluster>/
//!   votes/<i>          ephemeral, decimal ASCII: replica i's current vote
//!   wanted-states      newline-delimited node:state records
//!   start-timestamps   newline-delimited node:timestamp records
//!   latest-version     decimal ASCII cluster-state version
//!   published-bundle   opaque encoded cluster-state bundle
//! ```

/// Base entry shared by every cluster
pub const BASE: &str = "/fleetcoord";

/// Deterministic mapping from a cluster id to its store namespace
#[derive(Debug, Clone)]
pub struct PathScheme {
    root: String,
    vote_root: String,
    wanted_states: String,
    start_timestamps: String,
    latest_version: String,
    published_bundle: String,
}

impl PathScheme {
    pub fn new(cluster: &str) -> Self {
        let root = format!("{}/{}", BASE, cluster);
        Self {
            vote_root: format!("{}/votes", root),
            wanted_states: format!("{}/wanted-states", root),
            start_timestamps: format!("{}/start-timestamps", root),
            latest_version: format!("{}/latest-version", root),
            published_bundle: format!("{}/published-bundle", root),
            root,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn vote_root(&self) -> &str {
        &self.vote_root
    }

    pub fn vote_entry(&self, index: u16) -> String {
        format!("{}/{}", self.vote_root, index)
    }

    pub fn wanted_states(&self) -> &str {
        &self.wanted_states
    }

    pub fn start_timestamps(&self) -> &str {
        &self.start_timestamps
    }

    pub fn latest_version(&self) -> &str {
        &self.latest_version
    }

    pub fn published_bundle(&self) -> &str {
        &self.published_bundle
    }

    /// Parse a vote-root child name back into a replica index.
    pub fn vote_index_of(child: &str) -> Option<u16> {
        child.parse().ok()
    }

    /// Replica index of a full vote-entry path, `None` for anything else.
    pub fn vote_entry_index(&self, path: &str) -> Option<u16> {
        let rest = path.strip_prefix(self.vote_root.as_str())?;
        Self::vote_index_of(rest.strip_prefix('/')?)
    }
}
