//! Typed persistence over one coordination-store session
//!
//! The adapter owns no cluster metadata itself; it translates typed
//! load/store calls into store operations on the cluster's namespace and
//! keeps the CAS version tokens for the version-tracked entries. The
//! tokens exist purely so a write can state which version it expects; all
//! pending/confirmed bookkeeping lives in the coordinator.

use super::bundle::{BundleCodec, ClusterStateBundle};
use super::paths::{PathScheme, BASE};
use crate::common::encoding::{decode_records, encode_records, WantedState};
use crate::common::{Error, Result};
use crate::store::{CoordinationStore, CreateMode, VersionToken};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct PersistentStoreAdapter {
    session: Arc<dyn CoordinationStore>,
    paths: PathScheme,
    node_index: u16,
    codec: Arc<dyn BundleCodec>,
    latest_version_token: VersionToken,
    bundle_token: VersionToken,
}

impl PersistentStoreAdapter {
    pub fn new(
        session: Arc<dyn CoordinationStore>,
        paths: PathScheme,
        node_index: u16,
        codec: Arc<dyn BundleCodec>,
    ) -> Self {
        Self {
            session,
            paths,
            node_index,
            codec,
            latest_version_token: VersionToken::Unobserved,
            bundle_token: VersionToken::Unobserved,
        }
    }

    /// The raw session, for watch-driven collaborators.
    pub fn session(&self) -> &dyn CoordinationStore {
        self.session.as_ref()
    }

    /// Idempotently create the cluster namespace and (re)create this
    /// replica's ephemeral vote entry, voting for self.
    pub fn ensure_namespace(&mut self) -> Result<()> {
        let structural = [
            BASE.to_string(),
            self.paths.root().to_string(),
            self.paths.vote_root().to_string(),
            self.paths.wanted_states().to_string(),
            self.paths.start_timestamps().to_string(),
        ];
        for path in &structural {
            match self.session.create(path, b"", CreateMode::Persistent) {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        // The vote entry is soft state owned solely by this replica:
        // unconditional delete-then-create, no version involved.
        let entry = self.paths.vote_entry(self.node_index);
        match self.session.delete(&entry) {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.session.create(
            &entry,
            self.node_index.to_string().as_bytes(),
            CreateMode::Ephemeral,
        )?;
        tracing::debug!(
            index = self.node_index,
            entry = %entry,
            "Namespace ensured, vote entry recreated"
        );
        Ok(())
    }

    /// Unconditional overwrite of this replica's own vote entry.
    pub fn store_master_vote(&mut self, vote: u16) -> Result<()> {
        let entry = self.paths.vote_entry(self.node_index);
        let data = vote.to_string();
        match self.session.set(&entry, data.as_bytes(), None) {
            Ok(_) => Ok(()),
            // Entry vanished with a previous incarnation of the session.
            Err(Error::NotFound(_)) => {
                self.session
                    .create(&entry, data.as_bytes(), CreateMode::Ephemeral)
            }
            Err(e) => Err(e),
        }
    }

    pub fn load_latest_version(&mut self) -> Result<Option<u64>> {
        let path = self.paths.latest_version();
        match self.session.get(path, false)? {
            Some(vv) => {
                let value = parse_decimal(&vv.data, path)?;
                self.latest_version_token = VersionToken::At(vv.version);
                Ok(Some(value))
            }
            None => {
                self.latest_version_token = VersionToken::Absent;
                Ok(None)
            }
        }
    }

    pub fn store_latest_version(&mut self, version: u64) -> Result<()> {
        let path = self.paths.latest_version().to_string();
        store_versioned(
            self.session.as_ref(),
            &path,
            version.to_string().as_bytes(),
            &mut self.latest_version_token,
        )
    }

    pub fn latest_version_observed(&self) -> bool {
        self.latest_version_token.is_observed()
    }

    pub fn load_published_bundle(&mut self) -> Result<Option<ClusterStateBundle>> {
        let path = self.paths.published_bundle();
        match self.session.get(path, false)? {
            Some(vv) => {
                let bundle = self.codec.decode(&vv.data)?;
                self.bundle_token = VersionToken::At(vv.version);
                Ok(Some(bundle))
            }
            None => {
                self.bundle_token = VersionToken::Absent;
                Ok(None)
            }
        }
    }

    pub fn store_published_bundle(&mut self, bundle: &ClusterStateBundle) -> Result<()> {
        let raw = self.codec.encode(bundle)?;
        let path = self.paths.published_bundle().to_string();
        store_versioned(self.session.as_ref(), &path, &raw, &mut self.bundle_token)
    }

    pub fn published_bundle_observed(&self) -> bool {
        self.bundle_token.is_observed()
    }

    pub fn load_wanted_states(&mut self) -> Result<BTreeMap<String, WantedState>> {
        match self.session.get(self.paths.wanted_states(), false)? {
            Some(vv) => Ok(decode_records(&vv.data, "wanted state")),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn store_wanted_states(&mut self, map: &BTreeMap<String, WantedState>) -> Result<()> {
        self.session
            .set(self.paths.wanted_states(), &encode_records(map), None)?;
        Ok(())
    }

    pub fn load_start_timestamps(&mut self) -> Result<BTreeMap<String, u64>> {
        match self.session.get(self.paths.start_timestamps(), false)? {
            Some(vv) => Ok(decode_records(&vv.data, "start timestamp")),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn store_start_timestamps(&mut self, map: &BTreeMap<String, u64>) -> Result<()> {
        self.session
            .set(self.paths.start_timestamps(), &encode_records(map), None)?;
        Ok(())
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}

/// Write a version-tracked entry under its CAS contract.
///
/// `Absent` turns the write into a create so the first store of a fresh
/// entry succeeds; losing a create race is a conflict like any other,
/// and so is an observed entry that has vanished by write time: both
/// mean another actor moved the entry past our view. A conflict leaves
/// the token untouched: the caller resets session state wholesale
/// anyway.
fn store_versioned(
    session: &dyn CoordinationStore,
    path: &str,
    data: &[u8],
    token: &mut VersionToken,
) -> Result<()> {
    match *token {
        VersionToken::Unobserved => Err(Error::Internal(format!(
            "versioned write to {} without a prior read this session",
            path
        ))),
        VersionToken::Absent => match session.create(path, data, CreateMode::Persistent) {
            Ok(()) => {
                *token = VersionToken::At(0);
                Ok(())
            }
            Err(Error::AlreadyExists(_)) => Err(Error::CasConflict {
                path: path.to_string(),
                expected: 0,
                actual: 0,
            }),
            Err(e) => Err(e),
        },
        VersionToken::At(expected) => match session.set(path, data, Some(expected)) {
            Ok(new_version) => {
                *token = VersionToken::At(new_version);
                Ok(())
            }
            Err(Error::NotFound(_)) => Err(Error::CasConflict {
                path: path.to_string(),
                expected,
                actual: 0,
            }),
            Err(e) => Err(e),
        },
    }
}

fn parse_decimal(data: &[u8], path: &str) -> Result<u64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| Error::Corrupted {
            path: path.to_string(),
            reason: "not a decimal integer".to_string(),
        })
}
