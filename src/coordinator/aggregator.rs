//! Master-vote aggregation
//!
//! Every controller replica keeps an ephemeral vote entry under the
//! cluster's vote root. The aggregator discovers the current set of
//! replicas, collects each one's vote, and publishes a snapshot to the
//! coordinator's mailbox once every discovered replica's vote is known.
//! It republishes only when the content actually changes.
//!
//! The cycle is watch-driven: a children change re-enters listing, a
//! single-entry change re-fetches just that entry. A vanished peer is
//! absent from the snapshot, never represented as unknown.

use super::mailbox::EventMailbox;
use super::paths::PathScheme;
use crate::common::Result;
use crate::store::CoordinationStore;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Complete mapping from replica index to the index it votes for
///
/// Only ever materialized once every tracked replica's vote is known;
/// working state with unresolved entries stays inside the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoteSnapshot {
    votes: BTreeMap<u16, u16>,
}

impl VoteSnapshot {
    pub fn vote_of(&self, index: u16) -> Option<u16> {
        self.votes.get(&index).copied()
    }

    pub fn insert(&mut self, index: u16, vote: u16) {
        self.votes.insert(index, vote);
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.votes.iter().map(|(&k, &v)| (k, v))
    }

    /// The replica holding a majority of the fleet's votes, if any.
    ///
    /// Leadership decisions belong to the owning controller; this helper
    /// only tallies. Majority is over the configured fleet size, not over
    /// the snapshot, so a partitioned minority can never elect.
    pub fn winner(&self, fleet_size: u16) -> Option<u16> {
        let quorum = usize::from(fleet_size) / 2 + 1;
        let mut tally: BTreeMap<u16, usize> = BTreeMap::new();
        for &candidate in self.votes.values() {
            *tally.entry(candidate).or_default() += 1;
        }
        tally
            .into_iter()
            .find(|&(_, count)| count >= quorum)
            .map(|(candidate, _)| candidate)
    }
}

impl From<BTreeMap<u16, u16>> for VoteSnapshot {
    fn from(votes: BTreeMap<u16, u16>) -> Self {
        Self { votes }
    }
}

#[derive(Default)]
struct Working {
    /// Discovered replica index -> vote, `None` while still unresolved
    votes: BTreeMap<u16, Option<u16>>,
    last_published: Option<VoteSnapshot>,
}

pub struct MasterVoteAggregator {
    paths: PathScheme,
    mailbox: Arc<EventMailbox>,
    working: Mutex<Working>,
}

impl MasterVoteAggregator {
    pub fn new(paths: PathScheme, mailbox: Arc<EventMailbox>) -> Self {
        Self {
            paths,
            mailbox,
            working: Mutex::new(Working::default()),
        }
    }

    /// Begin a fresh aggregation cycle, discarding all working state.
    ///
    /// Called on session establishment; any in-flight chain from an older
    /// session is superseded by the rebuild.
    pub fn restart(&self, session: &dyn CoordinationStore) -> Result<()> {
        {
            let mut working = self.working.lock().unwrap();
            working.votes.clear();
            working.last_published = None;
        }
        self.relist(session)
    }

    /// The set of replicas changed: discard collecting state and re-list.
    pub fn handle_children_changed(&self, session: &dyn CoordinationStore) -> Result<()> {
        self.relist(session)
    }

    /// One replica's vote entry changed: re-fetch just that entry.
    ///
    /// A stale notification for an index no longer tracked is ignored.
    pub fn handle_entry_changed(&self, session: &dyn CoordinationStore, index: u16) {
        {
            let mut working = self.working.lock().unwrap();
            if !working.votes.contains_key(&index) {
                return;
            }
            working.votes.insert(index, None);
        }
        self.fetch_entry(session, index);
        self.publish_if_complete();
    }

    fn relist(&self, session: &dyn CoordinationStore) -> Result<()> {
        let children = session.children(self.paths.vote_root(), true)?;
        let mut indices = Vec::new();
        for child in &children {
            match PathScheme::vote_index_of(child) {
                Some(index) => indices.push(index),
                None => tracing::warn!(entry = %child, "Ignoring non-index vote entry"),
            }
        }

        {
            let mut working = self.working.lock().unwrap();
            working.votes = indices.iter().map(|&i| (i, None)).collect();
        }
        tracing::debug!(replicas = indices.len(), "Vote listing received");

        for index in indices {
            self.fetch_entry(session, index);
        }
        self.publish_if_complete();
        Ok(())
    }

    /// Resolve one entry in the working map. Not-found and fetch errors
    /// both mean "assume this peer down": the index is dropped. Dropping
    /// an index that a concurrent re-list already removed is a no-op.
    fn fetch_entry(&self, session: &dyn CoordinationStore, index: u16) {
        let fetched = session.get(&self.paths.vote_entry(index), true);
        let mut working = self.working.lock().unwrap();
        if !working.votes.contains_key(&index) {
            return;
        }
        match fetched {
            Ok(Some(vv)) => match std::str::from_utf8(&vv.data)
                .ok()
                .and_then(|s| s.trim().parse::<u16>().ok())
            {
                Some(vote) => {
                    working.votes.insert(index, Some(vote));
                }
                None => {
                    tracing::warn!(index, "Unparseable vote entry, dropping replica");
                    working.votes.remove(&index);
                }
            },
            Ok(None) => {
                working.votes.remove(&index);
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Vote fetch failed, assuming replica down");
                working.votes.remove(&index);
            }
        }
    }

    /// Publish the working map once nothing is unresolved and the content
    /// differs from the last published snapshot.
    fn publish_if_complete(&self) {
        let mut working = self.working.lock().unwrap();
        if working.votes.values().any(Option::is_none) {
            return;
        }
        let snapshot: VoteSnapshot = working
            .votes
            .iter()
            .filter_map(|(&i, v)| v.map(|vote| (i, vote)))
            .collect::<BTreeMap<u16, u16>>()
            .into();
        if working.last_published.as_ref() == Some(&snapshot) {
            return;
        }
        tracing::debug!(votes = snapshot.len(), "Publishing vote snapshot");
        working.last_published = Some(snapshot.clone());
        self.mailbox.push_snapshot(snapshot);
    }
}
