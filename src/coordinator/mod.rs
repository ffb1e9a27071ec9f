//! Cluster-controller coordination layer
//!
//! The coordinator is responsible for:
//! - Master election (advisory vote aggregation over the store)
//! - CAS-guarded persistence of critical cluster metadata
//! - Session lifecycle, reconnect backoff, and staleness detection
//! - Shielding the owning controller from the store's native errors

pub mod adapter;
pub mod aggregator;
pub mod bundle;
pub mod mailbox;
pub mod metadata;
pub mod paths;

pub use adapter::PersistentStoreAdapter;
pub use aggregator::{MasterVoteAggregator, VoteSnapshot};
pub use bundle::{BincodeBundleCodec, BundleCodec, ClusterStateBundle};
pub use metadata::{start_coordinator_tasks, MetadataCoordinator};
pub use paths::PathScheme;

/// Notifications the owning controller receives from the coordinator
///
/// This is all the owner ever sees of the store: session loss (drop any
/// leadership assumption, cached votes are stale) and complete vote
/// snapshots. Implementations run inside `tick()` and must not call back
/// into the coordinator.
pub trait CoordinationListener: Send + Sync {
    /// The store session was lost or this replica's view went stale.
    fn on_disconnected(&self);

    /// A complete, changed set of fleet votes is available.
    fn on_vote_snapshot(&self, snapshot: &VoteSnapshot);
}
