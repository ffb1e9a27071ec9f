//! # fleetcoord
//!
//! The coordination layer of a cluster controller:
//! - Master election by aggregating advisory votes kept in a
//!   strongly-consistent coordination store
//! - Durable persistence of critical cluster metadata (master vote,
//!   latest state version, per-node wanted states and start timestamps,
//!   last published state bundle) with compare-and-swap semantics
//! - Staleness detection: a CAS conflict means another replica moved the
//!   cluster forward and this one must drop any leadership assumption
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            Owning controller                 │
//! │   tick() / setters / getters                 │
//! │   on_disconnected() / on_vote_snapshot()     │
//! └──────────────┬───────────────────────────────┘
//!                │
//! ┌──────────────▼───────────────┐   ┌───────────────────────┐
//! │     MetadataCoordinator      │◄──│     EventMailbox      │
//! │  pending/stored items, CAS,  │   │ snapshot + lost flags │
//! │  reconnect backoff           │   └──────────▲────────────┘
//! └──────┬───────────────────────┘              │
//!        │                        ┌─────────────┴─────────┐
//! ┌──────▼───────────────┐        │  MasterVoteAggregator │
//! │ PersistentStoreAdapter│──────►│  watch-driven quorum  │
//! └──────┬───────────────┘        └───────────────────────┘
//!        │
//! ┌──────▼────────────────────────────┐
//! │ CoordinationStore (session trait) │
//! │   in-memory impl / real adapter   │
//! └───────────────────────────────────┘
//! ```
//!
//! The coordinator never runs caller logic on store callback threads:
//! notifications are deposited into a single-consumer mailbox and the
//! next `tick()` consumes them.

pub mod common;
pub mod coordinator;
pub mod store;

// Re-export commonly used types
pub use common::{Config, CoordinatorConfig, Error, Result, WantedState};
pub use coordinator::{
    start_coordinator_tasks, BincodeBundleCodec, ClusterStateBundle, CoordinationListener,
    MetadataCoordinator, VoteSnapshot,
};
pub use store::{MemoryConnector, StoreConnector};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
