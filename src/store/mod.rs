//! Coordination-store client interface
//!
//! The coordination store is a black-box service providing hierarchical
//! versioned key-value storage, ephemeral entries tied to a session, and
//! change notifications. fleetcoord is a *client* of such a store; the
//! engine behind it (Raft, Paxos, a single server) is not its concern.
//!
//! One trait ([`CoordinationStore`]) models a live session; a
//! [`StoreConnector`] opens sessions. The crate ships an in-memory
//! implementation ([`MemoryConnector`]) with faithful session semantics,
//! used both as an embedded store and as the test double.

pub mod memory;

use crate::common::Result;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub use memory::{MemoryConnector, MemoryStore};

/// Lifetime of a created entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Removed automatically when the creating session ends
    Ephemeral,
}

/// A stored value together with its version number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub data: Bytes,
    pub version: u64,
}

/// Asynchronous notification from the store
///
/// Events are deposited on the session's event channel by the store; no
/// caller logic runs on the store's own threads. Watch notifications are
/// one-shot: a new watch must be registered by the next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Session (re)established
    Connected,
    /// Transport to the store lost; the session may still recover
    Disconnected,
    /// Session irrecoverably gone; ephemeral entries have been removed
    SessionExpired,
    /// The child set under this path changed
    ChildrenChanged(String),
    /// The value at this path was created, changed, or deleted
    DataChanged(String),
}

/// CAS token for a version-tracked entry
///
/// Three states keep "never read this session" distinct from "read and
/// found absent", so an unset sentinel can never collide with a real
/// version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionToken {
    /// No read observed this session; a write must be preceded by a load
    Unobserved,
    /// Entry known to be missing; the next store creates it
    Absent,
    /// Entry last observed at this version
    At(u64),
}

impl VersionToken {
    /// Has a read been performed this session?
    pub fn is_observed(&self) -> bool {
        !matches!(self, VersionToken::Unobserved)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Unobserved => write!(f, "unobserved"),
            VersionToken::Absent => write!(f, "absent"),
            VersionToken::At(v) => write!(f, "v{}", v),
        }
    }
}

/// One live session against the coordination store
///
/// All operations are synchronous requests on the session; change
/// notifications arrive on the event channel supplied at connect time.
pub trait CoordinationStore: Send + Sync {
    /// Create an entry. Fails with [`crate::Error::AlreadyExists`] if the
    /// path is taken and [`crate::Error::NotFound`] if the parent is
    /// missing. A fresh entry has version 0.
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()>;

    /// Delete an entry regardless of version.
    fn delete(&self, path: &str) -> Result<()>;

    /// Read an entry, `None` if absent. `watch` registers a one-shot data
    /// watch on the path.
    fn get(&self, path: &str, watch: bool) -> Result<Option<VersionedValue>>;

    /// Write an entry, returning the new version. `expected = Some(v)`
    /// makes the write conditional: it fails with
    /// [`crate::Error::CasConflict`] unless the stored version is `v`.
    /// `expected = None` overwrites unconditionally.
    fn set(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<u64>;

    /// List child names under a path. `watch` registers a one-shot watch
    /// on the child set.
    fn children(&self, path: &str, watch: bool) -> Result<Vec<String>>;

    /// Release the session; ephemeral entries owned by it are removed.
    fn close(&self);

    /// Can this session still be used?
    fn is_closed(&self) -> bool;
}

/// Factory for store sessions
///
/// The connector carries the configured address/timeout; `connect` opens
/// a fresh session whose notifications flow to `events`.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, events: UnboundedSender<StoreEvent>) -> Result<Arc<dyn CoordinationStore>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_token_states_are_distinct() {
        assert_ne!(VersionToken::Unobserved, VersionToken::Absent);
        assert_ne!(VersionToken::Absent, VersionToken::At(0));
        assert_ne!(VersionToken::At(0), VersionToken::At(1));
    }

    #[test]
    fn test_version_token_observed() {
        assert!(!VersionToken::Unobserved.is_observed());
        assert!(VersionToken::Absent.is_observed());
        assert!(VersionToken::At(42).is_observed());
    }

    #[test]
    fn test_version_token_display() {
        assert_eq!(VersionToken::At(7).to_string(), "v7");
        assert_eq!(VersionToken::Absent.to_string(), "absent");
    }
}
