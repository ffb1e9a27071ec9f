//! Error types for fleetcoord

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on {path}: expected {expected}, stored {actual}")]
    CasConflict {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Session closed")]
    SessionClosed,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    // === Metadata Errors ===
    #[error("Corrupted entry {path}: {reason}")]
    Corrupted { path: String, reason: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Did a compare-and-swap write lose the race?
    ///
    /// A CAS conflict means this replica's view of the store is stale and any
    /// assumption of coordination authority must be dropped.
    pub fn is_cas_conflict(&self) -> bool {
        matches!(self, Error::CasConflict { .. })
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_conflict_classification() {
        let e = Error::CasConflict {
            path: "/c/latest-version".into(),
            expected: 5,
            actual: 6,
        };
        assert!(e.is_cas_conflict());
        assert!(!Error::Unavailable("down".into()).is_cas_conflict());
    }
}
