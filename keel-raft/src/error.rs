//! Consensus error types.
//!
//! All errors are explicit and typed. Invariant violations (non-contiguous
//! indices, a commit cursor past the known tail) are programmer errors in
//! the host and panic instead of surfacing here.

use keel_core::LogIndex;
use thiserror::Error;

/// Errors returned by [`crate::Storage`] lookups.
///
/// Only `Compacted` is recoverable (it routes the leader onto the snapshot
/// path). `Unavailable` outside the expected probe range is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested index lies below the snapshot horizon.
    #[error("index {index} has been compacted away")]
    Compacted {
        /// The index that was asked for.
        index: LogIndex,
    },

    /// The requested index lies above the known tail.
    #[error("index {index} is not available yet")]
    Unavailable {
        /// The index that was asked for.
        index: LogIndex,
    },
}

/// Errors surfaced to the host by [`crate::Raft`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RaftError {
    /// A proposal arrived at a peer that cannot accept it (not the leader,
    /// or a leader transfer is pending). The proposer should fail fast and
    /// retry against the current leader.
    #[error("proposal dropped")]
    ProposalDropped,

    /// The supplied [`crate::RaftConfig`] is invalid.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// Why the config was rejected.
        reason: &'static str,
    },
}
