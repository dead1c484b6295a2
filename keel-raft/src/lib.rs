//! Keel Raft - the replicated consensus core.
//!
//! This crate implements the Raft state machine and the in-memory
//! replicated log that feeds it. It is a pure state machine: the host
//! injects logical ticks and inbound messages, drains outbound messages,
//! and persists the hard state and the unstable entry window before
//! releasing anything to the wire. Network transport, disk storage, and
//! snapshot construction live outside this crate.
//!
//! # Design Principles
//!
//! - **Correctness first**: role transitions, log matching, and the
//!   commit rule follow the Raft paper exactly
//! - **Deterministic**: all randomness comes from a seeded RNG
//! - **No I/O, no clocks**: time is a counter the host advances
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod log;
mod message;
mod state;
mod storage;

pub use config::RaftConfig;
pub use error::{RaftError, StorageError};
pub use log::{Entry, ReplicatedLog};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, HeartbeatRequest, HeartbeatResponse,
    InstallSnapshotRequest, Message, ProposeRequest, RequestVoteRequest, RequestVoteResponse,
    TimeoutNowRequest, TransferLeaderRequest,
};
pub use state::{Progress, Raft, Role, SoftState};
pub use storage::{ConfState, HardState, MemStorage, Snapshot, SnapshotMeta, Storage};

/// Consensus configuration limits.
pub mod limits {
    /// Default election tick (ticks before the election timeout).
    ///
    /// The actual timeout is randomized in \[`election_tick`, 2 * `election_tick`).
    /// With a 100ms tick interval, this gives a 1-2 second election timeout.
    pub const ELECTION_TICK_DEFAULT: u32 = 10;

    /// Default heartbeat tick (ticks between leader heartbeats).
    /// With a 100ms tick interval, this gives a 100ms heartbeat.
    pub const HEARTBEAT_TICK_DEFAULT: u32 = 1;

    /// Minimum election tick (must be greater than the heartbeat tick).
    pub const ELECTION_TICK_MIN: u32 = 2;

    /// Maximum election tick.
    pub const ELECTION_TICK_MAX: u32 = 100;
}
