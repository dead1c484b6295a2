//! Consensus configuration.

use keel_core::{LogIndex, NodeId};

use crate::error::RaftError;
use crate::limits::{ELECTION_TICK_DEFAULT, HEARTBEAT_TICK_DEFAULT};

/// Configuration for a single consensus peer.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    /// This peer's ID. Must not be 0.
    pub id: NodeId,

    /// IDs of all voting peers, including this one. When empty, the voter
    /// set is restored from storage's `ConfState` (the restart path).
    pub peers: Vec<NodeId>,

    /// Ticks between elections: a follower that hears nothing from a
    /// leader for a randomized count in `[election_tick, 2 * election_tick)`
    /// starts a campaign. Must be greater than `heartbeat_tick`.
    pub election_tick: u32,

    /// Ticks between leader heartbeats. Must be greater than 0.
    pub heartbeat_tick: u32,

    /// Last index already applied by the host's state machine; set on
    /// restart so committed entries are not surfaced twice.
    pub applied: LogIndex,

    /// Override for the election-jitter seed. Defaults to the peer id so
    /// peers multiplexed in one process draw different timeouts.
    pub random_seed: Option<u64>,
}

impl RaftConfig {
    /// Creates a configuration with default tick counts.
    #[must_use]
    pub const fn new(id: NodeId, peers: Vec<NodeId>) -> Self {
        Self {
            id,
            peers,
            election_tick: ELECTION_TICK_DEFAULT,
            heartbeat_tick: HEARTBEAT_TICK_DEFAULT,
            applied: LogIndex::new(0),
            random_seed: None,
        }
    }

    /// Sets custom tick counts.
    #[must_use]
    pub const fn with_tick_config(mut self, election_tick: u32, heartbeat_tick: u32) -> Self {
        self.election_tick = election_tick;
        self.heartbeat_tick = heartbeat_tick;
        self
    }

    /// Sets the already-applied index for restart.
    #[must_use]
    pub const fn with_applied(mut self, applied: LogIndex) -> Self {
        self.applied = applied;
        self
    }

    /// Pins the election-jitter seed (deterministic tests).
    #[must_use]
    pub const fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the violated rule.
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.id.get() == 0 {
            return Err(RaftError::InvalidConfig {
                reason: "id cannot be 0",
            });
        }
        if self.heartbeat_tick == 0 {
            return Err(RaftError::InvalidConfig {
                reason: "heartbeat tick must be greater than 0",
            });
        }
        if self.election_tick <= self.heartbeat_tick {
            return Err(RaftError::InvalidConfig {
                reason: "election tick must be greater than heartbeat tick",
            });
        }
        Ok(())
    }
}
