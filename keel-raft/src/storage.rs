//! Stable-storage abstraction consumed by the consensus core.
//!
//! The core never writes storage itself. It reads the persisted prefix once
//! at construction and afterwards only exposes what the host must persist
//! (the unstable entry window and the hard state). Implementations are
//! expected to answer queries for the retained window `[first_index - 1,
//! last_index]`; the index just below `first_index` must still answer
//! `term` so a leader can probe the boundary.

use bytes::Bytes;
use keel_core::{LogIndex, NodeId, TermId};

use crate::error::StorageError;
use crate::log::Entry;

/// The durably-persisted triple `(term, vote, commit)`.
///
/// The host must persist this whenever it changes before releasing any
/// messages produced by the same step to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardState {
    /// Latest term this peer has seen.
    pub term: TermId,
    /// Candidate that received this peer's vote in the current term.
    pub vote: Option<NodeId>,
    /// Highest index known to be committed.
    pub commit: LogIndex,
}

/// The voting membership of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfState {
    /// IDs of all voting peers, including the local one.
    pub voters: Vec<NodeId>,
}

/// Metadata describing the log prefix a snapshot replaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotMeta {
    /// Last log index included in the snapshot.
    pub index: LogIndex,
    /// Term of the last included entry.
    pub term: TermId,
    /// Membership as of the snapshot point.
    pub conf_state: ConfState,
}

/// An opaque state-machine image plus the metadata anchoring it to the log.
///
/// The core only consults the metadata (`term` resolution, `last_index`);
/// building and applying snapshots belongs to the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Anchoring metadata.
    pub meta: SnapshotMeta,
    /// Opaque state-machine bytes.
    pub data: Bytes,
}

impl Snapshot {
    /// Creates an empty snapshot (used for initialization).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            meta: SnapshotMeta {
                index: LogIndex::new(0),
                term: TermId::new(0),
                conf_state: ConfState { voters: Vec::new() },
            },
            data: Bytes::new(),
        }
    }

    /// Returns true if this snapshot covers nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.index.get() == 0
    }
}

/// Read-only view of stable storage consumed by the core.
///
/// `first_index` is always at least 1; index 0 is the implicit origin whose
/// term is 0.
pub trait Storage {
    /// Returns the persisted hard state and membership.
    fn initial_state(&self) -> (HardState, ConfState);

    /// Returns the index of the earliest retained entry.
    fn first_index(&self) -> LogIndex;

    /// Returns the index of the newest retained entry, or `first_index - 1`
    /// if the retained window is empty.
    fn last_index(&self) -> LogIndex;

    /// Returns the term of the entry at `index`.
    ///
    /// `index` may be `first_index - 1` (the compaction boundary); anything
    /// below that is `Compacted`, anything above `last_index` is
    /// `Unavailable`.
    ///
    /// # Errors
    /// `Compacted` below the retained window, `Unavailable` above it.
    fn term(&self, index: LogIndex) -> Result<TermId, StorageError>;

    /// Returns the entries in `[lo, hi)`.
    ///
    /// # Errors
    /// `Compacted` if `lo` is at or below the compaction boundary,
    /// `Unavailable` if `hi` reaches past `last_index + 1`.
    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<Entry>, StorageError>;
}

/// In-memory storage implementation for tests and simulation.
///
/// The entry vector keeps a sentinel at offset 0 recording the compaction
/// boundary `(index, term)`, so a fresh store reports `first_index = 1`,
/// `last_index = 0`, and `term(0) = 0`.
#[derive(Debug, Clone)]
pub struct MemStorage {
    hard_state: HardState,
    conf_state: ConfState,
    ents: Vec<Entry>,
}

impl MemStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hard_state: HardState::default(),
            conf_state: ConfState::default(),
            ents: vec![Entry::new(TermId::new(0), LogIndex::new(0), Bytes::new())],
        }
    }

    /// Creates a store whose membership is the given voter set.
    #[must_use]
    pub fn with_voters(voters: Vec<NodeId>) -> Self {
        let mut storage = Self::new();
        storage.conf_state = ConfState { voters };
        storage
    }

    /// Overwrites the persisted hard state.
    pub fn set_hard_state(&mut self, hard_state: HardState) {
        self.hard_state = hard_state;
    }

    /// Overwrites the persisted membership.
    pub fn set_conf_state(&mut self, conf_state: ConfState) {
        self.conf_state = conf_state;
    }

    /// Index recorded in the sentinel (the compaction boundary).
    fn offset(&self) -> u64 {
        self.ents[0].index.get()
    }

    /// Appends entries, overwriting any conflicting suffix.
    ///
    /// Entries entirely below the retained window are ignored.
    ///
    /// # Panics
    /// Panics if the entries would leave a gap after the current tail.
    pub fn append(&mut self, entries: &[Entry]) {
        let Some(first_new) = entries.iter().find(|e| e.index >= self.first_index()) else {
            return;
        };
        let start = first_new.index;
        assert!(
            start.get() <= self.last_index().get() + 1,
            "append would leave a gap: last {}, incoming {}",
            self.last_index().get(),
            start.get()
        );

        // Keep the sentinel and everything below the first incoming index.
        let keep = (start.get() - self.offset()) as usize;
        self.ents.truncate(keep);
        self.ents
            .extend(entries.iter().filter(|e| e.index >= start).cloned());
    }

    /// Discards entries up to and including `index`, which becomes the new
    /// compaction boundary.
    ///
    /// # Panics
    /// Panics if `index` is outside the retained window.
    pub fn compact(&mut self, index: LogIndex) {
        assert!(
            index.get() > self.offset() && index <= self.last_index(),
            "compact index {} outside retained window",
            index.get()
        );
        let pos = (index.get() - self.offset()) as usize;
        let mut ents = vec![Entry::new(self.ents[pos].term, index, Bytes::new())];
        ents.extend_from_slice(&self.ents[pos + 1..]);
        self.ents = ents;
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    fn initial_state(&self) -> (HardState, ConfState) {
        (self.hard_state, self.conf_state.clone())
    }

    fn first_index(&self) -> LogIndex {
        LogIndex::new(self.offset() + 1)
    }

    fn last_index(&self) -> LogIndex {
        LogIndex::new(self.offset() + self.ents.len() as u64 - 1)
    }

    fn term(&self, index: LogIndex) -> Result<TermId, StorageError> {
        if index.get() < self.offset() {
            return Err(StorageError::Compacted { index });
        }
        let pos = (index.get() - self.offset()) as usize;
        self.ents
            .get(pos)
            .map(|e| e.term)
            .ok_or(StorageError::Unavailable { index })
    }

    fn entries(&self, lo: LogIndex, hi: LogIndex) -> Result<Vec<Entry>, StorageError> {
        assert!(lo <= hi, "entries range reversed: [{lo}, {hi})");
        if lo.get() <= self.offset() {
            return Err(StorageError::Compacted { index: lo });
        }
        if hi.get() > self.last_index().get() + 1 {
            return Err(StorageError::Unavailable { index: hi });
        }
        let start = (lo.get() - self.offset()) as usize;
        let end = (hi.get() - self.offset()) as usize;
        Ok(self.ents[start..end].to_vec())
    }
}
