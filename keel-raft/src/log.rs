//! The in-memory replicated log.
//!
//! `ReplicatedLog` keeps the entry tail that is still interesting to the
//! protocol, anchored to a stable-storage prefix:
//!
//! ```text
//!   snapshot/first.....applied....committed....stabled.....last
//!   --------|------------------------------------------------|
//!                          retained entries
//! ```
//!
//! Entries with index <= `stabled` have been confirmed durable by the host;
//! the suffix above it is the unstable window the host must persist before
//! releasing outbound messages. `applied <= committed` always, and the
//! retained entries are contiguous starting at `first`.

use bytes::Bytes;
use keel_core::{LogIndex, TermId};

use crate::error::StorageError;
use crate::storage::{Snapshot, Storage};

/// A single entry in the replicated log.
///
/// Immutable once committed; an uncommitted entry may be overwritten by a
/// later leader's entry at the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The term in which this entry was proposed.
    pub term: TermId,
    /// The log index of this entry.
    pub index: LogIndex,
    /// The command payload; empty for a leader's no-op.
    pub data: Bytes,
}

impl Entry {
    /// Creates a new log entry.
    #[must_use]
    pub const fn new(term: TermId, index: LogIndex, data: Bytes) -> Self {
        Self { term, index, data }
    }
}

/// In-memory view of the entry sequence anchored to a stable-storage tail.
#[derive(Debug)]
pub struct ReplicatedLog<S> {
    /// Stable storage holding the persisted prefix.
    storage: S,

    /// Retained entries; `entries[k].index == first + k`.
    entries: Vec<Entry>,

    /// Index of the earliest retained entry.
    first: LogIndex,

    /// Highest index known to be replicated on a quorum.
    committed: LogIndex,

    /// Highest index surfaced to the application's state machine.
    applied: LogIndex,

    /// Highest index the host has confirmed persisted.
    stabled: LogIndex,

    /// Incoming snapshot that has not been applied by the host yet.
    pending_snapshot: Option<Snapshot>,
}

impl<S: Storage> ReplicatedLog<S> {
    /// Builds the log from storage, copying the resident tail into memory.
    ///
    /// # Panics
    /// Panics if storage cannot produce its own resident window; that is a
    /// corrupt host, not a runtime condition.
    pub fn new(storage: S) -> Self {
        let lo = storage.first_index();
        let hi = storage.last_index();
        let entries = if hi >= lo {
            match storage.entries(lo, LogIndex::new(hi.get() + 1)) {
                Ok(entries) => entries,
                Err(err) => panic!("storage cannot read its own window [{lo}, {hi}]: {err}"),
            }
        } else {
            Vec::new()
        };

        Self {
            storage,
            entries,
            first: lo,
            committed: LogIndex::new(0),
            applied: LogIndex::new(lo.get() - 1),
            stabled: hi,
            pending_snapshot: None,
        }
    }

    /// Index of the earliest retained entry.
    #[must_use]
    pub const fn first_index(&self) -> LogIndex {
        self.first
    }

    /// Index of the newest known entry.
    #[must_use]
    pub fn last_index(&self) -> LogIndex {
        let snap = self
            .pending_snapshot
            .as_ref()
            .map_or(0, |s| s.meta.index.get());
        let last = self
            .entries
            .last()
            .map_or_else(|| self.storage.last_index().get(), |e| e.index.get());
        LogIndex::new(last.max(snap))
    }

    /// Highest index known committed.
    #[must_use]
    pub const fn committed(&self) -> LogIndex {
        self.committed
    }

    /// Highest index surfaced to the state machine.
    #[must_use]
    pub const fn applied(&self) -> LogIndex {
        self.applied
    }

    /// Highest index confirmed durable by the host.
    #[must_use]
    pub const fn stabled(&self) -> LogIndex {
        self.stabled
    }

    /// The retained entries, earliest first.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The snapshot waiting for the host, if any.
    #[must_use]
    pub const fn pending_snapshot(&self) -> Option<&Snapshot> {
        self.pending_snapshot.as_ref()
    }

    /// Installs a leader-provided snapshot as the pending log-prefix
    /// replacement. Until the host applies it, `term` and `last_index`
    /// answer from its metadata.
    pub fn set_pending_snapshot(&mut self, snapshot: Snapshot) {
        self.pending_snapshot = Some(snapshot);
    }

    /// Returns the term of the entry at `index`.
    ///
    /// Resolution order: pending-snapshot metadata, the in-memory tail,
    /// then storage.
    ///
    /// # Errors
    /// `Compacted` below the retained window with no covering snapshot,
    /// `Unavailable` above the known tail.
    pub fn term(&self, index: LogIndex) -> Result<TermId, StorageError> {
        if let Some(snap) = &self.pending_snapshot {
            if index == snap.meta.index {
                return Ok(snap.meta.term);
            }
        }
        if index >= self.first {
            let pos = (index.get() - self.first.get()) as usize;
            if let Some(entry) = self.entries.get(pos) {
                return Ok(entry.term);
            }
        }
        match self.storage.term(index) {
            Err(StorageError::Unavailable { .. })
                if self
                    .pending_snapshot
                    .as_ref()
                    .is_some_and(|s| index < s.meta.index) =>
            {
                Err(StorageError::Compacted { index })
            }
            other => other,
        }
    }

    /// Term of the newest known entry, or 0 for an empty history.
    #[must_use]
    pub fn last_term(&self) -> TermId {
        self.term(self.last_index()).unwrap_or(TermId::new(0))
    }

    /// True iff a candidate log described by `(index, term)` is at least as
    /// up-to-date as this one. Used for vote granting.
    #[must_use]
    pub fn is_up_to_date(&self, index: LogIndex, term: TermId) -> bool {
        let last_term = self.last_term();
        term > last_term || (term == last_term && index >= self.last_index())
    }

    /// Appends proposals on the leader path, stamping each with `term` and
    /// the next contiguous index. Returns the new last index.
    pub fn append(&mut self, term: TermId, payloads: impl IntoIterator<Item = Bytes>) -> LogIndex {
        let mut index = self.last_index();
        for data in payloads {
            index = index.next();
            self.entries.push(Entry::new(term, index, data));
        }
        debug_assert!(self.entries.first().map_or(true, |e| e.index == self.first));
        index
    }

    /// Absorbs entries replicated by the leader.
    ///
    /// Entries below the retained window are skipped. At the first index
    /// where the local term diverges, the local slot is replaced, everything
    /// beyond it is truncated, and `stabled` is clamped to just below the
    /// divergence. Entries past the local tail are appended verbatim.
    /// Re-delivery of an already-absorbed message is a no-op.
    pub fn merge(&mut self, incoming: &[Entry]) {
        for (pos, entry) in incoming.iter().enumerate() {
            if entry.index < self.first {
                continue;
            }
            if entry.index <= self.last_index() {
                let local = match self.term(entry.index) {
                    Ok(term) => term,
                    Err(err) => panic!("retained index {} unreadable: {err}", entry.index),
                };
                if local != entry.term {
                    let at = self.to_slice_index(entry.index);
                    self.entries[at] = entry.clone();
                    self.entries.truncate(at + 1);
                    let clamped = LogIndex::new(self.stabled.get().min(entry.index.get() - 1));
                    if clamped < self.stabled {
                        tracing::trace!(
                            index = entry.index.get(),
                            stabled = clamped.get(),
                            "truncated diverging suffix"
                        );
                    }
                    self.stabled = clamped;
                }
            } else {
                self.entries.extend(incoming[pos..].iter().cloned());
                break;
            }
        }
    }

    /// Advances the commit cursor, never past the known tail.
    ///
    /// # Panics
    /// Panics if `index` exceeds the last known index; a committed entry
    /// the log does not have means the host broke the protocol contract.
    pub(crate) fn commit_to(&mut self, index: LogIndex) {
        if index <= self.committed {
            return;
        }
        assert!(
            index <= self.last_index(),
            "commit {} past last index {}",
            index.get(),
            self.last_index().get()
        );
        self.committed = index;
    }

    /// The suffix the host has not yet confirmed durable: `(stabled, last]`.
    #[must_use]
    pub fn unstable_entries(&self) -> &[Entry] {
        let start = (self.stabled.get() + 1).saturating_sub(self.first.get()) as usize;
        &self.entries[start.min(self.entries.len())..]
    }

    /// The committed-but-unapplied slice: `(applied, committed]`.
    #[must_use]
    pub fn next_entries(&self) -> &[Entry] {
        if self.entries.is_empty() {
            return &[];
        }
        let lo = (self.applied.get() + 1 - self.first.get()) as usize;
        let hi = (self.committed.get() + 1).saturating_sub(self.first.get()) as usize;
        &self.entries[lo..hi.min(self.entries.len())]
    }

    /// The retained entries from `index` to the tail.
    #[must_use]
    pub fn entries_from(&self, index: LogIndex) -> &[Entry] {
        let Some(last) = self.entries.last() else {
            return &[];
        };
        if index > last.index {
            return &[];
        }
        &self.entries[self.to_slice_index(index)..]
    }

    /// Marks everything up to `index` as confirmed durable.
    ///
    /// # Panics
    /// Panics if the host confirms an index the log does not have, or walks
    /// the cursor backwards.
    pub fn advance_stable(&mut self, index: LogIndex) {
        assert!(
            index <= self.last_index(),
            "stabled {} past last index {}",
            index.get(),
            self.last_index().get()
        );
        assert!(
            index >= self.stabled,
            "stabled cursor moved backwards: {} -> {}",
            self.stabled.get(),
            index.get()
        );
        self.stabled = index;
    }

    /// Marks everything up to `index` as applied by the state machine.
    ///
    /// # Panics
    /// Panics if `index` exceeds `committed` or walks backwards.
    pub fn advance_applied(&mut self, index: LogIndex) {
        assert!(
            index <= self.committed,
            "applied {} past committed {}",
            index.get(),
            self.committed.get()
        );
        assert!(
            index >= self.applied,
            "applied cursor moved backwards: {} -> {}",
            self.applied.get(),
            index.get()
        );
        self.applied = index;
    }

    /// Follows storage compaction: if storage's first index has advanced
    /// past `first`, drop the covered prefix from memory.
    pub fn maybe_compact(&mut self) {
        let idx = self.storage.first_index();
        if idx <= self.first {
            return;
        }
        let drop = ((idx.get() - self.first.get()) as usize).min(self.entries.len());
        self.entries.drain(..drop);
        self.first = idx;
        self.applied = LogIndex::new(self.applied.get().max(self.first.get() - 1));
        tracing::debug!(first = self.first.get(), "compacted log prefix");
    }

    /// Earliest retained index whose term equals `term`, looking at or
    /// below `bound`. The caller guarantees `bound` itself carries `term`,
    /// so a hit always exists; terms are non-decreasing along the log.
    pub(crate) fn earliest_index_at_term(&self, term: TermId, bound: LogIndex) -> LogIndex {
        let upto = self.to_slice_index(bound) + 1;
        let pos = self.entries[..upto].partition_point(|e| e.term < term);
        self.to_entry_index(pos)
    }

    /// One past the last retained entry at `term`, if any entry has that
    /// term. Binary search over the non-decreasing term sequence.
    pub(crate) fn index_past_term(&self, term: TermId) -> Option<LogIndex> {
        let pos = self.entries.partition_point(|e| e.term <= term);
        (pos > 0 && self.entries[pos - 1].term == term).then(|| self.to_entry_index(pos))
    }

    /// Translates an entry index into an offset in the retained vector.
    ///
    /// # Panics
    /// A negative offset is an invariant violation, not a runtime error.
    fn to_slice_index(&self, index: LogIndex) -> usize {
        assert!(
            index >= self.first,
            "index {} below first retained {}",
            index.get(),
            self.first.get()
        );
        (index.get() - self.first.get()) as usize
    }

    /// Translates a retained-vector offset back into an entry index.
    fn to_entry_index(&self, pos: usize) -> LogIndex {
        LogIndex::new(self.first.get() + pos as u64)
    }
}
