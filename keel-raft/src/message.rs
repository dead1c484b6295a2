//! Raft RPC message types.
//!
//! The message set splits into local commands injected by the peer itself
//! (`Hup`, `Beat`, `Propose`), wire RPCs exchanged between peers, and
//! reserved slots (`Snapshot` delivery, `TransferLeader`, `TimeoutNow`)
//! that the core accepts but leaves inert.

use bytes::Bytes;
use keel_core::{LogIndex, NodeId, TermId};

use crate::log::Entry;
use crate::storage::Snapshot;

/// Messages consumed and produced by the consensus state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Local command: the election timer fired.
    Hup,
    /// Local command: the heartbeat timer fired (leader only).
    Beat,
    /// Local command: replicate client payloads (leader only).
    Propose(ProposeRequest),
    /// Log replication from leader to follower (also carries the commit).
    Append(AppendEntriesRequest),
    /// Follower's answer to an append.
    AppendResponse(AppendEntriesResponse),
    /// Vote solicitation from a candidate.
    RequestVote(RequestVoteRequest),
    /// Voter's answer to a vote solicitation.
    RequestVoteResponse(RequestVoteResponse),
    /// Snapshot delivery from leader to a lagging follower (reserved slot).
    Snapshot(InstallSnapshotRequest),
    /// Leader liveness probe; deliberately carries no commit index.
    Heartbeat(HeartbeatRequest),
    /// Follower's answer to a heartbeat.
    HeartbeatResponse(HeartbeatResponse),
    /// Leadership transfer request (reserved slot).
    TransferLeader(TransferLeaderRequest),
    /// Tells the target to start an election immediately (reserved slot).
    TimeoutNow(TimeoutNowRequest),
}

impl Message {
    /// Returns the source peer, or `None` for local commands.
    #[must_use]
    pub const fn from(&self) -> Option<NodeId> {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => None,
            Self::Append(r) => Some(r.from),
            Self::AppendResponse(r) => Some(r.from),
            Self::RequestVote(r) => Some(r.from),
            Self::RequestVoteResponse(r) => Some(r.from),
            Self::Snapshot(r) => Some(r.from),
            Self::Heartbeat(r) => Some(r.from),
            Self::HeartbeatResponse(r) => Some(r.from),
            Self::TransferLeader(r) => Some(r.from),
            Self::TimeoutNow(r) => Some(r.from),
        }
    }

    /// Returns the destination peer, or `None` for local commands.
    #[must_use]
    pub const fn to(&self) -> Option<NodeId> {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => None,
            Self::Append(r) => Some(r.to),
            Self::AppendResponse(r) => Some(r.to),
            Self::RequestVote(r) => Some(r.to),
            Self::RequestVoteResponse(r) => Some(r.to),
            Self::Snapshot(r) => Some(r.to),
            Self::Heartbeat(r) => Some(r.to),
            Self::HeartbeatResponse(r) => Some(r.to),
            Self::TransferLeader(r) => Some(r.to),
            Self::TimeoutNow(r) => Some(r.to),
        }
    }

    /// Returns the term the message was sent at; local commands carry
    /// term 0 so they never look newer than the receiver.
    #[must_use]
    pub const fn term(&self) -> TermId {
        match self {
            Self::Hup | Self::Beat | Self::Propose(_) => TermId::new(0),
            Self::Append(r) => r.term,
            Self::AppendResponse(r) => r.term,
            Self::RequestVote(r) => r.term,
            Self::RequestVoteResponse(r) => r.term,
            Self::Snapshot(r) => r.term,
            Self::Heartbeat(r) => r.term,
            Self::HeartbeatResponse(r) => r.term,
            Self::TransferLeader(r) => r.term,
            Self::TimeoutNow(r) => r.term,
        }
    }
}

/// Client payloads to replicate, handed to the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeRequest {
    /// The command payloads; each becomes one log entry.
    pub entries: Vec<Bytes>,
}

impl ProposeRequest {
    /// Creates a new propose request.
    #[must_use]
    pub const fn new(entries: Vec<Bytes>) -> Self {
        Self { entries }
    }
}

/// `AppendEntries` RPC request.
///
/// Sent by the leader to replicate log entries; an entry-free append still
/// carries the commit index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    /// Leader's term.
    pub term: TermId,
    /// The leader.
    pub from: NodeId,
    /// Target follower.
    pub to: NodeId,
    /// Index of the entry immediately preceding `entries`.
    pub prev_index: LogIndex,
    /// Term of the entry at `prev_index`.
    pub prev_term: TermId,
    /// Entries to replicate.
    pub entries: Vec<Entry>,
    /// Leader's commit index.
    pub commit: LogIndex,
}

/// `AppendEntries` RPC response.
///
/// On rejection, `(log_term, index)` encode the backup hint: `log_term = 0`
/// with `index = 0` is a stale-term refusal, `log_term = 0` with a nonzero
/// `index` means the follower's log ends before `prev_index`, and a nonzero
/// `log_term` reports the conflicting term together with the follower's
/// earliest index at that term. On acceptance `index` is the follower's
/// post-merge last index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    /// Responder's term.
    pub term: TermId,
    /// The responding follower.
    pub from: NodeId,
    /// The leader.
    pub to: NodeId,
    /// Conflict term hint; 0 when not applicable.
    pub log_term: TermId,
    /// Backup hint or post-merge last index.
    pub index: LogIndex,
    /// True if the append was refused.
    pub reject: bool,
}

/// `RequestVote` RPC request, carrying the candidate's log position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteRequest {
    /// Candidate's term.
    pub term: TermId,
    /// The candidate.
    pub from: NodeId,
    /// Target voter.
    pub to: NodeId,
    /// Index of the candidate's last log entry.
    pub last_index: LogIndex,
    /// Term of the candidate's last log entry.
    pub last_term: TermId,
}

/// `RequestVote` RPC response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteResponse {
    /// Voter's term, for the candidate to update itself.
    pub term: TermId,
    /// The voter.
    pub from: NodeId,
    /// The candidate.
    pub to: NodeId,
    /// True if the vote was refused.
    pub reject: bool,
}

/// Snapshot delivery (reserved slot; the core never sends or applies one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSnapshotRequest {
    /// Leader's term.
    pub term: TermId,
    /// The leader.
    pub from: NodeId,
    /// Target follower.
    pub to: NodeId,
    /// The snapshot replacing the follower's log prefix.
    pub snapshot: Snapshot,
}

/// Heartbeat probe from the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRequest {
    /// Leader's term.
    pub term: TermId,
    /// The leader.
    pub from: NodeId,
    /// Target follower.
    pub to: NodeId,
}

/// Heartbeat response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// Responder's term.
    pub term: TermId,
    /// The responding follower.
    pub from: NodeId,
    /// The leader.
    pub to: NodeId,
    /// True if the probe was refused (stale leader).
    pub reject: bool,
}

/// Leadership transfer request (reserved slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLeaderRequest {
    /// Current leader's term.
    pub term: TermId,
    /// The requesting peer.
    pub from: NodeId,
    /// The transfer target.
    pub to: NodeId,
}

/// `TimeoutNow` request (reserved slot): the target should bypass its
/// election timer and campaign immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutNowRequest {
    /// Sender's term.
    pub term: TermId,
    /// The sending leader.
    pub from: NodeId,
    /// The follower that should campaign.
    pub to: NodeId,
}
