//! The per-peer consensus state machine.
//!
//! `Raft` is a pure state machine: the host injects logical ticks and
//! inbound messages, then drains the outbound buffer and persists whatever
//! the unstable views expose before releasing those messages to the wire.
//! No I/O, no clocks, no threads; the host serializes all calls.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use keel_core::{LogIndex, NodeId, TermId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::RaftConfig;
use crate::error::{RaftError, StorageError};
use crate::log::{Entry, ReplicatedLog};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, HeartbeatRequest, HeartbeatResponse, Message,
    ProposeRequest, RequestVoteRequest, RequestVoteResponse,
};
use crate::storage::{HardState, Storage};

/// Consensus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Passive; answers RPCs and waits out the election timer.
    #[default]
    Follower,
    /// Actively soliciting votes.
    Candidate,
    /// Replicating the log and emitting heartbeats.
    Leader,
}

/// A follower's replication progress in the leader's view.
///
/// `matched < next` always; both are reset on every transition into Leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Highest index known replicated on the peer.
    pub matched: LogIndex,
    /// Index of the next entry to send to the peer.
    pub next: LogIndex,
}

/// Volatile identity state; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftState {
    /// The current leader, if known.
    pub leader: Option<NodeId>,
    /// This peer's role.
    pub role: Role,
}

/// A single consensus peer.
///
/// Constructed from a validated [`RaftConfig`] and a [`Storage`] handle;
/// starts as a Follower at the persisted term.
#[derive(Debug)]
pub struct Raft<S> {
    id: NodeId,

    term: TermId,
    vote: Option<NodeId>,

    log: ReplicatedLog<S>,

    /// Replication progress per voting peer; leader-owned, but the key set
    /// doubles as the membership view for quorum arithmetic.
    progress: BTreeMap<NodeId, Progress>,

    role: Role,

    /// Explicit grant/reject per voter; rejections terminate a campaign on
    /// negative quorum, so a bare grant count is not enough.
    votes: HashMap<NodeId, bool>,

    /// Outbound buffer; the host drains it after every call.
    msgs: Vec<Message>,

    lead: Option<NodeId>,

    heartbeat_tick: u32,
    election_tick: u32,
    heartbeat_elapsed: u32,
    election_elapsed: u32,

    /// Drawn from `[election_tick, 2 * election_tick)` on every transition
    /// into Follower or Candidate.
    randomized_election_timeout: u32,

    /// Target of an in-flight leadership transfer (reserved slot).
    lead_transferee: Option<NodeId>,

    /// Floor below which no conf change may be proposed (reserved slot).
    pending_conf_index: LogIndex,

    rng: ChaCha8Rng,
}

impl<S: Storage> Raft<S> {
    /// Builds a peer from its config and storage.
    ///
    /// Restores hard state and membership, initializes per-peer progress,
    /// and becomes Follower at the restored term.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the config fails validation.
    pub fn new(config: RaftConfig, storage: S) -> Result<Self, RaftError> {
        config.validate()?;

        let (hard_state, conf_state) = storage.initial_state();
        let mut log = ReplicatedLog::new(storage);
        log.commit_to(hard_state.commit);
        if config.applied.get() > 0 {
            log.advance_applied(config.applied);
        }

        let voters = if config.peers.is_empty() {
            conf_state.voters
        } else {
            config.peers
        };
        let progress = voters
            .into_iter()
            .map(|peer| (peer, Progress::default()))
            .collect();

        let seed = config.random_seed.unwrap_or(config.id.get());
        let mut raft = Self {
            id: config.id,
            term: hard_state.term,
            vote: hard_state.vote,
            log,
            progress,
            role: Role::Follower,
            votes: HashMap::new(),
            msgs: Vec::new(),
            lead: None,
            heartbeat_tick: config.heartbeat_tick,
            election_tick: config.election_tick,
            heartbeat_elapsed: 0,
            election_elapsed: 0,
            randomized_election_timeout: 0,
            lead_transferee: None,
            pending_conf_index: LogIndex::new(0),
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        raft.reset_randomized_election_timeout();
        Ok(raft)
    }

    /// This peer's ID.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// The current term.
    #[must_use]
    pub const fn term(&self) -> TermId {
        self.term
    }

    /// The current role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The current leader, if known.
    #[must_use]
    pub const fn leader_id(&self) -> Option<NodeId> {
        self.lead
    }

    /// The replicated log.
    #[must_use]
    pub const fn log(&self) -> &ReplicatedLog<S> {
        &self.log
    }

    /// Replication progress per peer.
    #[must_use]
    pub const fn progress(&self) -> &BTreeMap<NodeId, Progress> {
        &self.progress
    }

    /// Target of an in-flight leadership transfer, if any. Reserved slot;
    /// nothing sets it until transfer execution is specified.
    #[must_use]
    pub const fn lead_transferee(&self) -> Option<NodeId> {
        self.lead_transferee
    }

    /// Floor below which no conf change may be proposed. Reserved slot;
    /// stays 0 until membership changes are specified.
    #[must_use]
    pub const fn pending_conf_index(&self) -> LogIndex {
        self.pending_conf_index
    }

    /// Volatile `(leader, role)` view.
    #[must_use]
    pub const fn soft_state(&self) -> SoftState {
        SoftState {
            leader: self.lead,
            role: self.role,
        }
    }

    /// The `(term, vote, commit)` triple the host must persist on change.
    #[must_use]
    pub const fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.log.committed(),
        }
    }

    /// Entries the host has not yet confirmed durable.
    #[must_use]
    pub fn unstable_entries(&self) -> &[Entry] {
        self.log.unstable_entries()
    }

    /// Committed entries not yet surfaced to the state machine.
    #[must_use]
    pub fn next_entries(&self) -> &[Entry] {
        self.log.next_entries()
    }

    /// Host confirmation that entries up to `index` are durable.
    pub fn advance_stable(&mut self, index: LogIndex) {
        self.log.advance_stable(index);
    }

    /// Host confirmation that entries up to `index` are applied.
    pub fn advance_applied(&mut self, index: LogIndex) {
        self.log.advance_applied(index);
    }

    /// Follows storage compaction, dropping the covered in-memory prefix.
    pub fn maybe_compact(&mut self) {
        self.log.maybe_compact();
    }

    /// Drains the outbound buffer.
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.msgs)
    }

    /// Membership-change slot: not implemented until the surrounding
    /// protocol is specified.
    pub fn add_node(&mut self, _id: NodeId) {}

    /// Membership-change slot: not implemented until the surrounding
    /// protocol is specified.
    pub fn remove_node(&mut self, _id: NodeId) {}

    /// Advances the logical clock by one tick.
    ///
    /// Followers and candidates count toward the randomized election
    /// timeout; leaders count toward the heartbeat timeout.
    pub fn tick(&mut self) {
        match self.role {
            Role::Follower | Role::Candidate => self.tick_election(),
            Role::Leader => self.tick_heartbeat(),
        }
    }

    fn tick_election(&mut self) {
        self.election_elapsed += 1;
        if self.election_elapsed >= self.randomized_election_timeout {
            self.election_elapsed = 0;
            let _ = self.step(Message::Hup);
        }
    }

    fn tick_heartbeat(&mut self) {
        self.heartbeat_elapsed += 1;
        if self.heartbeat_elapsed >= self.heartbeat_tick {
            self.heartbeat_elapsed = 0;
            let _ = self.step(Message::Beat);
        }
    }

    /// Proposes payloads for replication.
    ///
    /// # Errors
    /// `ProposalDropped` if this peer is not the leader or a leadership
    /// transfer is pending.
    pub fn propose(&mut self, payloads: Vec<Bytes>) -> Result<(), RaftError> {
        self.step(Message::Propose(ProposeRequest::new(payloads)))
    }

    /// Feeds one message through the state machine.
    ///
    /// # Errors
    /// `ProposalDropped` for a `Propose` this peer cannot accept; every
    /// other message is absorbed (stale and unknown-sender messages are
    /// silently discarded).
    pub fn step(&mut self, msg: Message) -> Result<(), RaftError> {
        // A peer removed from its own membership keeps ticking but takes
        // no part in the protocol.
        if !self.progress.contains_key(&self.id) {
            return Ok(());
        }
        if let Some(from) = msg.from() {
            if !self.progress.contains_key(&from) {
                tracing::trace!(from = from.get(), "discarding message from unknown peer");
                return Ok(());
            }
        }
        if msg.term() > self.term {
            self.become_follower(msg.term(), None);
        }
        match self.role {
            Role::Follower => self.step_follower(msg),
            Role::Candidate => self.step_candidate(msg),
            Role::Leader => self.step_leader(msg),
        }
    }

    fn step_follower(&mut self, msg: Message) -> Result<(), RaftError> {
        match msg {
            Message::Hup => self.campaign(),
            Message::Propose(_) => {
                tracing::debug!(id = self.id.get(), "dropping proposal: not the leader");
                return Err(RaftError::ProposalDropped);
            }
            Message::Append(req) => self.handle_append_entries(&req),
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::Heartbeat(req) => self.handle_heartbeat(&req),
            // Reserved slots, and responses a follower has no use for.
            Message::Beat
            | Message::AppendResponse(_)
            | Message::RequestVoteResponse(_)
            | Message::HeartbeatResponse(_)
            | Message::Snapshot(_)
            | Message::TransferLeader(_)
            | Message::TimeoutNow(_) => {}
        }
        Ok(())
    }

    fn step_candidate(&mut self, msg: Message) -> Result<(), RaftError> {
        match msg {
            Message::Hup => self.campaign(),
            Message::Propose(_) => {
                tracing::debug!(id = self.id.get(), "dropping proposal: campaigning");
                return Err(RaftError::ProposalDropped);
            }
            Message::Append(req) => {
                if req.term == self.term {
                    self.become_follower(req.term, Some(req.from));
                }
                self.handle_append_entries(&req);
            }
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::RequestVoteResponse(resp) => self.handle_request_vote_response(&resp),
            Message::Heartbeat(req) => {
                if req.term == self.term {
                    self.become_follower(req.term, Some(req.from));
                }
                self.handle_heartbeat(&req);
            }
            Message::Beat
            | Message::AppendResponse(_)
            | Message::HeartbeatResponse(_)
            | Message::Snapshot(_)
            | Message::TransferLeader(_)
            | Message::TimeoutNow(_) => {}
        }
        Ok(())
    }

    fn step_leader(&mut self, msg: Message) -> Result<(), RaftError> {
        match msg {
            Message::Beat => self.bcast_heartbeat(),
            Message::Propose(req) => {
                if self.lead_transferee.is_some() {
                    tracing::debug!(id = self.id.get(), "dropping proposal: transfer pending");
                    return Err(RaftError::ProposalDropped);
                }
                self.append_proposals(req.entries);
            }
            Message::Append(req) => self.handle_append_entries(&req),
            Message::AppendResponse(resp) => self.handle_append_entries_response(&resp),
            Message::RequestVote(req) => self.handle_request_vote(&req),
            Message::Heartbeat(req) => self.handle_heartbeat(&req),
            Message::HeartbeatResponse(resp) => {
                // A live follower may still be missing entries.
                if !resp.reject && resp.term == self.term {
                    self.send_append(resp.from);
                }
            }
            Message::Hup
            | Message::RequestVoteResponse(_)
            | Message::Snapshot(_)
            | Message::TransferLeader(_)
            | Message::TimeoutNow(_) => {}
        }
        Ok(())
    }

    fn become_follower(&mut self, term: TermId, lead: Option<NodeId>) {
        if self.role == Role::Leader {
            tracing::info!(
                id = self.id.get(),
                term = term.get(),
                "leader stepping down"
            );
        }
        self.role = Role::Follower;
        if term > self.term {
            self.vote = None;
        }
        self.term = term;
        self.lead = lead;
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
    }

    fn become_candidate(&mut self) {
        self.role = Role::Candidate;
        self.term = self.term.next();
        self.lead = None;
        self.vote = Some(self.id);
        self.votes.clear();
        self.votes.insert(self.id, true);
        self.election_elapsed = 0;
        self.reset_randomized_election_timeout();
        tracing::debug!(id = self.id.get(), term = self.term.get(), "campaigning");
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.lead = Some(self.id);
        self.heartbeat_elapsed = 0;
        self.lead_transferee = None;

        let last_index = self.log.last_index();
        for (peer, pr) in &mut self.progress {
            *pr = if *peer == self.id {
                Progress {
                    matched: last_index.next(),
                    next: LogIndex::new(last_index.get() + 2),
                }
            } else {
                Progress {
                    matched: LogIndex::new(0),
                    next: last_index.next(),
                }
            };
        }

        // The no-op pins the new term into the log; committing it is what
        // lets the commit index advance over prior-term entries.
        self.log.append(self.term, [Bytes::new()]);
        tracing::info!(id = self.id.get(), term = self.term.get(), "became leader");
        self.bcast_append();

        if self.progress.len() == 1 {
            let matched = self.progress[&self.id].matched;
            self.log.commit_to(matched);
        }
    }

    fn campaign(&mut self) {
        self.become_candidate();
        self.heartbeat_elapsed = 0;
        if self.progress.len() == 1 {
            self.become_leader();
            return;
        }

        let last_index = self.log.last_index();
        let last_term = self.log.last_term();
        let peers: Vec<NodeId> = self.peer_ids();
        for peer in peers {
            self.msgs.push(Message::RequestVote(RequestVoteRequest {
                term: self.term,
                from: self.id,
                to: peer,
                last_index,
                last_term,
            }));
        }
    }

    /// Every voting peer except this one, in ID order.
    fn peer_ids(&self) -> Vec<NodeId> {
        self.progress
            .keys()
            .copied()
            .filter(|peer| *peer != self.id)
            .collect()
    }

    fn bcast_append(&mut self) {
        for peer in self.peer_ids() {
            self.send_append(peer);
        }
    }

    fn bcast_heartbeat(&mut self) {
        for peer in self.peer_ids() {
            self.msgs.push(Message::Heartbeat(HeartbeatRequest {
                term: self.term,
                from: self.id,
                to: peer,
            }));
        }
    }

    /// Sends the peer everything from its `next` cursor to the tail,
    /// together with the current commit index. Returns false when the peer
    /// is behind the retained window and needs a snapshot instead.
    fn send_append(&mut self, to: NodeId) -> bool {
        let Some(pr) = self.progress.get(&to) else {
            return false;
        };
        let prev_index = LogIndex::new(pr.next.get() - 1);
        let prev_term = match self.log.term(prev_index) {
            Ok(term) => term,
            Err(StorageError::Compacted { .. }) => {
                // Snapshot-send slot: inert until the snapshot protocol
                // is wired up.
                tracing::debug!(to = to.get(), "peer below retained window, needs snapshot");
                return false;
            }
            Err(err @ StorageError::Unavailable { .. }) => {
                panic!("progress for {to} points past the log: {err}")
            }
        };
        let entries = self.log.entries_from(prev_index.next()).to_vec();
        self.msgs.push(Message::Append(AppendEntriesRequest {
            term: self.term,
            from: self.id,
            to,
            prev_index,
            prev_term,
            entries,
            commit: self.log.committed(),
        }));
        true
    }

    fn send_append_response(&mut self, to: NodeId, log_term: TermId, index: LogIndex, reject: bool) {
        self.msgs.push(Message::AppendResponse(AppendEntriesResponse {
            term: self.term,
            from: self.id,
            to,
            log_term,
            index,
            reject,
        }));
    }

    fn send_request_vote_response(&mut self, to: NodeId, reject: bool) {
        self.msgs
            .push(Message::RequestVoteResponse(RequestVoteResponse {
                term: self.term,
                from: self.id,
                to,
                reject,
            }));
    }

    fn handle_request_vote(&mut self, req: &RequestVoteRequest) {
        if self.term > req.term {
            self.send_request_vote_response(req.from, true);
            return;
        }
        // Terms were equalized on entry to step; grant iff we have no
        // conflicting vote this term and the candidate's log is current.
        let can_vote = match self.vote {
            None => true,
            Some(vote) => vote == req.from,
        };
        if can_vote && self.log.is_up_to_date(req.last_index, req.last_term) {
            self.vote = Some(req.from);
            self.election_elapsed = 0;
            self.send_request_vote_response(req.from, false);
        } else {
            self.send_request_vote_response(req.from, true);
        }
    }

    fn handle_request_vote_response(&mut self, resp: &RequestVoteResponse) {
        if resp.term < self.term {
            return;
        }
        self.votes.insert(resp.from, !resp.reject);

        let quorum = self.progress.len() / 2;
        let granted = self.votes.values().filter(|granted| **granted).count();
        let rejected = self.votes.len() - granted;
        if granted > quorum {
            self.become_leader();
        } else if rejected > quorum {
            tracing::debug!(id = self.id.get(), term = self.term.get(), "campaign lost");
            self.become_follower(self.term, None);
        }
    }

    fn handle_append_entries(&mut self, req: &AppendEntriesRequest) {
        if self.term > req.term {
            self.send_append_response(req.from, TermId::new(0), LogIndex::new(0), true);
            return;
        }
        self.lead = Some(req.from);
        self.election_elapsed = 0;

        let last_index = self.log.last_index();
        if req.prev_index > last_index {
            // We are behind; tell the leader where our log ends.
            self.send_append_response(req.from, TermId::new(0), last_index.next(), true);
            return;
        }
        if req.prev_index >= self.log.first_index() {
            let local_term = match self.log.term(req.prev_index) {
                Ok(term) => term,
                Err(err) => panic!("retained index {} unreadable: {err}", req.prev_index),
            };
            if local_term != req.prev_term {
                // Conflict on the prefix; report our earliest index at the
                // conflicting term so the leader can back up past it.
                let hint = self.log.earliest_index_at_term(local_term, req.prev_index);
                self.send_append_response(req.from, local_term, hint, true);
                return;
            }
        }

        self.log.merge(&req.entries);

        if req.commit > self.log.committed() {
            // Bound by what this message vouches for: an entry-free append
            // must not commit past prev_index.
            let vouched = req.prev_index.get() + req.entries.len() as u64;
            self.log
                .commit_to(LogIndex::new(req.commit.get().min(vouched)));
        }
        self.send_append_response(req.from, TermId::new(0), self.log.last_index(), false);
    }

    fn handle_append_entries_response(&mut self, resp: &AppendEntriesResponse) {
        if self.term > resp.term {
            return;
        }

        if resp.reject {
            if resp.index.get() == 0 {
                // Stale-term refusal; the term catch-up already handled it.
                return;
            }
            let mut next = resp.index;
            if resp.log_term.get() != 0 {
                // Skip our whole run of the conflicting term if we have one.
                if let Some(past) = self.log.index_past_term(resp.log_term) {
                    next = past;
                }
            }
            if let Some(pr) = self.progress.get_mut(&resp.from) {
                pr.next = next;
            }
            self.send_append(resp.from);
            return;
        }

        let matched = self.progress.get(&resp.from).map(|pr| pr.matched);
        if matched.is_some_and(|matched| resp.index > matched) {
            if let Some(pr) = self.progress.get_mut(&resp.from) {
                pr.matched = resp.index;
                pr.next = resp.index.next();
            }
            self.maybe_commit();
        }
    }

    /// Advances the commit index to the quorum median, but only for
    /// entries of the current term (Raft §5.4.2).
    fn maybe_commit(&mut self) {
        let mut matches: Vec<u64> = self.progress.values().map(|pr| pr.matched.get()).collect();
        matches.sort_unstable();
        let quorum_index = LogIndex::new(matches[(matches.len() - 1) / 2]);

        if quorum_index <= self.log.committed() {
            return;
        }
        let term_at = match self.log.term(quorum_index) {
            Ok(term) => term,
            Err(err) => panic!("quorum index {quorum_index} unreadable: {err}"),
        };
        if term_at == self.term {
            self.log.commit_to(quorum_index);
            tracing::debug!(
                id = self.id.get(),
                term = self.term.get(),
                committed = quorum_index.get(),
                "commit advanced"
            );
            self.bcast_append();
        }
    }

    fn handle_heartbeat(&mut self, req: &HeartbeatRequest) {
        if self.term > req.term {
            self.msgs.push(Message::HeartbeatResponse(HeartbeatResponse {
                term: self.term,
                from: self.id,
                to: req.from,
                reject: true,
            }));
            return;
        }
        self.lead = Some(req.from);
        self.election_elapsed = 0;
        self.msgs.push(Message::HeartbeatResponse(HeartbeatResponse {
            term: self.term,
            from: self.id,
            to: req.from,
            reject: false,
        }));
    }

    fn append_proposals(&mut self, payloads: Vec<Bytes>) {
        let last = self.log.append(self.term, payloads);
        if let Some(pr) = self.progress.get_mut(&self.id) {
            pr.matched = last;
            pr.next = last.next();
        }
        self.bcast_append();

        if self.progress.len() == 1 {
            self.log.commit_to(last);
        }
    }

    fn reset_randomized_election_timeout(&mut self) {
        self.randomized_election_timeout =
            self.election_tick + self.rng.gen_range(0..self.election_tick);
    }
}
