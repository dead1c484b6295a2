//! Multi-peer protocol scenarios.
//!
//! A small in-process harness multiplexes several peers, routes their
//! outbound messages, and checks the core safety invariants after every
//! delivery round: cursor ordering, contiguous indices, a single leader
//! per term, and monotonic commit.

use std::collections::BTreeMap;

use bytes::Bytes;
use keel_core::{LogIndex, NodeId, TermId};
use keel_raft::{
    AppendEntriesRequest, AppendEntriesResponse, Entry, HeartbeatRequest, MemStorage, Message,
    Raft, RaftConfig, Role,
};

const ELECTION_TICK: u32 = 10;
const HEARTBEAT_TICK: u32 = 2;

fn make_entry(term: u64, index: u64) -> Entry {
    Entry::new(
        TermId::new(term),
        LogIndex::new(index),
        Bytes::from(format!("entry-{index}")),
    )
}

struct Cluster {
    peers: BTreeMap<u64, Raft<MemStorage>>,
    /// Leader observed per term, for the election-safety check.
    leaders_by_term: BTreeMap<u64, u64>,
    /// Last observed commit per peer, for the monotonic-commit check.
    committed: BTreeMap<u64, u64>,
}

impl Cluster {
    /// A fresh cluster with empty logs.
    fn new(ids: &[u64]) -> Self {
        let storages = ids.iter().map(|&id| (id, MemStorage::new())).collect();
        Self::with_storages(ids, storages)
    }

    /// A cluster restored from per-peer storage pre-states.
    fn with_storages(ids: &[u64], storages: Vec<(u64, MemStorage)>) -> Self {
        let voters: Vec<NodeId> = ids.iter().copied().map(NodeId::new).collect();
        let mut peers = BTreeMap::new();
        for (id, storage) in storages {
            let config = RaftConfig::new(NodeId::new(id), voters.clone())
                .with_tick_config(ELECTION_TICK, HEARTBEAT_TICK);
            peers.insert(id, Raft::new(config, storage).unwrap());
        }
        Self {
            peers,
            leaders_by_term: BTreeMap::new(),
            committed: BTreeMap::new(),
        }
    }

    fn peer(&self, id: u64) -> &Raft<MemStorage> {
        &self.peers[&id]
    }

    fn peer_mut(&mut self, id: u64) -> &mut Raft<MemStorage> {
        self.peers.get_mut(&id).unwrap()
    }

    /// Ticks one peer until its role changes (or the bound runs out).
    fn tick_until_campaign(&mut self, id: u64) {
        for _ in 0..2 * ELECTION_TICK {
            if self.peer(id).role() != Role::Follower {
                break;
            }
            self.peer_mut(id).tick();
        }
        assert_ne!(self.peer(id).role(), Role::Follower);
    }

    /// Routes every pending message until the cluster is quiet, checking
    /// invariants after each round. Messages to unknown peers are dropped.
    fn settle(&mut self) {
        loop {
            let mut pending = Vec::new();
            let ids: Vec<u64> = self.peers.keys().copied().collect();
            for id in &ids {
                pending.extend(self.peers.get_mut(id).unwrap().take_messages());
            }
            if pending.is_empty() {
                break;
            }
            for msg in pending {
                let to = msg.to().expect("outbound messages are wire messages");
                if let Some(peer) = self.peers.get_mut(&to.get()) {
                    peer.step(msg).unwrap();
                }
            }
            self.check_invariants();
        }
    }

    /// Delivers pending messages only to `to`, discarding the rest.
    fn deliver_only_to(&mut self, to: u64) {
        let ids: Vec<u64> = self.peers.keys().copied().collect();
        let mut pending = Vec::new();
        for id in &ids {
            pending.extend(self.peers.get_mut(id).unwrap().take_messages());
        }
        for msg in pending {
            if msg.to() == Some(NodeId::new(to)) {
                self.peer_mut(to).step(msg).unwrap();
            }
        }
        self.check_invariants();
    }

    fn check_invariants(&mut self) {
        for (id, peer) in &self.peers {
            let log = peer.log();
            assert!(
                log.applied() <= log.committed(),
                "peer {id}: applied past committed"
            );
            assert!(
                log.committed() <= log.last_index(),
                "peer {id}: committed past last"
            );
            assert!(log.stabled() <= log.last_index(), "peer {id}: stabled past last");
            for (k, entry) in log.entries().iter().enumerate() {
                assert_eq!(
                    entry.index.get(),
                    log.first_index().get() + k as u64,
                    "peer {id}: non-contiguous entries"
                );
            }

            // Monotonic commit.
            let prev = self.committed.get(id).copied().unwrap_or(0);
            assert!(
                log.committed().get() >= prev,
                "peer {id}: commit moved backwards"
            );

            // At most one leader per term.
            if peer.role() == Role::Leader {
                let seen = self
                    .leaders_by_term
                    .entry(peer.term().get())
                    .or_insert(*id);
                assert_eq!(*seen, *id, "two leaders in term {}", peer.term());
            }
        }
        let commits: Vec<(u64, u64)> = self
            .peers
            .iter()
            .map(|(id, peer)| (*id, peer.log().committed().get()))
            .collect();
        for (id, commit) in commits {
            self.committed.insert(id, commit);
        }
    }

    /// Log-matching check across every pair of peers.
    fn check_log_matching(&self) {
        let logs: Vec<&Raft<MemStorage>> = self.peers.values().collect();
        for a in &logs {
            for b in &logs {
                for ea in a.log().entries() {
                    for eb in b.log().entries() {
                        if ea.index == eb.index && ea.term == eb.term {
                            assert_eq!(ea.data, eb.data, "log matching violated");
                        }
                    }
                }
            }
        }
    }
}

/// Election from fresh state: a timed-out follower wins with two grants.
#[test]
fn test_election_from_fresh_state() {
    let mut cluster = Cluster::new(&[1, 2, 3]);

    cluster.tick_until_campaign(1);
    assert_eq!(cluster.peer(1).role(), Role::Candidate);
    assert_eq!(cluster.peer(1).term().get(), 1);

    let msgs = cluster.peer_mut(1).take_messages();
    let votes: Vec<_> = msgs
        .iter()
        .filter_map(|m| match m {
            Message::RequestVote(req) => Some(req),
            _ => None,
        })
        .collect();
    assert_eq!(votes.len(), 2);
    for req in &votes {
        assert_eq!(req.term.get(), 1);
        assert_eq!(req.last_index.get(), 0);
        assert_eq!(req.last_term.get(), 0);
    }

    // Deliver both requests; both peers grant.
    for req in votes {
        cluster
            .peer_mut(req.to.get())
            .step(Message::RequestVote(*req))
            .unwrap();
    }
    let mut grants = Vec::new();
    for id in [2, 3] {
        grants.extend(cluster.peer_mut(id).take_messages());
    }
    for grant in grants {
        cluster.peer_mut(1).step(grant).unwrap();
    }

    assert_eq!(cluster.peer(1).role(), Role::Leader);
    // The no-op landed at (term 1, index 1).
    assert_eq!(cluster.peer(1).log().last_index().get(), 1);
    assert_eq!(
        cluster.peer(1).log().term(LogIndex::new(1)).unwrap().get(),
        1
    );

    let msgs = cluster.peer_mut(1).take_messages();
    let appends = msgs
        .iter()
        .filter(|m| matches!(m, Message::Append(_)))
        .count();
    assert_eq!(appends, 2);
}

/// Commit via quorum with a lagging third peer.
#[test]
fn test_commit_via_quorum_with_laggard() {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    cluster.tick_until_campaign(1);
    cluster.settle();
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    cluster.check_invariants();

    // Quiet cluster; propose and let only peer 2 hear about it.
    cluster
        .peer_mut(1)
        .propose(vec![Bytes::from_static(b"set x=1")])
        .unwrap();
    cluster.deliver_only_to(2); // Append reaches 2.
    cluster.deliver_only_to(1); // 2's accept reaches the leader.

    let proposed = LogIndex::new(2); // no-op at 1, proposal at 2
    assert_eq!(
        cluster.peer(1).progress()[&NodeId::new(2)].matched,
        proposed
    );
    assert_eq!(cluster.peer(1).log().committed(), proposed);
    // Peer 3 heard nothing past the election round.
    assert!(cluster.peer(3).log().committed() < proposed);

    // Once peer 3 hears the broadcast it catches up.
    cluster.settle();
    assert_eq!(cluster.peer(3).log().committed(), proposed);
    cluster.check_log_matching();
}

/// Follower side of conflict backup: the two-step reject hints.
#[test]
fn test_conflict_backup_follower_hints() {
    let mut storage = MemStorage::new();
    storage.append(&[make_entry(1, 1), make_entry(1, 2), make_entry(1, 3)]);
    let mut cluster = Cluster::with_storages(&[1, 2], vec![(2, storage), (1, MemStorage::new())]);

    // prev past the follower's tail: reject with (0, last + 1).
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(2),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(4),
            prev_term: TermId::new(2),
            entries: vec![make_entry(2, 5)],
            commit: LogIndex::new(0),
        }))
        .unwrap();
    let msgs = cluster.peer_mut(2).take_messages();
    let Message::AppendResponse(resp) = &msgs[0] else {
        panic!("expected append response");
    };
    assert!(resp.reject);
    assert_eq!(resp.log_term.get(), 0);
    assert_eq!(resp.index.get(), 4);

    // prev inside the log but the terms disagree: reject with the
    // conflicting term and the earliest local index at that term.
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(2),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(3),
            prev_term: TermId::new(2),
            entries: vec![make_entry(2, 4), make_entry(2, 5)],
            commit: LogIndex::new(0),
        }))
        .unwrap();
    let msgs = cluster.peer_mut(2).take_messages();
    let Message::AppendResponse(resp) = &msgs[0] else {
        panic!("expected append response");
    };
    assert!(resp.reject);
    assert_eq!(resp.log_term.get(), 1);
    assert_eq!(resp.index.get(), 1);

    // Backed all the way up, the overwrite succeeds.
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(2),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(0),
            prev_term: TermId::new(0),
            entries: (1..=5).map(|i| make_entry(2, i)).collect(),
            commit: LogIndex::new(0),
        }))
        .unwrap();
    let msgs = cluster.peer_mut(2).take_messages();
    let Message::AppendResponse(resp) = &msgs[0] else {
        panic!("expected append response");
    };
    assert!(!resp.reject);
    assert_eq!(resp.index.get(), 5);
    for i in 1..=5 {
        assert_eq!(
            cluster.peer(2).log().term(LogIndex::new(i)).unwrap().get(),
            2
        );
    }
    // Overwriting index 1 clamped the durable cursor below it.
    assert_eq!(cluster.peer(2).log().stabled().get(), 0);
}

/// Leader side of conflict backup: adjusting `next` from the reject hints.
#[test]
fn test_conflict_backup_leader_next_adjustment() {
    let mut storage = MemStorage::new();
    storage.append(&(1..=5).map(|i| make_entry(2, i)).collect::<Vec<_>>());
    storage.set_hard_state(keel_raft::HardState {
        term: TermId::new(2),
        vote: None,
        commit: LogIndex::new(0),
    });
    let mut cluster = Cluster::with_storages(&[1, 2], vec![(1, storage), (2, MemStorage::new())]);

    // Elect peer 1 at term 3; its no-op lands at index 6.
    cluster.tick_until_campaign(1);
    let msgs = cluster.peer_mut(1).take_messages();
    cluster
        .peer_mut(2)
        .step(msgs.into_iter().find(|m| matches!(m, Message::RequestVote(_))).unwrap())
        .unwrap();
    // Peer 2's log is empty so it grants.
    let grants = cluster.peer_mut(2).take_messages();
    for grant in grants {
        cluster.peer_mut(1).step(grant).unwrap();
    }
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    assert_eq!(cluster.peer(1).term().get(), 3);
    cluster.peer_mut(1).take_messages();

    // "Behind" hint: next drops straight to the reported index.
    cluster
        .peer_mut(1)
        .step(Message::AppendResponse(AppendEntriesResponse {
            term: TermId::new(3),
            from: NodeId::new(2),
            to: NodeId::new(1),
            log_term: TermId::new(0),
            index: LogIndex::new(4),
            reject: true,
        }))
        .unwrap();
    let msgs = cluster.peer_mut(1).take_messages();
    let Message::Append(retry) = &msgs[0] else {
        panic!("expected append retry");
    };
    assert_eq!(retry.prev_index.get(), 3);
    assert_eq!(retry.prev_term.get(), 2);
    assert_eq!(retry.entries.len(), 3); // indices 4, 5 and the no-op at 6

    // Conflict-term hint for a term the leader never had: fall back to the
    // reported earliest index.
    cluster
        .peer_mut(1)
        .step(Message::AppendResponse(AppendEntriesResponse {
            term: TermId::new(3),
            from: NodeId::new(2),
            to: NodeId::new(1),
            log_term: TermId::new(1),
            index: LogIndex::new(1),
            reject: true,
        }))
        .unwrap();
    let msgs = cluster.peer_mut(1).take_messages();
    let Message::Append(retry) = &msgs[0] else {
        panic!("expected append retry");
    };
    assert_eq!(retry.prev_index.get(), 0);
    assert_eq!(retry.prev_term.get(), 0);
    assert_eq!(retry.entries.len(), 6);
}

/// A split vote resolves in a later term.
#[test]
fn test_split_vote_recovery() {
    let mut cluster = Cluster::new(&[1, 2, 3, 4]);

    // Peers 1 and 2 time out simultaneously.
    cluster.peer_mut(1).step(Message::Hup).unwrap();
    cluster.peer_mut(2).step(Message::Hup).unwrap();
    assert_eq!(cluster.peer(1).role(), Role::Candidate);
    assert_eq!(cluster.peer(2).role(), Role::Candidate);

    // Peer 3 hears candidate 1 first and peer 4 hears candidate 2 first,
    // so each candidate collects one grant and one rejection; the
    // candidates also reject each other.
    let msgs1 = cluster.peer_mut(1).take_messages();
    let msgs2 = cluster.peer_mut(2).take_messages();
    let pick = |msgs: &[Message], to: u64| -> Message {
        msgs.iter()
            .find(|m| m.to() == Some(NodeId::new(to)))
            .unwrap()
            .clone()
    };
    for (to, msg) in [
        (3, pick(&msgs1, 3)),
        (4, pick(&msgs2, 4)),
        (4, pick(&msgs1, 4)),
        (3, pick(&msgs2, 3)),
        (2, pick(&msgs1, 2)),
        (1, pick(&msgs2, 1)),
    ] {
        cluster.peer_mut(to).step(msg).unwrap();
    }
    cluster.settle();

    // Nobody reached three grants, so term 1 has no leader.
    assert!(cluster
        .peers
        .values()
        .all(|peer| peer.role() != Role::Leader));

    // Only peer 1 times out next; its term-2 campaign wins.
    for _ in 0..2 * ELECTION_TICK {
        if cluster.peer(1).term().get() >= 2 {
            break;
        }
        cluster.peer_mut(1).tick();
    }
    assert_eq!(cluster.peer(1).term().get(), 2);
    cluster.settle();
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    assert_eq!(cluster.peer(1).term().get(), 2);
}

/// A higher-term peer demotes the sitting leader, and the
/// old leader's conflicting entry is overwritten.
#[test]
fn test_higher_term_demotion_and_convergence() {
    let mut cluster = Cluster::new(&[1, 2, 3]);

    // Peer 1 wins term 1 but its appends never leave the building.
    cluster.tick_until_campaign(1);
    let msgs = cluster.peer_mut(1).take_messages();
    for msg in msgs {
        let to = msg.to().unwrap().get();
        cluster.peer_mut(to).step(msg).unwrap();
    }
    for id in [2, 3] {
        let grants = cluster.peer_mut(id).take_messages();
        for grant in grants {
            cluster.peer_mut(1).step(grant).unwrap();
        }
    }
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    cluster.peer_mut(1).take_messages(); // drop the appends

    // Peer 3 campaigns at term 2 and wins with peer 2's grant.
    cluster.peer_mut(3).step(Message::Hup).unwrap();
    cluster.settle();

    assert_eq!(cluster.peer(3).role(), Role::Leader);
    assert_eq!(cluster.peer(3).term().get(), 2);
    // The deposed leader followed the new one and adopted its entry.
    assert_eq!(cluster.peer(1).role(), Role::Follower);
    assert_eq!(cluster.peer(1).leader_id(), Some(NodeId::new(3)));
    assert_eq!(
        cluster.peer(1).log().term(LogIndex::new(1)).unwrap().get(),
        2
    );
    cluster.check_log_matching();
}

/// A prior-term entry is only committed by carrying it
/// under a current-term quorum.
#[test]
fn test_commit_only_current_term() {
    let mut storage = MemStorage::new();
    let mut entries: Vec<Entry> = (1..=5).map(|i| make_entry(1, i)).collect();
    entries.push(make_entry(2, 6));
    entries.push(make_entry(2, 7));
    storage.append(&entries);
    storage.set_hard_state(keel_raft::HardState {
        term: TermId::new(2),
        vote: None,
        commit: LogIndex::new(0),
    });
    let mut cluster =
        Cluster::with_storages(&[1, 2, 3], vec![(1, storage), (2, MemStorage::new()), (3, MemStorage::new())]);

    // Peer 1 campaigns at term 3; peer 2 grants; the no-op lands at 8.
    cluster.tick_until_campaign(1);
    let msgs = cluster.peer_mut(1).take_messages();
    for msg in msgs {
        if msg.to() == Some(NodeId::new(2)) {
            cluster.peer_mut(2).step(msg).unwrap();
        }
    }
    let grants = cluster.peer_mut(2).take_messages();
    for grant in grants {
        cluster.peer_mut(1).step(grant).unwrap();
    }
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    assert_eq!(cluster.peer(1).term().get(), 3);
    assert_eq!(cluster.peer(1).log().last_index().get(), 8);
    cluster.peer_mut(1).take_messages();

    // A quorum matches the prior-term entry at 7: no commit.
    cluster
        .peer_mut(1)
        .step(Message::AppendResponse(AppendEntriesResponse {
            term: TermId::new(3),
            from: NodeId::new(2),
            to: NodeId::new(1),
            log_term: TermId::new(0),
            index: LogIndex::new(7),
            reject: false,
        }))
        .unwrap();
    assert_eq!(cluster.peer(1).log().committed().get(), 0);

    // Quorum on the term-3 no-op carries everything below it.
    cluster
        .peer_mut(1)
        .step(Message::AppendResponse(AppendEntriesResponse {
            term: TermId::new(3),
            from: NodeId::new(2),
            to: NodeId::new(1),
            log_term: TermId::new(0),
            index: LogIndex::new(8),
            reject: false,
        }))
        .unwrap();
    assert_eq!(cluster.peer(1).log().committed().get(), 8);
}

/// An accepted append applied twice is a no-op after the first.
#[test]
fn test_idempotent_redelivery() {
    let mut cluster = Cluster::new(&[1, 2]);
    let append = Message::Append(AppendEntriesRequest {
        term: TermId::new(1),
        from: NodeId::new(1),
        to: NodeId::new(2),
        prev_index: LogIndex::new(0),
        prev_term: TermId::new(0),
        entries: vec![make_entry(1, 1), make_entry(1, 2)],
        commit: LogIndex::new(1),
    });

    cluster.peer_mut(2).step(append.clone()).unwrap();
    let first = cluster.peer_mut(2).take_messages();
    let entries_after_first = cluster.peer(2).log().entries().to_vec();

    cluster.peer_mut(2).step(append).unwrap();
    let second = cluster.peer_mut(2).take_messages();

    assert_eq!(first, second);
    assert_eq!(cluster.peer(2).log().entries(), &entries_after_first[..]);
    assert_eq!(cluster.peer(2).log().committed().get(), 1);
}

/// An entry-free append may advance the commit but only as far as the
/// message vouches.
#[test]
fn test_entry_free_append_bounds_commit() {
    let mut cluster = Cluster::new(&[1, 2]);
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(1),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(0),
            prev_term: TermId::new(0),
            entries: (1..=3).map(|i| make_entry(1, i)).collect(),
            commit: LogIndex::new(0),
        }))
        .unwrap();
    cluster.peer_mut(2).take_messages();

    // The leader claims commit 3 but vouches only up to prev_index 2.
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(1),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(2),
            prev_term: TermId::new(1),
            entries: Vec::new(),
            commit: LogIndex::new(3),
        }))
        .unwrap();

    assert_eq!(cluster.peer(2).log().committed().get(), 2);
    // The accept response still reports the full local tail.
    let msgs = cluster.peer_mut(2).take_messages();
    let Message::AppendResponse(resp) = &msgs[0] else {
        panic!("expected append response");
    };
    assert!(!resp.reject);
    assert_eq!(resp.index.get(), 3);
}

/// Two-peer cluster: either peer going quiet halts commit progress, and
/// its return resumes it.
#[test]
fn test_two_peer_commit_halts_and_resumes() {
    let mut cluster = Cluster::new(&[1, 2]);
    cluster.tick_until_campaign(1);
    cluster.settle();
    assert_eq!(cluster.peer(1).role(), Role::Leader);
    let baseline = cluster.peer(1).log().committed();

    // Peer 2 hears nothing: the proposal cannot commit.
    cluster
        .peer_mut(1)
        .propose(vec![Bytes::from_static(b"set x=1")])
        .unwrap();
    cluster.peer_mut(1).take_messages();
    assert_eq!(cluster.peer(1).log().committed(), baseline);

    // Heartbeat-response path re-sends the entry once peer 2 is back.
    cluster.peer_mut(1).step(Message::Beat).unwrap();
    cluster.settle();
    assert_eq!(
        cluster.peer(1).log().committed().get(),
        baseline.get() + 1
    );
    assert_eq!(
        cluster.peer(2).log().committed().get(),
        baseline.get() + 1
    );
}

/// Rebuilding a peer from its persisted prefix reproduces the log.
#[test]
fn test_restart_roundtrip() {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    cluster.tick_until_campaign(1);
    cluster.settle();
    cluster
        .peer_mut(1)
        .propose(vec![Bytes::from_static(b"set x=1"), Bytes::from_static(b"set y=2")])
        .unwrap();
    cluster.settle();

    let survivor = cluster.peer_mut(2);
    // Host persists the unstable window, then confirms it.
    let last = survivor.log().last_index();
    survivor.advance_stable(last);
    let entries = survivor.log().entries().to_vec();
    let hard_state = survivor.hard_state();

    let mut storage = MemStorage::with_voters(
        [1, 2, 3].iter().copied().map(NodeId::new).collect(),
    );
    storage.append(&entries);
    storage.set_hard_state(hard_state);
    let config = RaftConfig::new(NodeId::new(2), Vec::new())
        .with_tick_config(ELECTION_TICK, HEARTBEAT_TICK);
    let reborn = Raft::new(config, storage).unwrap();

    assert_eq!(reborn.term(), hard_state.term);
    assert_eq!(reborn.hard_state(), hard_state);
    assert_eq!(reborn.log().entries(), &entries[..]);
    assert_eq!(reborn.log().committed(), hard_state.commit);
    assert_eq!(reborn.log().stabled(), last);
}

/// Truncation clamps the durable cursor but never the commit cursor.
#[test]
fn test_truncation_clamps_stabled_not_committed() {
    let mut storage = MemStorage::new();
    storage.append(&[make_entry(1, 1), make_entry(1, 2), make_entry(1, 3)]);
    storage.set_hard_state(keel_raft::HardState {
        term: TermId::new(1),
        vote: None,
        commit: LogIndex::new(1),
    });
    let mut cluster = Cluster::with_storages(&[1, 2], vec![(2, storage), (1, MemStorage::new())]);
    assert_eq!(cluster.peer(2).log().stabled().get(), 3);

    // A term-2 leader overwrites the uncommitted suffix at index 2.
    cluster
        .peer_mut(2)
        .step(Message::Append(AppendEntriesRequest {
            term: TermId::new(2),
            from: NodeId::new(1),
            to: NodeId::new(2),
            prev_index: LogIndex::new(1),
            prev_term: TermId::new(1),
            entries: vec![make_entry(2, 2)],
            commit: LogIndex::new(1),
        }))
        .unwrap();

    assert_eq!(cluster.peer(2).log().stabled().get(), 1);
    assert_eq!(cluster.peer(2).log().committed().get(), 1);
    assert_eq!(cluster.peer(2).log().last_index().get(), 2);
}

/// Heartbeats carry no entries and no commit; followers learn commits
/// from the next append.
#[test]
fn test_heartbeat_carries_no_commit() {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    cluster.tick_until_campaign(1);
    cluster.settle();
    assert_eq!(cluster.peer(1).role(), Role::Leader);

    cluster.peer_mut(1).step(Message::Beat).unwrap();
    let msgs = cluster.peer_mut(1).take_messages();
    let beats: Vec<_> = msgs
        .iter()
        .filter_map(|m| match m {
            Message::Heartbeat(req) => Some(req),
            _ => None,
        })
        .collect();
    assert_eq!(beats.len(), 2);
    // The heartbeat struct has no entry or commit payload by construction;
    // what we assert is that it is answered, not merged.
    let heartbeat = Message::Heartbeat(HeartbeatRequest {
        term: cluster.peer(1).term(),
        from: NodeId::new(1),
        to: NodeId::new(2),
    });
    let before = cluster.peer(2).log().entries().to_vec();
    cluster.peer_mut(2).step(heartbeat).unwrap();
    assert_eq!(cluster.peer(2).log().entries(), &before[..]);
}
