//! Low-level API for the complete state of a Raft node.
//!
//! [`State`] exposes the raw election and replication machinery with one method per protocol
//! event. Most callers want the [`Node`](crate::node::Node) wrapper, which chains the follow-up
//! sends these methods leave pending.

use std::collections::{BTreeMap, BTreeSet};
use core::fmt;
use core::iter;
use core::mem;

use bytes::Bytes;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::clock::{ElectionClock, HeartbeatClock};
use crate::cluster::Cluster;
use crate::log::{CommittedIter, Log, LogState};
use crate::message::{
    AppendRequest, AppendResponse, LogEntry, LogIndex, Message, MessageDestination, Rpc,
    SendableMessage, SnapshotRequest, SnapshotResponse, Term, VoteRequest, VoteResponse,
};
use crate::node::{AppendError, Config};
use crate::persist::{HardState, StableStore};

use self::RoleState::*;

/// The replication state a leader keeps for one of its peers.
pub struct ReplicationState {
    /// The index of the next log entry to send to this peer.
    pub next_index: LogIndex,

    /// The last index up to which this peer's log is known to match this node's log. Commit
    /// advancement is computed over these.
    pub match_index: LogIndex,

    /// The index of the last entry sent to this peer and not yet acknowledged.
    pub inflight: Option<LogIndex>,

    /// Ticks left before the in-flight request is considered lost and retried.
    inflight_ticks: u32,

    /// Whether the next send should carry no entries, to probe for the peer's true
    /// [`match_index`][Self::match_index].
    pub send_probe: bool,

    /// Whether a heartbeat is due for this peer.
    send_heartbeat: bool,
}

/// Which of the three protocol roles a node currently holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Answering vote and append requests, waiting out the election clock.
    Follower,
    /// Soliciting votes after an election timeout.
    Candidate,
    /// Replicating the log and sending heartbeats.
    Leader,
}

enum RoleState<N> {
    Follower(FollowerState<N>),
    Candidate(CandidateState<N>),
    Leader(LeaderState<N>),
}

struct FollowerState<N> {
    /// The leader this follower last heard from in the current term, kept to redirect clients.
    leader: Option<N>,

    clock: ElectionClock,
}

struct CandidateState<N> {
    /// The peers that granted us their vote this term, self included.
    votes_granted: BTreeSet<N>,

    clock: ElectionClock,
}

struct LeaderState<N> {
    followers: BTreeMap<N, ReplicationState>,

    clock: HeartbeatClock,
}

/// The complete state of a Raft node.
pub struct State<L, S, Random, N> {
    cluster: Cluster<N>,
    random: Random,
    config: Config,
    stable: S,

    /// The highest leadership term seen. Durable through `stable`.
    current_term: Term,

    /// The candidate granted this node's vote in `current_term`. Durable through `stable`.
    voted_for: Option<N>,

    role: RoleState<N>,

    log: LogState<L>,
}

#[allow(missing_docs)]
impl<L, S, Random, N> State<L, S, Random, N>
where
    L: Log,
    S: StableStore<N>,
    Random: RngCore,
    N: Ord + Clone + fmt::Display,
{
    /// Constructs the node state, restoring any term and vote found in `stable`.
    ///
    /// # Errors
    ///
    /// If `stable` cannot be read, an error is returned.
    pub fn new(
        cluster: Cluster<N>,
        log: L,
        mut stable: S,
        mut random: Random,
        config: Config,
    ) -> Result<Self, S::Error> {
        let HardState {
            current_term,
            voted_for,
        } = stable.load()?.unwrap_or_default();
        let clock = ElectionClock::new(
            &mut random,
            config.election_ticks_min(),
            config.election_ticks_max(),
        );
        Ok(Self {
            cluster,
            random,
            config,
            stable,
            current_term,
            voted_for,
            role: Follower(FollowerState {
                leader: None,
                clock,
            }),
            log: LogState::new(log),
        })
    }

    pub fn cluster(&self) -> &Cluster<N> {
        &self.cluster
    }

    pub fn commit_index(&self) -> LogIndex {
        self.log.commit_index
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_leader(&self) -> bool {
        matches!(&self.role, Leader(_))
    }

    pub fn role(&self) -> Role {
        match &self.role {
            Follower(_) => Role::Follower,
            Candidate(_) => Role::Candidate,
            Leader(_) => Role::Leader,
        }
    }

    /// Returns the believed leader of the latest known term, if any, along with the term.
    pub fn leader(&self) -> (Option<&N>, Term) {
        let leader = match &self.role {
            Follower(follower_state) => follower_state.leader.as_ref(),
            Candidate(_) => None,
            Leader(_) => Some(self.cluster.self_id()),
        };
        (leader, self.current_term)
    }

    pub fn log(&self) -> &L {
        self.log.log()
    }

    pub fn log_mut(&mut self) -> &mut L {
        self.log.log_mut()
    }

    pub fn node_id(&self) -> &N {
        self.cluster.self_id()
    }

    pub fn replication_state(&self, peer_id: &N) -> Option<&ReplicationState> {
        if let Leader(leader_state) = &self.role {
            leader_state.followers.get(peer_id)
        } else {
            None
        }
    }

    /// Returns the stable store, for inspection or maintenance.
    pub fn stable_mut(&mut self) -> &mut S {
        &mut self.stable
    }

    pub fn take_committed(&mut self) -> CommittedIter<'_, L> {
        self.log.take_committed()
    }

    /// Advances the node's clock by one tick. May start an election (followers and candidates),
    /// schedule a heartbeat round, or expire an unacknowledged append past the RPC timeout
    /// (leaders).
    ///
    /// # Errors
    ///
    /// If the stable store fails while starting an election, an error is returned and no message
    /// is produced; the node must not be driven further.
    pub fn timer_tick(&mut self) -> Result<Option<SendableMessage<N>>, S::Error> {
        let heartbeat_ticks = self.config.heartbeat_ticks();
        match &mut self.role {
            Follower(FollowerState { clock, .. }) | Candidate(CandidateState { clock, .. }) => {
                if clock.tick() {
                    info!("election timeout at {}", self.current_term);
                    return self.timeout();
                }
            }
            Leader(leader_state) => {
                if leader_state.clock.tick(heartbeat_ticks) {
                    debug!("heartbeat round at {}", self.current_term);
                    for replication in leader_state.followers.values_mut() {
                        replication.send_heartbeat = true;
                    }
                }
                for (peer_id, replication) in &mut leader_state.followers {
                    if replication.inflight.is_some() {
                        replication.inflight_ticks = replication.inflight_ticks.saturating_sub(1);
                        if replication.inflight_ticks == 0 {
                            info!("append to {} unacknowledged past the rpc timeout", peer_id);
                            replication.inflight = None;
                            replication.send_heartbeat = true;
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Restores a peer's replication state after the transport observed it reconnect, so the
    /// leader probes it afresh instead of waiting out an in-flight request that died with the
    /// connection. Candidates re-send their vote request to the peer.
    pub fn reset_peer(&mut self, peer_id: N) -> Option<SendableMessage<N>> {
        match &mut self.role {
            Follower(_) => None,
            Candidate(_) => {
                if self.cluster.peers().contains(&peer_id) {
                    let vote_request = self.vote_request();
                    vote_request.map(|message| SendableMessage {
                        message,
                        dest: MessageDestination::To(peer_id),
                    })
                } else {
                    None
                }
            }
            Leader(leader_state) => {
                if let Some(replication) = leader_state.followers.get_mut(&peer_id) {
                    info!("resetting replication state of {}", &peer_id);
                    replication.next_index = self.log.last_index() + 1;
                    replication.send_probe = true;
                    replication.send_heartbeat = true;
                    replication.inflight = None;
                }
                None
            }
        }
    }

    /// Starts an election: increments the term, votes for itself, persists both, and asks every
    /// peer for its vote. No-op for leaders.
    ///
    /// # Errors
    ///
    /// If the new term and vote cannot be persisted, an error is returned and no vote request is
    /// produced; the node must not be driven further.
    pub fn timeout(&mut self) -> Result<Option<SendableMessage<N>>, S::Error> {
        match &self.role {
            Follower(_) | Candidate(_) => {
                self.current_term += 1;
                self.voted_for = Some(self.node_id().clone());
                self.save_hard_state()?;
                let votes_granted = iter::once(self.node_id().clone()).collect();
                let clock = ElectionClock::new(
                    &mut self.random,
                    self.config.election_ticks_min(),
                    self.config.election_ticks_max(),
                );
                self.role = Candidate(CandidateState {
                    votes_granted,
                    clock,
                });

                info!("became candidate at {}", self.current_term);
                self.try_become_leader();
                self.advance_commit_index();
                Ok(self.vote_request().map(|message| SendableMessage {
                    message,
                    dest: MessageDestination::Broadcast,
                }))
            }
            Leader(_) => Ok(None),
        }
    }

    /// Requests appending an entry carrying `command` to the replicated log.
    ///
    /// # Errors
    ///
    /// Unless this node is the leader, the command is handed back along with the believed leader
    /// so the caller can redirect. A log storage failure is returned as
    /// [`AppendError::Log`].
    pub fn submit(&mut self, command: Bytes) -> Result<(), AppendError<N, L::Error>> {
        if let Leader(_) = &self.role {
            let entry = LogEntry {
                term: self.current_term,
                command,
            };
            self.log.append(entry).map_err(AppendError::Log)?;
            self.advance_commit_index();
            Ok(())
        } else {
            let (leader, _) = self.leader();
            Err(AppendError::NotLeader {
                leader: leader.cloned(),
                command,
            })
        }
    }

    /// Builds the next AppendEntries for `to_node_id`, if one is due: entries from the peer's
    /// `next_index` onward within the chunk limit, or an empty heartbeat/probe. At most one
    /// request per peer is in flight at a time; a request unacknowledged past the RPC timeout is
    /// retried on a later tick.
    pub fn append_entries(&mut self, to_node_id: N) -> Option<SendableMessage<N>> {
        let rpc_timeout_ticks = self.config.rpc_timeout_ticks();
        let max_entries_size = self.config.replication_chunk_size;
        if let Leader(leader_state) = &mut self.role {
            let replication = match leader_state.followers.get_mut(&to_node_id) {
                Some(replication) => replication,
                None => return None,
            };
            let last_log_index = self.log.last_index();
            let next_index = replication.next_index;
            let send_entries = last_log_index >= next_index && !replication.send_probe;
            if !send_entries && !replication.send_heartbeat {
                return None;
            }
            if replication.inflight.is_some() {
                return None;
            }
            let prev_log_index = next_index - 1;
            let maybe_prev_log_term = if prev_log_index != LogIndex::default() {
                self.log.term_at(prev_log_index)
            } else {
                Some(Term::default())
            };

            let prev_log_term = match maybe_prev_log_term {
                Some(prev_log_term) => prev_log_term,
                None => {
                    // discarded prefix: only a snapshot could catch this peer up
                    error!("log entry {} for {} is gone", &prev_log_index, &to_node_id);
                    return None;
                }
            };

            let mut entries: Vec<LogEntry> = Vec::new();
            let last_entry: LogIndex;
            if send_entries {
                let mut entries_size = 0usize;
                let entry_indexes = (0..)
                    .map(|offset| next_index + offset)
                    .take_while(|index| *index <= last_log_index);
                for entry_index in entry_indexes {
                    let next_entry = if let Some(entry) = self.log.get(entry_index) {
                        let first_entry = entries_size == 0;
                        if !first_entry && entries_size == max_entries_size {
                            None
                        } else {
                            entries_size = entries_size.saturating_add(self.log.entry_len(&entry));
                            if first_entry || entries_size <= max_entries_size {
                                Some(entry)
                            } else {
                                None
                            }
                        }
                    } else {
                        error!("failed to read log entry {} for {}", &entry_index, &to_node_id);
                        None
                    };
                    if let Some(entry) = next_entry {
                        entries.push(entry);
                    } else {
                        break;
                    }
                }
                last_entry = prev_log_index + (entries.len() as u64);
            } else {
                last_entry = prev_log_index;
            }
            let append_request = Message {
                term: self.current_term,
                rpc: Rpc::AppendRequest(AppendRequest {
                    leader_id: self.cluster.self_id().clone(),
                    prev_log_index,
                    prev_log_term,
                    leader_commit: self.log.commit_index.min(last_entry),
                    entries,
                }),
            };
            replication.send_heartbeat = false;
            replication.inflight = Some(last_entry);
            replication.inflight_ticks = rpc_timeout_ticks;
            Some(SendableMessage {
                message: append_request,
                dest: MessageDestination::To(to_node_id),
            })
        } else {
            None
        }
    }

    /// Processes a message from the peer `from`, returning the direct reply if one is due.
    ///
    /// # Errors
    ///
    /// If the stable store fails while adopting a term or granting a vote, an error is returned
    /// and no reply is produced; the node must not be driven further.
    pub fn receive(
        &mut self,
        msg: Message<N>,
        from: N,
    ) -> Result<Option<SendableMessage<N>>, S::Error> {
        if !self.cluster.peers().contains(&from) {
            error!("received message from {} outside the cluster", &from);
            return Ok(None);
        }
        self.update_term(&from, &msg)?;
        let reply = match msg.rpc {
            Rpc::VoteRequest(request) => self.handle_vote_request(msg.term, request)?,
            Rpc::VoteResponse(response) => match self.drop_stale_response(msg.term, response) {
                Ok(()) => None,
                Err(response) => self.handle_vote_response(msg.term, response, from),
            },
            Rpc::AppendRequest(request) => self.handle_append_request(msg.term, request),
            Rpc::AppendResponse(response) => match self.drop_stale_response(msg.term, response) {
                Ok(()) => None,
                Err(response) => self.handle_append_response(msg.term, response, from),
            },
            Rpc::SnapshotRequest(request) => self.handle_snapshot_request(msg.term, request),
            Rpc::SnapshotResponse(response) => {
                // stub: nothing to track until snapshot transfer exists
                let _ignore = self.drop_stale_response(msg.term, response);
                None
            }
        };
        self.try_become_leader();
        self.advance_commit_index();
        Ok(reply)
    }

    //
    // message handlers
    //

    /// Answers a vote request, granting at most one vote per term and only to candidates whose
    /// log is at least as up to date as ours (Raft §5.2, §5.4.1). The grant is persisted before
    /// the reply exists.
    fn handle_vote_request(
        &mut self,
        msg_term: Term,
        msg: VoteRequest<N>,
    ) -> Result<Option<SendableMessage<N>>, S::Error> {
        let VoteRequest {
            candidate_id,
            last_log_index,
            last_log_term,
        } = msg;
        if !self.cluster.peers().contains(&candidate_id) {
            warn!("ignoring vote request for unknown candidate {}", &candidate_id);
            return Ok(None);
        }
        let our_last_index = self.log.last_index();
        let our_last_term = self.log.last_term();
        let log_ok = last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index);
        let grant = msg_term == self.current_term
            && log_ok
            && (self.voted_for.iter()).all(|vote| vote == &candidate_id);
        assert!(msg_term <= self.current_term);

        if grant {
            self.voted_for = Some(candidate_id.clone());
            self.save_hard_state()?;
            info!(
                "granted vote at {} to {} with {} at {}, own log at {} at {}",
                &self.current_term,
                &candidate_id,
                &last_log_index,
                &last_log_term,
                &our_last_index,
                &our_last_term
            );
            if let Follower(FollowerState { clock, .. }) = &mut self.role {
                clock.restart();
            }
        } else if msg_term != self.current_term {
            info!(
                "rejected vote request with stale {} < {} from {}",
                &msg_term, &self.current_term, &candidate_id
            );
        } else if let Some(vote) = &self.voted_for {
            info!(
                "rejected vote at {} for {}, already voted for {}",
                &self.current_term, &candidate_id, vote
            );
        } else {
            info!(
                "rejected vote at {} for {} with {} at {}, own log at {} at {}",
                &self.current_term,
                &candidate_id,
                &last_log_index,
                &last_log_term,
                &our_last_index,
                &our_last_term
            );
        }

        let message = Message {
            term: self.current_term,
            rpc: Rpc::VoteResponse(VoteResponse {
                vote_granted: grant,
            }),
        };
        Ok(Some(SendableMessage {
            message,
            dest: MessageDestination::To(candidate_id),
        }))
    }

    fn handle_vote_response(
        &mut self,
        msg_term: Term,
        msg: VoteResponse,
        from: N,
    ) -> Option<SendableMessage<N>> {
        assert!(msg_term == self.current_term);
        if let Candidate(candidate_state) = &mut self.role {
            if msg.vote_granted {
                info!("vote granted by {} at {}", &from, &self.current_term);
                candidate_state.votes_granted.insert(from);
            } else {
                info!("vote denied by {} at {}", &from, &self.current_term);
            }
        }
        None
    }

    /// Answers an append request: recognizes the sender as leader, verifies the log matches at
    /// `prev_log_index`, reconciles conflicts by truncating from the first disagreeing entry,
    /// appends what is missing, and advances the commit index to what the leader has proven
    /// (Raft §5.3).
    fn handle_append_request(
        &mut self,
        msg_term: Term,
        msg: AppendRequest<N>,
    ) -> Option<SendableMessage<N>> {
        let AppendRequest {
            leader_id,
            prev_log_index,
            prev_log_term,
            leader_commit,
            entries,
        } = msg;
        if !self.cluster.peers().contains(&leader_id) {
            warn!("ignoring append request from unknown leader {}", &leader_id);
            return None;
        }
        let our_prev_log_term = self.log.term_at(prev_log_index);
        let log_ok =
            prev_log_index == LogIndex::default() || Some(prev_log_term) == our_prev_log_term;
        assert!(msg_term <= self.current_term);

        if msg_term == self.current_term {
            self.recognize_leader(&leader_id);
        }

        if msg_term < self.current_term
            || (assert_true!(msg_term == self.current_term)
                && assert_match!(Follower(_) = &self.role)
                && !log_ok)
        {
            if msg_term < self.current_term {
                info!(
                    "rejected append request with stale {} < {} from {}",
                    &msg_term, &self.current_term, &leader_id
                );
            } else if let Some(our_prev_log_term) = our_prev_log_term {
                warn!(
                    "rejected append from {} at {} with {}, own entry at {}",
                    &leader_id, &prev_log_index, &prev_log_term, &our_prev_log_term
                );
            } else {
                info!(
                    "rejected append from {} at {}, own log ends at {}",
                    &leader_id,
                    &prev_log_index,
                    self.log.last_index()
                );
            }

            let message = Message {
                term: self.current_term,
                rpc: Rpc::AppendResponse(AppendResponse {
                    success: false,
                    match_index: self.log.prev_index(),
                    last_log_index: self.log.last_index(),
                }),
            };
            Some(SendableMessage {
                message,
                dest: MessageDestination::To(leader_id),
            })
        } else {
            assert!(msg_term == self.current_term);
            assert_match!(Follower(_) = &self.role);
            assert!(log_ok);

            let msg_last_index = prev_log_index + (entries.len() as u64);
            let entry_iter = (1..).map(|offset| prev_log_index + offset).zip(entries);
            let mut last_processed = prev_log_index;
            for (entry_index, entry) in entry_iter {
                if entry_index == self.log.last_index() + 1 {
                    match self.log.append(entry) {
                        Ok(()) => (),
                        Err(_) => break,
                    }
                } else if let Some(existing_term) = self.log.term_at(entry_index) {
                    if existing_term != entry.term {
                        // conflicting suffix loses to the leader; committed entries never conflict
                        assert!(entry_index > self.log.commit_index);
                        match self.log.truncate_from(entry_index) {
                            Ok(removed) => info!(
                                "dropped {} conflicting entries from {}",
                                removed, &entry_index
                            ),
                            Err(_) => break,
                        }
                        match self.log.append(entry) {
                            Ok(()) => (),
                            Err(_) => break,
                        }
                    }
                } else {
                    error!("failed to read log entry {} while reconciling", &entry_index);
                    break;
                }
                last_processed = entry_index;
            }

            // only entries verified against the leader's prefix may commit here
            let leader_commit = leader_commit.min(last_processed);
            if leader_commit > self.log.commit_index {
                debug!(
                    "committed entries from {} to {}",
                    &self.log.commit_index, &leader_commit
                );
                self.log.commit_index = leader_commit;
            }

            let message = Message {
                term: self.current_term,
                rpc: Rpc::AppendResponse(AppendResponse {
                    success: true,
                    match_index: msg_last_index.min(self.log.last_index()),
                    last_log_index: self.log.last_index(),
                }),
            };
            Some(SendableMessage {
                message,
                dest: MessageDestination::To(leader_id),
            })
        }
    }

    fn handle_append_response(
        &mut self,
        msg_term: Term,
        msg: AppendResponse,
        from: N,
    ) -> Option<SendableMessage<N>> {
        assert!(msg_term == self.current_term);
        let max_entries_size = self.config.replication_chunk_size;
        if let Leader(leader_state) = &mut self.role {
            if let Some(replication) = leader_state.followers.get_mut(&from) {
                if msg.success {
                    if Some(msg.match_index) >= replication.inflight {
                        replication.inflight = None;
                    }
                    if msg.match_index + 1 > replication.next_index {
                        replication.next_index = msg.match_index + 1;
                    }
                    if msg.match_index > replication.match_index {
                        replication.match_index = msg.match_index;
                    }
                    replication.send_probe = false;
                } else {
                    if !replication.send_probe {
                        info!(
                            "append rejected at {} by {} holding {}",
                            &replication.next_index, &from, &msg.last_log_index
                        );
                    } else {
                        verbose!(
                            "append rejected at {} by {} holding {}",
                            &replication.next_index,
                            &from,
                            &msg.last_log_index
                        );
                    }
                    replication.next_index = (replication.next_index - 1)
                        .min(msg.last_log_index + 1)
                        .max(msg.match_index + 1);
                    replication.send_probe = true;
                    replication.inflight = None;

                    // back further off so the retry already carries a full chunk
                    let mut chunk_size_remaining = max_entries_size;
                    while let Some(next_index) = replication.next_index.checked_sub(1) {
                        if next_index <= msg.match_index {
                            break;
                        }
                        let entry_len = match self.log.get_len(replication.next_index) {
                            Some(entry_len) => entry_len,
                            None => break,
                        };
                        chunk_size_remaining = match chunk_size_remaining.checked_sub(entry_len) {
                            Some(remaining) => remaining,
                            None => break,
                        };
                        replication.next_index = next_index;
                    }
                }
            }
        }
        None
    }

    /// Acknowledges a snapshot offer without installing anything: snapshot transfer is a stub
    /// pending log compaction. The sender is still recognized as leader for its term.
    fn handle_snapshot_request(
        &mut self,
        msg_term: Term,
        msg: SnapshotRequest<N>,
    ) -> Option<SendableMessage<N>> {
        let SnapshotRequest {
            leader_id,
            last_included_index,
            last_included_term,
            data: _,
        } = msg;
        if !self.cluster.peers().contains(&leader_id) {
            warn!("ignoring snapshot request from unknown leader {}", &leader_id);
            return None;
        }
        assert!(msg_term <= self.current_term);
        if msg_term == self.current_term {
            self.recognize_leader(&leader_id);
            warn!(
                "ignoring snapshot through {} at {} from {}, installation not implemented",
                &last_included_index, &last_included_term, &leader_id
            );
        }
        let message = Message {
            term: self.current_term,
            rpc: Rpc::SnapshotResponse(SnapshotResponse {}),
        };
        Some(SendableMessage {
            message,
            dest: MessageDestination::To(leader_id),
        })
    }

    //
    // role and term transitions
    //

    /// Accepts `leader_id` as the legitimate leader of the current term: candidates step down,
    /// followers restart their election clock. A leader hearing from another leader of its own
    /// term means election safety is broken, which is unrecoverable.
    fn recognize_leader(&mut self, leader_id: &N) {
        match &mut self.role {
            Candidate(_) => {
                let clock = ElectionClock::new(
                    &mut self.random,
                    self.config.election_ticks_min(),
                    self.config.election_ticks_max(),
                );
                self.role = Follower(FollowerState {
                    leader: Some(leader_id.clone()),
                    clock,
                });
                info!("became follower of {} at {}", leader_id, &self.current_term);
            }
            Follower(follower_state) => {
                if follower_state.leader.is_none() {
                    info!("became follower of {} at {}", leader_id, &self.current_term);
                }
                follower_state.leader = Some(leader_id.clone());
                follower_state.clock.restart();
            }
            Leader(_) => {
                panic!(
                    "second leader {} in term {}",
                    leader_id, &self.current_term
                );
            }
        }
    }

    /// Promotes a candidate holding a majority of votes: reinitializes the per-peer replication
    /// state, schedules an immediate heartbeat round, and appends an empty entry in the new term
    /// so entries from prior terms become committable (Raft §5.4.2).
    fn try_become_leader(&mut self) {
        if let Candidate(candidate_state) = &self.role {
            if candidate_state.votes_granted.len() >= self.cluster.majority() {
                info!("became leader at {}", &self.current_term);
                let next_index = self.log.last_index() + 1;
                self.role = Leader(LeaderState {
                    followers: (self.cluster.peers().iter().cloned())
                        .map(|id| {
                            (
                                id,
                                ReplicationState {
                                    next_index,
                                    match_index: LogIndex::default(),
                                    inflight: None,
                                    inflight_ticks: 0,
                                    send_probe: false,
                                    send_heartbeat: true,
                                },
                            )
                        })
                        .collect(),
                    clock: HeartbeatClock::expired(),
                });
                let _ignore = self.submit(Bytes::new());
            }
        }
    }

    /// Recomputes the commit index as the highest index replicated to a majority, provided the
    /// entry there is from the current term; entries from prior terms are never committed by
    /// counting replicas (Raft §5.4.2).
    fn advance_commit_index(&mut self) {
        if let Leader(leader_state) = &self.role {
            let mut match_indexes: Vec<_> = (leader_state.followers.values())
                .map(|follower| follower.match_index)
                .chain(iter::once(self.log.last_index()))
                .collect();
            match_indexes.sort_unstable();
            let majority_match = (match_indexes.into_iter())
                .rev()
                .skip(self.cluster.majority() - 1)
                .next();
            let commit_index = match majority_match {
                Some(agree_index) => {
                    if self.log.term_at(agree_index) == Some(self.current_term) {
                        self.log.commit_index.max(agree_index)
                    } else {
                        self.log.commit_index
                    }
                }
                None => self.log.commit_index,
            };
            if commit_index != self.log.commit_index {
                debug!(
                    "committed entries from {} to {}",
                    &self.log.commit_index, &commit_index
                );
            }
            self.log.commit_index = commit_index;
        }
    }

    /// Adopts a higher term from any message: becomes a follower with no vote cast, persisting
    /// the new term before anything else happens in it. A running election countdown carries
    /// over, since hearing a higher term is not proof of a live leader.
    fn update_term(&mut self, from: &N, msg: &Message<N>) -> Result<(), S::Error> {
        if msg.term > self.current_term {
            info!(
                "stepping down to {} (from {}) on message from {}: {}",
                &msg.term, &self.current_term, from, msg
            );
            let fresh = ElectionClock::new(
                &mut self.random,
                self.config.election_ticks_min(),
                self.config.election_ticks_max(),
            );
            let clock = match &mut self.role {
                Follower(FollowerState { clock, .. })
                | Candidate(CandidateState { clock, .. }) => mem::replace(clock, fresh),
                Leader(_) => fresh,
            };
            self.current_term = msg.term;
            self.voted_for = None;
            self.save_hard_state()?;
            self.role = Follower(FollowerState {
                leader: None,
                clock,
            });
        }
        Ok(())
    }

    /// Ignores responses from terms already left behind.
    fn drop_stale_response<T>(&self, msg_term: Term, msg: T) -> Result<(), T>
    where
        T: fmt::Display,
    {
        if msg_term < self.current_term {
            info!(
                "ignored response with stale {} < {}: {}",
                &msg_term, &self.current_term, &msg
            );
            drop(msg);
            Ok(())
        } else {
            Err(msg)
        }
    }

    //
    // helpers
    //

    fn vote_request(&self) -> Option<Message<N>> {
        match self.role {
            Candidate { .. } => Some(Message {
                term: self.current_term,
                rpc: Rpc::VoteRequest(VoteRequest {
                    candidate_id: self.cluster.self_id().clone(),
                    last_log_index: self.log.last_index(),
                    last_log_term: self.log.last_term(),
                }),
            }),
            _ => None,
        }
    }

    fn save_hard_state(&mut self) -> Result<(), S::Error> {
        let state = HardState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
        };
        if let Err(err) = self.stable.save(&state) {
            error!("failed to persist {}, refusing to proceed", &state.current_term);
            return Err(err);
        }
        Ok(())
    }
}
