//! Higher-level API for a Raft node.

use core::fmt;
use std::time::Duration;

use bytes::Bytes;
use rand_core::RngCore;
use thiserror::Error;

use crate::cluster::Cluster;
use crate::core::{ReplicationState, Role, State};
use crate::log::{CommittedIter, Log};
use crate::message::{LogIndex, Message, SendableMessage, Term};
use crate::persist::StableStore;
use crate::state_machine::StateMachine;

/// A Raft node, replicating a strongly-consistent distributed log of commands amongst its peers.
///
/// The distributed log can drive any deterministic [`StateMachine`]; here that is the tuplespace
/// behind each cluster server.
///
/// # Appending commands to the distributed log
///
/// Commands passed to [`append`] are not guaranteed to reach the distributed log: any call to
/// [`receive`] may cancel entries that have not yet committed, if a leader of a newer term
/// overwrites them. Only the node returned by [`leader`] accepts appends, and even it must
/// replicate each entry to a majority before losing leadership for the entry to commit. A
/// command may therefore first come out of [`apply_committed`] on a different node than the one
/// it was submitted to, but every node applies the same commands in the same order.
///
/// # Driving the node
///
/// The node is sans-IO: it owns no sockets, threads, or timers. Exactly one of [`append`],
/// [`receive`], [`timer_tick`], or [`apply_committed`] may execute at a time: wrap the node in
/// whatever serialization the embedding uses (a mutex, an actor loop over a channel, a
/// single-threaded reactor) and deliver transport and timer events into it. Call [`timer_tick`]
/// at a fixed interval of [`Config::tick_interval`]; the interval and `Config` must be the same
/// on every node of a group.
///
/// # Message delivery
///
/// Messages returned by the node must be handed to the transport for delivery. The transport
/// may drop, reorder, duplicate, or arbitrarily delay them: an unacknowledged replication
/// request expires after [`Config::rpc_timeout`] and is retried on a later tick, and every
/// handler tolerates duplicates. At most one replication request per peer is unacknowledged at
/// a time, so the amount of buffered message data stays bounded by
/// [`Config::replication_chunk_size`] per peer.
///
/// # Fatal storage errors
///
/// Methods that must persist state before producing messages return `Err` when the
/// [`StableStore`] fails. A node whose store has failed must not be driven further: continuing
/// could grant a second vote in the same term after a restart.
///
/// [`append`]: Self::append
/// [`apply_committed`]: Self::apply_committed
/// [`leader`]: Self::leader
/// [`receive`]: Self::receive
/// [`timer_tick`]: Self::timer_tick
pub struct Node<L, S, Random, N> {
    state: State<L, S, Random, N>,
}

/// Configurable parameters of a Raft node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,

    /// The upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,

    /// How often a leader sends heartbeats. Must be well below
    /// [`election_timeout_min`](Self::election_timeout_min) or followers will keep starting
    /// elections against a live leader.
    pub heartbeat_interval: Duration,

    /// How long a leader waits for a replication request to be acknowledged before resending.
    pub rpc_timeout: Duration,

    /// The interval at which the embedding calls
    /// [`timer_tick`](Node::timer_tick); all other durations are counted in these.
    pub tick_interval: Duration,

    /// The maximum number of command bytes replicated to a peer in one request.
    pub replication_chunk_size: usize,
}

/// A rejected [`Config`].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    /// `election_timeout_min` exceeds `election_timeout_max`.
    #[error("election_timeout_min must not exceed election_timeout_max")]
    ElectionTimeoutRange,

    /// The heartbeat interval would not keep followers from timing out.
    #[error("heartbeat_interval must be shorter than election_timeout_min")]
    HeartbeatTooLong,

    /// A lost RPC would not be retried before the election timeout.
    #[error("rpc_timeout must be shorter than election_timeout_min")]
    RpcTimeoutTooLong,

    /// A zero tick interval cannot count anything.
    #[error("tick_interval must be nonzero")]
    ZeroTickInterval,

    /// A zero chunk size could never replicate an entry.
    #[error("replication_chunk_size must be nonzero")]
    ZeroChunkSize,
}

/// An error returned while constructing a [`Node`].
#[derive(Debug)]
pub enum NodeError<E> {
    /// The provided [`Config`] is invalid.
    Config(ConfigError),

    /// The [`StableStore`](crate::persist::StableStore) could not be read.
    Storage(E),
}

/// An error returned while attempting to append to the distributed log.
#[derive(Debug)]
pub enum AppendError<N, E> {
    /// This node is not the leader. The command is handed back along with the believed leader,
    /// if one is known, so the caller can redirect.
    NotLeader {
        /// The node believed to be the current leader, if any.
        leader: Option<N>,
        /// The rejected command.
        command: Bytes,
    },

    /// An error was returned by the [`Log`](crate::log::Log) implementation.
    Log(E),
}

//
// Config impls
//

impl Config {
    /// Checks the parameters against each other.
    ///
    /// # Errors
    ///
    /// If any parameter is out of range, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.as_millis() == 0 {
            Err(ConfigError::ZeroTickInterval)
        } else if self.election_timeout_min > self.election_timeout_max {
            Err(ConfigError::ElectionTimeoutRange)
        } else if self.heartbeat_interval >= self.election_timeout_min {
            Err(ConfigError::HeartbeatTooLong)
        } else if self.rpc_timeout >= self.election_timeout_min {
            Err(ConfigError::RpcTimeoutTooLong)
        } else if self.replication_chunk_size == 0 {
            Err(ConfigError::ZeroChunkSize)
        } else {
            Ok(())
        }
    }

    pub(crate) fn election_ticks_min(&self) -> u32 {
        self.ticks(self.election_timeout_min)
    }

    pub(crate) fn election_ticks_max(&self) -> u32 {
        self.ticks(self.election_timeout_max)
    }

    pub(crate) fn heartbeat_ticks(&self) -> u32 {
        self.ticks(self.heartbeat_interval)
    }

    pub(crate) fn rpc_timeout_ticks(&self) -> u32 {
        self.ticks(self.rpc_timeout)
    }

    fn ticks(&self, duration: Duration) -> u32 {
        let ticks = duration
            .as_millis()
            .checked_div(self.tick_interval.as_millis())
            .unwrap_or(0);
        ticks.max(1) as u32
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_millis(100),
            tick_interval: Duration::from_millis(10),
            replication_chunk_size: 65536,
        }
    }
}

//
// Node impls
//

impl<L, S, Random, N> Node<L, S, Random, N>
where
    L: Log,
    S: StableStore<N>,
    Random: RngCore,
    N: Ord + Clone + fmt::Display,
{
    /// Constructs a Raft node with the given membership and configuration.
    ///
    /// `log` and `stable` should come from the same storage generation: either both empty (first
    /// boot) or both holding what the node last persisted (restart). Every node in a group must
    /// be constructed with an equivalent `cluster` and the same `config`; `random` must produce
    /// different values on every node of a group.
    ///
    /// # Errors
    ///
    /// If `config` is invalid or `stable` cannot be read, an error is returned.
    pub fn new(
        cluster: Cluster<N>,
        log: L,
        stable: S,
        random: Random,
        config: Config,
    ) -> Result<Self, NodeError<S::Error>> {
        config.validate().map_err(NodeError::Config)?;
        let state =
            State::new(cluster, log, stable, random, config).map_err(NodeError::Storage)?;
        Ok(Self { state })
    }

    /// Requests appending an entry carrying `command` to the distributed log, returning messages
    /// to be sent.
    ///
    /// See ["Message delivery"](Node#message-delivery) for the returned messages and
    /// ["Appending commands"](Node#appending-commands-to-the-distributed-log) for the delivery
    /// guarantees of the command itself.
    ///
    /// # Errors
    ///
    /// If this node is not the leader, or the log storage fails, an error is returned.
    #[must_use = "this function returns messages to be sent"]
    pub fn append<T: Into<Bytes>>(
        &mut self,
        command: T,
    ) -> Result<impl Iterator<Item = SendableMessage<N>> + '_, AppendError<N, L::Error>> {
        let () = self.state.submit(command.into())?;
        Ok(self.append_entries())
    }

    /// Applies every newly committed command to `machine`, in log order, returning the outputs.
    /// Each committed command is applied exactly once over the lifetime of the node.
    pub fn apply_committed<M: StateMachine>(&mut self, machine: &mut M) -> Vec<M::Output> {
        let mut outputs = Vec::new();
        for entry in self.state.take_committed() {
            // empty commands are leadership no-ops, not state machine input
            if !entry.command.is_empty() {
                outputs.push(machine.apply(entry.command));
            }
        }
        outputs
    }

    /// Returns this node's membership.
    pub fn cluster(&self) -> &Cluster<N> {
        self.state.cluster()
    }

    /// Returns this node's configurable parameters.
    pub fn config(&self) -> &Config {
        self.state.config()
    }

    /// Returns whether this node is the leader of the latest known term.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    /// Returns the index of the last committed entry.
    pub fn last_committed_index(&self) -> LogIndex {
        self.state.commit_index()
    }

    /// Returns the believed leader of the latest known term, if any, along with the term.
    /// Submissions to a non-leader should be redirected there.
    pub fn leader(&self) -> (Option<&N>, Term) {
        self.state.leader()
    }

    /// Returns a reference to the log storage.
    pub fn log(&self) -> &L {
        self.state.log()
    }

    /// Returns a mutable reference to the log storage.
    pub fn log_mut(&mut self) -> &mut L {
        self.state.log_mut()
    }

    /// Returns this node's ID.
    pub fn node_id(&self) -> &N {
        self.state.node_id()
    }

    /// Processes receipt of `message` from the peer `from`, returning messages to be sent.
    ///
    /// See ["Message delivery"](Node#message-delivery) for details.
    ///
    /// # Errors
    ///
    /// If the stable store fails, an error is returned; see
    /// ["Fatal storage errors"](Node#fatal-storage-errors).
    #[must_use = "this function returns messages to be sent"]
    pub fn receive(
        &mut self,
        message: Message<N>,
        from: N,
    ) -> Result<impl Iterator<Item = SendableMessage<N>> + '_, S::Error> {
        let reply = self.state.receive(message, from)?;
        Ok(reply.into_iter().chain(self.append_entries()))
    }

    /// Returns the replication state this node keeps for the peer `peer_id`, if it is currently
    /// leader.
    pub fn replication_state(&self, peer_id: &N) -> Option<&ReplicationState> {
        self.state.replication_state(peer_id)
    }

    /// Restores the replication state of a reconnected peer, returning messages to be sent.
    /// See [`State::reset_peer`](crate::core::State::reset_peer).
    #[must_use = "this function returns messages to be sent"]
    pub fn reset_peer(&mut self, peer_id: N) -> impl Iterator<Item = SendableMessage<N>> + '_ {
        let message = self.state.reset_peer(peer_id);
        message.into_iter().chain(self.append_entries())
    }

    /// Returns which protocol role this node currently holds.
    pub fn role(&self) -> Role {
        self.state.role()
    }

    /// Returns a reference to the low-level state of the node.
    pub fn state(&self) -> &State<L, S, Random, N> {
        &self.state
    }

    /// Returns a mutable reference to the low-level state of the node.
    pub fn state_mut(&mut self) -> &mut State<L, S, Random, N> {
        &mut self.state
    }

    /// Returns an iterator draining committed entries not yet taken, including leadership
    /// no-ops. [`apply_committed`](Self::apply_committed) is the usual consumer.
    pub fn take_committed(&mut self) -> CommittedIter<'_, L> {
        self.state.take_committed()
    }

    /// Advances this node's clock by one tick, returning messages to be sent.
    ///
    /// See ["Driving the node"](Node#driving-the-node) for details.
    ///
    /// # Errors
    ///
    /// If the stable store fails, an error is returned; see
    /// ["Fatal storage errors"](Node#fatal-storage-errors).
    #[must_use = "this function returns messages to be sent"]
    pub fn timer_tick(
        &mut self,
    ) -> Result<impl Iterator<Item = SendableMessage<N>> + '_, S::Error> {
        let message = self.state.timer_tick()?;
        Ok(message.into_iter().chain(self.append_entries()))
    }

    #[must_use = "this function returns messages to be sent"]
    fn append_entries(&mut self) -> impl Iterator<Item = SendableMessage<N>> + '_ {
        let peers = self.state.cluster().peers().clone().into_iter();
        peers.flat_map(move |peer| self.state.append_entries(peer))
    }
}

//
// NodeError impls
//

impl<E> fmt::Display for NodeError<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Config(err) => fmt::Display::fmt(err, fmt),
            NodeError::Storage(_) => write!(fmt, "the stable store could not be read"),
        }
    }
}

//
// AppendError impls
//

impl<N, E> fmt::Display for AppendError<N, E> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::NotLeader { .. } => write!(fmt, "this node is not the cluster leader"),
            AppendError::Log(_) => write!(fmt, "the log storage failed"),
        }
    }
}
