//! Message types exchanged between Raft peers.
//!
//! The top-level type is [`Message`], a leadership term paired with one [`Rpc`] payload. Vote and
//! append *requests* embed the sender's identity (`candidate_id`, `leader_id`) so a follower can
//! redirect clients to the leader it heard from last; *responses* are attributed by the transport,
//! which passes the sender to [`Node::receive`](crate::node::Node::receive). With the `serde`
//! feature (enabled by default) every type here derives `Serialize`/`Deserialize` so transports
//! can pick their own wire encoding.

use core::cmp::Ordering;
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

use bytes::Bytes;

/// A [`Message`] paired with the destination it should be delivered to.
#[derive(Clone, Debug, PartialEq)]
pub struct SendableMessage<N> {
    /// The message to be sent.
    pub message: Message<N>,

    /// Where the message should be delivered.
    pub dest: MessageDestination<N>,
}

/// The destination of a [`SendableMessage`].
#[derive(Clone, Debug, PartialEq)]
pub enum MessageDestination<N> {
    /// Deliver to every known peer.
    Broadcast,
    /// Deliver to one particular peer.
    To(N),
}

/// A message sent between Raft peers.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message<N> {
    /// The highest leadership term seen by the sender when the message was built.
    pub term: Term,

    /// The remote procedure call carried by this message.
    pub rpc: Rpc<N>,
}

/// A remote procedure call to a Raft peer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rpc<N> {
    /// A candidate asking for this term's vote.
    VoteRequest(VoteRequest<N>),

    /// The answer to a [`VoteRequest`].
    VoteResponse(VoteResponse),

    /// A leader replicating log entries; empty `entries` is the heartbeat.
    AppendRequest(AppendRequest<N>),

    /// The answer to an [`AppendRequest`].
    AppendResponse(AppendResponse),

    /// A leader offering a snapshot in place of discarded log entries. Stub: snapshot transfer is
    /// not implemented, receivers only acknowledge the term.
    SnapshotRequest(SnapshotRequest<N>),

    /// The answer to a [`SnapshotRequest`].
    SnapshotResponse(SnapshotResponse),
}

/// A candidate's request for a vote in its current term.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteRequest<N> {
    /// The candidate requesting the vote.
    pub candidate_id: N,

    /// The index of the last entry in the candidate's log.
    pub last_log_index: LogIndex,

    /// The term of the last entry in the candidate's log.
    pub last_log_term: Term,
}

/// The answer to a [`VoteRequest`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VoteResponse {
    /// Whether the vote was granted.
    pub vote_granted: bool,
}

/// A leader's request to append entries to a peer's log.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppendRequest<N> {
    /// The leader sending the request, so followers can redirect clients.
    pub leader_id: N,

    /// The index of the log entry immediately preceding `entries`.
    pub prev_log_index: LogIndex,

    /// The term of the log entry at `prev_log_index`.
    pub prev_log_term: Term,

    /// The index of the last entry the leader knows to be committed.
    pub leader_commit: LogIndex,

    /// Consecutive log entries starting at `prev_log_index + 1`. Empty for a heartbeat.
    pub entries: Vec<LogEntry>,
}

/// The answer to an [`AppendRequest`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AppendResponse {
    /// Whether the entries were appended (or already present).
    pub success: bool,

    /// The last index up to which the responder's log is known to match the leader's.
    pub match_index: LogIndex,

    /// The index of the last entry in the responder's log, a hint for leader backoff.
    pub last_log_index: LogIndex,
}

/// A leader's offer to install a snapshot covering a discarded log prefix. Interface stub for
/// future log compaction.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotRequest<N> {
    /// The leader sending the snapshot.
    pub leader_id: N,

    /// The snapshot replaces all entries up to and including this index.
    pub last_included_index: LogIndex,

    /// The term of the entry at `last_included_index`.
    pub last_included_term: Term,

    /// Opaque snapshot bytes.
    pub data: Bytes,
}

/// The answer to a [`SnapshotRequest`]; the responder's term travels in [`Message::term`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotResponse {}

/// An entry in a [Raft log][crate::log::Log].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// The leadership term under which this entry was appended.
    pub term: Term,

    /// The opaque command to hand to the state machine once the entry commits. Empty commands are
    /// leadership no-ops and are never applied.
    pub command: Bytes,
}

/// A leadership epoch. Terms increase monotonically; at most one leader exists per term.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Term(pub u64);

/// A 1-based position in a [Raft log][crate::log::Log]; `LogIndex(0)` means "no entry".
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogIndex(pub u64);

//
// Message impls
//

impl<N: fmt::Display> fmt::Display for Message<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { term, rpc } = self;
        write!(fmt, "({}, {})", term, rpc)
    }
}

//
// Rpc impls
//

impl<N: fmt::Display> fmt::Display for Rpc<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rpc::VoteRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::VoteResponse(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AppendRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AppendResponse(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::SnapshotRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::SnapshotResponse(msg) => fmt::Display::fmt(msg, fmt),
        }
    }
}

//
// VoteRequest impls
//

impl<N: fmt::Display> fmt::Display for VoteRequest<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            candidate_id,
            last_log_index,
            last_log_term,
        } = self;
        fmt.debug_struct("VoteRequest")
            .field("candidate_id", &format_args!("{}", candidate_id))
            .field("last_log_index", &format_args!("{}", last_log_index))
            .field("last_log_term", &format_args!("{}", last_log_term))
            .finish()
    }
}

//
// VoteResponse impls
//

impl fmt::Display for VoteResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { vote_granted } = self;
        fmt.debug_struct("VoteResponse")
            .field("vote_granted", vote_granted)
            .finish()
    }
}

//
// AppendRequest impls
//

impl<N: fmt::Display> fmt::Display for AppendRequest<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            leader_id,
            prev_log_index,
            prev_log_term,
            leader_commit,
            entries,
        } = self;
        fmt.debug_struct("AppendRequest")
            .field("leader_id", &format_args!("{}", leader_id))
            .field("prev_log_index", &format_args!("{}", prev_log_index))
            .field("prev_log_term", &format_args!("{}", prev_log_term))
            .field("leader_commit", &format_args!("{}", leader_commit))
            .field("entries", &entries.len())
            .finish()
    }
}

//
// AppendResponse impls
//

impl fmt::Display for AppendResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            success,
            match_index,
            last_log_index,
        } = self;
        fmt.debug_struct("AppendResponse")
            .field("success", success)
            .field("match_index", &format_args!("{}", match_index))
            .field("last_log_index", &format_args!("{}", last_log_index))
            .finish()
    }
}

//
// SnapshotRequest impls
//

impl<N: fmt::Display> fmt::Display for SnapshotRequest<N> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            leader_id,
            last_included_index,
            last_included_term,
            data,
        } = self;
        fmt.debug_struct("SnapshotRequest")
            .field("leader_id", &format_args!("{}", leader_id))
            .field("last_included_index", &format_args!("{}", last_included_index))
            .field("last_included_term", &format_args!("{}", last_included_term))
            .field("data", &data.len())
            .finish()
    }
}

//
// SnapshotResponse impls
//

impl fmt::Display for SnapshotResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SnapshotResponse").finish()
    }
}

//
// Term impls
//

impl fmt::Display for Term {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        fmt.debug_tuple("Term").field(id).finish()
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl AddAssign<u64> for Term {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.checked_add(rhs).unwrap_or_else(|| panic!("term overflow"));
    }
}

//
// LogIndex impls
//

impl LogIndex {
    /// Checked subtraction; `None` if the result would precede index zero.
    pub fn checked_sub(self, dec: u64) -> Option<Self> {
        self.0.checked_sub(dec).map(LogIndex)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        fmt.debug_tuple("LogIndex").field(id).finish()
    }
}

impl PartialOrd for LogIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for LogIndex {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self(self.0.checked_add(inc).unwrap_or_else(|| panic!("log index overflow")))
    }
}

impl Sub<u64> for LogIndex {
    type Output = Self;
    fn sub(self, dec: u64) -> Self {
        Self(self.0.saturating_sub(dec))
    }
}
