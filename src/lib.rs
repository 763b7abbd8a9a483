//! This is the Raft Distributed Consensus Protocol implemented for Rust.
//! [Raft](http://raftconsensus.github.io/) is described as:
//!
//! > Raft is a consensus algorithm that is designed to be easy to understand. It's equivalent to
//! > Paxos in fault-tolerance and performance. The difference is that it's decomposed into
//! > relatively independent subproblems, and it cleanly addresses all major pieces needed for
//! > practical systems.
//!
//! This crate is the consensus core of a replicated tuplespace cluster: leader election, log
//! replication, and commit advancement for a group of servers agreeing on one ordered sequence
//! of commands. It is sans-IO: transports, timers, state machines, and durable storage plug in
//! through the [`node`], [`log`], [`persist`], and [`state_machine`] seams.

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod clock;
pub mod cluster;
pub mod core;
pub mod log;
pub mod message;
pub mod node;
pub mod persist;
pub mod state_machine;
