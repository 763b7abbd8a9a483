//! A single-process simulation of a five-node group committing one command.

use std::collections::{BTreeSet, VecDeque};
use std::str;
use std::time::Duration;

use bytes::Bytes;
use rand_core::SeedableRng;

use rand_chacha::ChaChaRng;
use tupleraft::cluster::Cluster;
use tupleraft::log::memory::InMemoryLog;
use tupleraft::message::{MessageDestination, SendableMessage};
use tupleraft::node::{Config, Node};
use tupleraft::persist::memory::InMemoryStable;
use tupleraft::state_machine::StateMachine;

type NodeId = usize;

const RAFT_CONFIG: Config = Config {
    election_timeout_min: Duration::from_millis(100),
    election_timeout_max: Duration::from_millis(200),
    heartbeat_interval: Duration::from_millis(10),
    rpc_timeout: Duration::from_millis(50),
    tick_interval: Duration::from_millis(10),
    replication_chunk_size: usize::max_value(),
};

/// Upper-cases every committed command, standing in for a real tuplespace.
struct Shouter;

impl StateMachine for Shouter {
    type Output = String;

    fn apply(&mut self, command: Bytes) -> String {
        str::from_utf8(&command)
            .expect("utf-8 command")
            .to_uppercase()
    }
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    // Construct 5 Raft peers
    let all_ids: BTreeSet<NodeId> = (0..5).collect();
    let mut peers = (0..5)
        .map(|id: NodeId| {
            Node::new(
                Cluster::new(id, all_ids.clone()),
                InMemoryLog::new_unbounded(),
                InMemoryStable::new(),
                ChaChaRng::seed_from_u64(id as u64),
                RAFT_CONFIG,
            )
            .expect("fresh node")
        })
        .collect::<Vec<_>>();

    // Simulate reliably sending messages instantaneously between peers
    let mut inboxes = vec![VecDeque::new(); peers.len()];
    let send_message =
        |src_id: NodeId, sendable: SendableMessage<NodeId>, inboxes: &mut Vec<VecDeque<_>>| {
            match sendable.dest {
                MessageDestination::Broadcast => {
                    println!("peer {} -> all: {}", src_id, &sendable.message);
                    inboxes
                        .iter_mut()
                        .for_each(|inbox| inbox.push_back((src_id, sendable.message.clone())));
                }
                MessageDestination::To(dst_id) => {
                    println!("peer {} -> peer {}: {}", src_id, dst_id, &sendable.message);
                    inboxes[dst_id].push_back((src_id, sendable.message));
                }
            }
        };

    // Loop until the command is committed and applied on all peers
    let mut shouter = Shouter;
    let mut appended = false;
    let mut peers_committed = vec![false; peers.len()];
    while !peers_committed.iter().all(|seen| *seen) {
        for (peer_id, peer) in peers.iter_mut().enumerate() {
            // Tick the timer
            let new_messages = peer.timer_tick().expect("stable store");
            new_messages.for_each(|message| send_message(peer_id, message, &mut inboxes));

            // Append a command on the leader
            if !appended && peer.is_leader() {
                if let Ok(new_messages) = peer.append("Hello world!") {
                    println!("peer {} appending to the log", peer_id);
                    new_messages.for_each(|message| send_message(peer_id, message, &mut inboxes));
                    appended = true;
                }
            }

            // Process message inbox
            while let Some((src_id, message)) = inboxes[peer_id].pop_front() {
                let new_messages = peer.receive(message, src_id).expect("stable store");
                new_messages.for_each(|message| send_message(peer_id, message, &mut inboxes));
            }

            // Apply committed commands to the local state machine
            for output in peer.apply_committed(&mut shouter) {
                println!("peer {} applied commit {}", peer_id, output);
                assert_eq!(output, "HELLO WORLD!");
                assert!(!peers_committed[peer_id]);
                peers_committed[peer_id] = true;
            }
        }
    }
}
