//! A thread-per-node example: each node lives in its own actor loop, fed timer ticks and
//! messages over a channel, the way a real embedding drives the consensus core.

use std::collections::BTreeSet;
use std::str;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand_core::SeedableRng;

use rand_chacha::ChaChaRng;
use tupleraft::cluster::Cluster;
use tupleraft::log::memory::InMemoryLog;
use tupleraft::message::{Message, MessageDestination, SendableMessage};
use tupleraft::node::{Config, Node};
use tupleraft::persist::memory::InMemoryStable;

type NodeId = usize;

const RAFT_CONFIG: Config = Config {
    election_timeout_min: Duration::from_millis(1000),
    election_timeout_max: Duration::from_millis(2000),
    heartbeat_interval: Duration::from_millis(100),
    rpc_timeout: Duration::from_millis(500),
    tick_interval: Duration::from_millis(100),
    replication_chunk_size: usize::max_value(),
};

#[derive(Clone)]
struct IncomingMessage {
    from: NodeId,
    message: Message<NodeId>,
}

#[derive(Clone)]
struct Network {
    peers_tx: Vec<mpsc::Sender<IncomingMessage>>,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    // Construct 5 Raft peers
    let all_ids: BTreeSet<NodeId> = (0..5).collect();
    let (peers_tx, peers_rx): (Vec<_>, Vec<_>) = (0..5).map(|_| mpsc::channel()).unzip();
    let network = Network { peers_tx };
    let peers = peers_rx
        .into_iter()
        .enumerate()
        .map(|(peer_id, rx): (NodeId, _)| {
            (
                Node::new(
                    Cluster::new(peer_id, all_ids.clone()),
                    InMemoryLog::new_unbounded(),
                    InMemoryStable::new(),
                    ChaChaRng::seed_from_u64(peer_id as u64),
                    RAFT_CONFIG,
                )
                .expect("fresh node"),
                rx,
            )
        });

    let appended = Arc::new(Mutex::new(false));
    let mut peers_committed = vec![false; peers.len()];
    let (peer_committed_tx, peer_committed_rx) = mpsc::channel();

    for (peer_id, (mut peer, rx)) in peers.enumerate() {
        let appended = Arc::clone(&appended);
        let network = network.clone();
        let peer_committed_tx = peer_committed_tx.clone();
        thread::spawn(move || {
            // Loop until a command is committed
            let mut next_tick = Instant::now() + RAFT_CONFIG.tick_interval;
            loop {
                match rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
                    Ok(message) => {
                        // Process incoming message
                        let new_messages =
                            peer.receive(message.message, message.from).expect("stable store");
                        new_messages.for_each(|message| network.send(peer_id, message));
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // Tick the timer
                        let new_messages = peer.timer_tick().expect("stable store");
                        new_messages.for_each(|message| network.send(peer_id, message));
                        next_tick = Instant::now() + RAFT_CONFIG.tick_interval;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        panic!("peer {} disconnected", peer_id)
                    }
                }

                // Append a command on the leader
                let mut appended = appended.lock().unwrap();
                if !*appended && peer.is_leader() {
                    if let Ok(new_messages) = peer.append("Hello world!") {
                        println!("peer {} appending to the log", peer_id);
                        new_messages.for_each(|message| network.send(peer_id, message));
                        *appended = true;
                    }
                }
                drop(appended);

                // Check for committed commands
                for entry in peer.take_committed() {
                    if !entry.command.is_empty() {
                        println!(
                            "peer {} saw commit {}",
                            peer_id,
                            str::from_utf8(&entry.command).unwrap()
                        );
                        peer_committed_tx.send(peer_id).unwrap();
                    }
                }
            }
        });
    }
    drop((network, peer_committed_tx));

    // Loop until the command is committed on all peers
    while !peers_committed.iter().all(|seen| *seen) {
        let peer_id = peer_committed_rx.recv().unwrap();
        assert!(!peers_committed[peer_id]);
        peers_committed[peer_id] = true;
    }
}

impl Network {
    fn send(&self, from: NodeId, sendable: SendableMessage<NodeId>) {
        let message = IncomingMessage {
            from,
            message: sendable.message,
        };
        match sendable.dest {
            MessageDestination::Broadcast => {
                println!("peer {} -> all: {}", from, message.message);
                self.peers_tx
                    .iter()
                    .for_each(|peer_tx| drop(peer_tx.send(message.clone())));
            }
            MessageDestination::To(dst_id) => {
                println!("peer {} -> peer {}: {}", from, dst_id, message.message);
                let _ = self.peers_tx[dst_id].send(message);
            }
        }
    }
}
