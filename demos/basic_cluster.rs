//! Runs a small in-process committee end to end using the in-memory
//! `testkit` collaborators and prints the view/finalisation progress
//! of each replica as it goes.
//!
//! Ported from the teacher's `examples/demo_simple.rs` /
//! `examples/hotstuff2_demo.rs`, trimmed to what the core actually
//! owns: no transaction execution, storage, or network transport here
//! — those are this crate's explicit Non-goals, left to a real
//! deployment's `BlockStore`/`Network`/`Builder` implementations.

use hotstuff2_core::config::ConsensusConfig;
use hotstuff2_core::testkit::Cluster;
use hotstuff2_core::wire::WireMessage;

const NODE_COUNT: usize = 4;
const ROUNDS: usize = 40;
const TARGET_VIEW: u64 = 12;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    println!("HotStuff-2 core demo: {NODE_COUNT}-node committee, equal stake");

    let stakes = vec![100u64; NODE_COUNT];
    let mut cluster = Cluster::new(&stakes, ConsensusConfig::default());

    for idx in 0..cluster.len() {
        cluster.handler_mut(idx).on_local_timeout().await.unwrap();
    }

    for round in 0..ROUNDS {
        pump_once(&mut cluster).await;

        let views: Vec<_> = (0..cluster.len()).map(|idx| cluster.handler(idx).current_view()).collect();
        let finalized: Vec<_> = (0..cluster.len()).map(|idx| cluster.handler(idx).finalized_view()).collect();
        println!("round {round:>3}: views={views:?} finalized_views={finalized:?}");

        if views.iter().all(|&v| v >= TARGET_VIEW) {
            break;
        }
    }

    let finalized_ids: Vec<_> = (0..cluster.len()).map(|idx| cluster.handler(idx).finalized_block_id()).collect();
    println!("final finalised block ids: {finalized_ids:?}");
    assert!(
        finalized_ids.windows(2).all(|w| w[0] == w[1]),
        "replicas finalised different blocks"
    );
    println!("all replicas agree on the finalised chain.");
}

/// Drains every replica's own-proposal queue and inbound network
/// traffic for one pass. A fully honest, fully participating committee
/// never goes quiet on its own, so the caller bounds the number of
/// passes rather than draining to quiescence.
async fn pump_once(cluster: &mut Cluster) {
    for idx in 0..cluster.len() {
        loop {
            let batch = cluster.handler_mut(idx).take_own_proposals();
            if batch.is_empty() {
                break;
            }
            for proposal in batch {
                let _ = cluster.handler_mut(idx).on_receive_proposal(proposal).await;
            }
        }
    }
    for idx in 0..cluster.len() {
        let node_id = cluster.node_ids[idx];
        let messages = cluster.network.drain(node_id);
        for bytes in messages {
            if let Ok(message) = WireMessage::decode(&bytes) {
                match message {
                    WireMessage::Proposal(p) => {
                        let _ = cluster.handler_mut(idx).on_receive_proposal(p).await;
                    }
                    WireMessage::Vote(v) => {
                        let _ = cluster.handler_mut(idx).on_receive_vote(v).await;
                    }
                }
            }
        }
    }
}
