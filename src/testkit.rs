//! In-memory implementations of the external collaborator traits
//! (`BlockStore`, `Network`, `Builder`), plus a multi-replica `Cluster`
//! harness, for driving the seed scenarios and property tests. None of
//! this is a production backend — it is test-only scaffolding, which
//! is why the module is gated behind `cfg(test)` (or the `testkit`
//! feature for integration tests living outside the crate).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::committee::StaticCommittee;
use crate::config::ConsensusConfig;
use crate::crypto::{BeaconKeyGen, StakingKeyPair};
use crate::error::HotStuffError;
use crate::event_handler::EventHandler;
use crate::external::{Builder, BlockStore, Network};
use crate::forks::Forks;
use crate::notifier::{Notifier, NotifierDistributor, TracingNotifier};
use crate::persister::InMemoryPersister;
use crate::signer::{Signer, SigningMode, Verifier};
use crate::types::{Block, Hash, Identity, NodeId, QuorumCert, Timestamp, Vote};
use crate::wire::WireMessage;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

/// A payload builder whose every call returns a distinct hash, derived
/// from the requested parent and a monotonically increasing counter.
/// Deterministic given a fixed call order, which is all these tests need.
pub struct CountingBuilder {
    counter: AtomicU64,
}

impl CountingBuilder {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for CountingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Builder for CountingBuilder {
    async fn build_on(&self, parent_id: Hash) -> Result<Hash, HotStuffError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = parent_id.as_bytes().to_vec();
        bytes.extend_from_slice(&n.to_le_bytes());
        Ok(Hash::from_bytes(&bytes))
    }
}

/// Durable header storage backed by a `Mutex`-guarded map. Stands in
/// for the teacher's `storage/block_store.rs` without the RocksDB
/// dependency, since persistent storage is out of scope here.
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: Mutex<HashMap<Hash, Block>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn put(&self, block: &Block) -> Result<(), HotStuffError> {
        self.blocks
            .lock()
            .expect("block store lock poisoned")
            .insert(block.block_id, block.clone());
        Ok(())
    }

    async fn by_id(&self, id: &Hash) -> Result<Option<Block>, HotStuffError> {
        Ok(self.blocks.lock().expect("block store lock poisoned").get(id).cloned())
    }
}

/// A shared, unordered router between every replica in a [`Cluster`].
/// Each replica gets its own [`NodeNetworkHandle`] view onto it,
/// tagged with the sending node's id so muting only silences that
/// node's outbound traffic.
pub struct InMemoryNetwork {
    inboxes: Mutex<HashMap<NodeId, VecDeque<Vec<u8>>>>,
    muted: Mutex<std::collections::HashSet<NodeId>>,
}

impl InMemoryNetwork {
    pub fn new(node_ids: &[NodeId]) -> Arc<Self> {
        let mut inboxes = HashMap::new();
        for id in node_ids {
            inboxes.insert(*id, VecDeque::new());
        }
        Arc::new(Self {
            inboxes: Mutex::new(inboxes),
            muted: Mutex::new(std::collections::HashSet::new()),
        })
    }

    fn deliver(&self, target: NodeId, bytes: Vec<u8>) {
        if let Some(inbox) = self.inboxes.lock().expect("network lock poisoned").get_mut(&target) {
            inbox.push_back(bytes);
        }
    }

    /// Removes and returns every message currently queued for `node_id`.
    pub fn drain(&self, node_id: NodeId) -> Vec<Vec<u8>> {
        self.inboxes
            .lock()
            .expect("network lock poisoned")
            .get_mut(&node_id)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Silences every message a node sends (simulating a crashed or
    /// withheld replica) without affecting what it can still receive.
    pub fn set_muted(&self, node_id: NodeId, muted: bool) {
        let mut guard = self.muted.lock().expect("network lock poisoned");
        if muted {
            guard.insert(node_id);
        } else {
            guard.remove(&node_id);
        }
    }

    fn is_muted(&self, node_id: NodeId) -> bool {
        self.muted.lock().expect("network lock poisoned").contains(&node_id)
    }
}

/// One replica's view onto the shared [`InMemoryNetwork`].
pub struct NodeNetworkHandle {
    node_id: NodeId,
    router: Arc<InMemoryNetwork>,
}

impl NodeNetworkHandle {
    pub fn new(node_id: NodeId, router: Arc<InMemoryNetwork>) -> Self {
        Self { node_id, router }
    }
}

#[async_trait]
impl Network for NodeNetworkHandle {
    async fn send(&self, target: NodeId, bytes: Vec<u8>) -> Result<(), HotStuffError> {
        if !self.router.is_muted(self.node_id) {
            self.router.deliver(target, bytes);
        }
        Ok(())
    }

    async fn broadcast(&self, targets: &[NodeId], bytes: Vec<u8>) -> Result<(), HotStuffError> {
        if !self.router.is_muted(self.node_id) {
            for &target in targets {
                self.router.deliver(target, bytes.clone());
            }
        }
        Ok(())
    }
}

/// Captures every observable event for post-hoc assertions in tests.
/// Registered into each replica's [`NotifierDistributor`] alongside a
/// [`TracingNotifier`]; the test keeps its own `Arc` clone to inspect
/// the recording after the scenario runs.
#[derive(Default)]
pub struct RecordingNotifier {
    finalized: Mutex<Vec<Block>>,
    skipped_ahead: Mutex<Vec<crate::types::View>>,
    double_proposals: Mutex<Vec<(Block, Block)>>,
    double_votes: Mutex<Vec<(Vote, Vote)>>,
    invalid_votes: Mutex<Vec<(Vote, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finalized_blocks(&self) -> Vec<Block> {
        self.finalized.lock().expect("recorder lock poisoned").clone()
    }

    pub fn skipped_ahead_views(&self) -> Vec<crate::types::View> {
        self.skipped_ahead.lock().expect("recorder lock poisoned").clone()
    }

    pub fn double_proposals(&self) -> Vec<(Block, Block)> {
        self.double_proposals.lock().expect("recorder lock poisoned").clone()
    }

    pub fn double_votes(&self) -> Vec<(Vote, Vote)> {
        self.double_votes.lock().expect("recorder lock poisoned").clone()
    }

    pub fn invalid_votes(&self) -> Vec<(Vote, String)> {
        self.invalid_votes.lock().expect("recorder lock poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn on_skipped_ahead(&self, view: crate::types::View) {
        self.skipped_ahead.lock().expect("recorder lock poisoned").push(view);
    }

    fn on_finalized_block(&self, block: &Block) {
        self.finalized.lock().expect("recorder lock poisoned").push(block.clone());
    }

    fn on_double_propose_detected(&self, a: &Block, b: &Block) {
        self.double_proposals
            .lock()
            .expect("recorder lock poisoned")
            .push((a.clone(), b.clone()));
    }

    fn on_double_voting_detected(&self, a: &Vote, b: &Vote) {
        self.double_votes
            .lock()
            .expect("recorder lock poisoned")
            .push((a.clone(), b.clone()));
    }

    fn on_invalid_vote_detected(&self, vote: &Vote, reason: &str) {
        self.invalid_votes
            .lock()
            .expect("recorder lock poisoned")
            .push((vote.clone(), reason.to_string()));
    }
}

/// The well-known root every [`Cluster`] chain is built on.
pub fn genesis_block() -> Block {
    Block::new(
        0,
        Hash::zero(),
        NodeId::from_bytes([0u8; 32]),
        Hash::zero(),
        Timestamp::from_nanos(0),
        QuorumCert::genesis(),
    )
}

/// Wires up `stakes.len()` replicas sharing one committee, one random
/// beacon group key, and one [`InMemoryNetwork`], each running its own
/// [`EventHandler`]. Drives inter-replica delivery deterministically:
/// nothing moves except in response to `trigger_timeout` or
/// `deliver_all`.
pub struct Cluster {
    pub node_ids: Vec<NodeId>,
    pub network: Arc<InMemoryNetwork>,
    pub recorders: Vec<Arc<RecordingNotifier>>,
    replicas: Vec<EventHandler>,
}

impl Cluster {
    pub fn new(stakes: &[u64], config: ConsensusConfig) -> Self {
        let mut rng = ChaCha20Rng::from_seed([7u8; 32]);
        let threshold = stakes.len() / 2 + 1;
        let (group_pk, shares) = BeaconKeyGen::generate(threshold, stakes.len(), &mut rng)
            .expect("threshold key generation");

        let mut identities = Vec::with_capacity(stakes.len());
        let mut staking_keys = Vec::with_capacity(stakes.len());
        let mut node_ids = Vec::with_capacity(stakes.len());
        for (i, &stake) in stakes.iter().enumerate() {
            let kp = StakingKeyPair::generate(&mut rng);
            let mut raw = [0u8; 32];
            raw[0] = i as u8 + 1;
            let node_id = NodeId::from_bytes(raw);
            identities.push(Identity {
                node_id,
                staking_pub_key: kp.public_key().clone(),
                beacon_share_pub_key: shares[i].public_share(),
                stake,
            });
            staking_keys.push(kp);
            node_ids.push(node_id);
        }

        let network = InMemoryNetwork::new(&node_ids);
        let epoch_root = Hash::zero();
        let genesis = genesis_block();

        let mut replicas = Vec::with_capacity(stakes.len());
        let mut recorders = Vec::with_capacity(stakes.len());
        for (i, staking_key) in staking_keys.into_iter().enumerate() {
            let committee = Arc::new(
                StaticCommittee::with_beacon_group_key(
                    node_ids[i],
                    identities.clone(),
                    &epoch_root,
                    Some(group_pk.clone()),
                )
                .expect("committee construction"),
            );
            let signer = Signer::new(node_ids[i], SigningMode::Combined, staking_key)
                .with_beacon_share(shares[i].clone());
            let verifier = Verifier::new(SigningMode::Combined);
            let forks = Forks::new(genesis.clone());
            let persister = Arc::new(InMemoryPersister::new());
            let pacemaker = crate::pacemaker::PaceMaker::recover(config.clone(), persister.as_ref(), &forks)
                .expect("valid pacemaker config");

            let recorder = RecordingNotifier::new();
            let mut distributor = NotifierDistributor::new();
            distributor.register(Arc::new(TracingNotifier));
            distributor.register(recorder.clone() as Arc<dyn Notifier>);

            let handler = EventHandler::new(
                node_ids[i],
                committee,
                Arc::new(NodeNetworkHandle::new(node_ids[i], network.clone())),
                Arc::new(CountingBuilder::new()),
                persister,
                Arc::new(distributor),
                signer,
                verifier,
                forks,
                pacemaker,
                threshold,
            );

            replicas.push(handler);
            recorders.push(recorder);
        }

        Self {
            node_ids,
            network,
            recorders,
            replicas,
        }
    }

    pub fn handler(&self, idx: usize) -> &EventHandler {
        &self.replicas[idx]
    }

    pub fn handler_mut(&mut self, idx: usize) -> &mut EventHandler {
        &mut self.replicas[idx]
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Fires a local timeout on replica `idx`, draining whatever
    /// proposal(s) it produces for itself and then flooding the result
    /// through the network until every inbox is dry.
    pub async fn trigger_timeout(&mut self, idx: usize) {
        let _ = self.replicas[idx].on_local_timeout().await;
        self.drain_self(idx).await;
        self.deliver_all().await;
    }

    /// Feeds `vote` directly into replica `idx`, as if it had arrived
    /// over the network, then propagates any resulting traffic.
    pub async fn inject_vote(&mut self, idx: usize, vote: Vote) {
        let _ = self.replicas[idx].on_receive_vote(vote).await;
        self.drain_self(idx).await;
        self.deliver_all().await;
    }

    /// Repeatedly drains every replica's inbox and dispatches each
    /// message, stopping only once a full pass finds nothing left to
    /// deliver. Processing one message can enqueue more (a vote
    /// forming a QC triggers a fresh proposal broadcast), so this must
    /// loop rather than do a single pass.
    pub async fn deliver_all(&mut self) {
        loop {
            let mut delivered_any = false;
            for idx in 0..self.replicas.len() {
                let node_id = self.node_ids[idx];
                let messages = self.network.drain(node_id);
                if messages.is_empty() {
                    continue;
                }
                delivered_any = true;
                for bytes in messages {
                    if let Ok(message) = WireMessage::decode(&bytes) {
                        let _ = match message {
                            WireMessage::Proposal(p) => self.replicas[idx].on_receive_proposal(p).await,
                            WireMessage::Vote(v) => self.replicas[idx].on_receive_vote(v).await,
                        };
                        self.drain_self(idx).await;
                    }
                }
            }
            if !delivered_any {
                break;
            }
        }
    }

    async fn drain_self(&mut self, idx: usize) {
        loop {
            let batch = self.replicas[idx].take_own_proposals();
            if batch.is_empty() {
                break;
            }
            for proposal in batch {
                let _ = self.replicas[idx].on_receive_proposal(proposal).await;
            }
        }
    }
}
