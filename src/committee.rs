//! Committee: identity and leader-election queries against a fixed
//! epoch roster.
//!
//! The teacher's `get_leader` is a plain unweighted round-robin over
//! `leader_rotation`, rotated once per epoch. Leader selection here
//! additionally has to weight by stake and be stable within an epoch
//! while reproducible from nothing but the epoch root hash, so
//! `StaticCommittee` builds one cumulative-stake table at construction
//! and looks up `view` against it instead of indexing a flat rotation.

use std::collections::HashMap;

use crate::crypto::BeaconPublicKey;
use crate::error::HotStuffError;
use crate::types::{Hash, Identity, NodeId, View};

/// Predicate used by [`Committee::identities`] to filter the roster.
pub trait IdentityFilter: Fn(&Identity) -> bool {}
impl<F: Fn(&Identity) -> bool> IdentityFilter for F {}

pub trait Committee: Send + Sync {
    /// This replica's own node id.
    fn myself(&self) -> NodeId;

    /// The identity of `node_id` as of the epoch `block_id` belongs to.
    fn identity(&self, block_id: &Hash, node_id: &NodeId) -> Result<Identity, HotStuffError>;

    /// All identities in the epoch `block_id` belongs to that satisfy `filter`.
    fn identities(&self, block_id: &Hash, filter: &dyn Fn(&Identity) -> bool) -> Vec<Identity>;

    /// The deterministic leader of `view`.
    fn leader_for_view(&self, view: View) -> NodeId;

    /// Sum of stake across the whole committee.
    fn total_stake(&self) -> u64;

    /// `node_id`'s 1-based Shamir share index for the random-beacon
    /// scheme, stable for the lifetime of the epoch.
    fn share_index(&self, node_id: &NodeId) -> Result<u64, HotStuffError>;

    /// The group public key shares are reconstructed against, if this
    /// deployment runs the combined (staking + beacon) signing mode.
    fn beacon_group_public_key(&self) -> Option<&BeaconPublicKey>;
}

/// A single, epoch-stable committee: no membership change within scope.
///
/// Leader selection is a stake-weighted round robin: every replica
/// occupies a contiguous slice of `[0, total_stake)` proportional to
/// its stake, and `leader_for_view` walks `view` steps (mod
/// `total_stake`) from a start point seeded by the epoch root hash.
pub struct StaticCommittee {
    myself: NodeId,
    identities: Vec<Identity>,
    by_node: HashMap<NodeId, usize>,
    cumulative_stake: Vec<u64>,
    total_stake: u64,
    seed: u64,
    beacon_group_public_key: Option<BeaconPublicKey>,
}

impl StaticCommittee {
    pub fn new(myself: NodeId, identities: Vec<Identity>, epoch_root: &Hash) -> Result<Self, HotStuffError> {
        Self::with_beacon_group_key(myself, identities, epoch_root, None)
    }

    pub fn with_beacon_group_key(
        myself: NodeId,
        identities: Vec<Identity>,
        epoch_root: &Hash,
        beacon_group_public_key: Option<BeaconPublicKey>,
    ) -> Result<Self, HotStuffError> {
        if identities.is_empty() {
            return Err(HotStuffError::Configuration(
                "committee must have at least one member".to_string(),
            ));
        }
        if identities.iter().any(|id| id.stake == 0) {
            return Err(HotStuffError::Configuration(
                "committee members must have positive stake".to_string(),
            ));
        }

        let mut by_node = HashMap::with_capacity(identities.len());
        let mut cumulative_stake = Vec::with_capacity(identities.len());
        let mut running = 0u64;
        for (index, identity) in identities.iter().enumerate() {
            by_node.insert(identity.node_id, index);
            running += identity.stake;
            cumulative_stake.push(running);
        }

        let seed = seed_from_hash(epoch_root);

        Ok(Self {
            myself,
            identities,
            by_node,
            cumulative_stake,
            total_stake: running,
            seed,
            beacon_group_public_key,
        })
    }

    fn index_for_node(&self, node_id: &NodeId) -> Option<usize> {
        self.by_node.get(node_id).copied()
    }
}

fn seed_from_hash(hash: &Hash) -> u64 {
    let bytes = hash.as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().expect("hash is at least 8 bytes"))
}

impl Committee for StaticCommittee {
    fn myself(&self) -> NodeId {
        self.myself
    }

    fn identity(&self, _block_id: &Hash, node_id: &NodeId) -> Result<Identity, HotStuffError> {
        self.index_for_node(node_id)
            .map(|index| self.identities[index].clone())
            .ok_or(HotStuffError::InvalidSigner(*node_id))
    }

    fn identities(&self, _block_id: &Hash, filter: &dyn Fn(&Identity) -> bool) -> Vec<Identity> {
        self.identities.iter().filter(|id| filter(id)).cloned().collect()
    }

    fn leader_for_view(&self, view: View) -> NodeId {
        let position = self.seed.wrapping_add(view) % self.total_stake;
        let slot = self
            .cumulative_stake
            .partition_point(|&cumulative| cumulative <= position);
        self.identities[slot.min(self.identities.len() - 1)].node_id
    }

    fn total_stake(&self) -> u64 {
        self.total_stake
    }

    fn share_index(&self, node_id: &NodeId) -> Result<u64, HotStuffError> {
        self.index_for_node(node_id)
            .map(|index| index as u64 + 1)
            .ok_or(HotStuffError::InvalidSigner(*node_id))
    }

    fn beacon_group_public_key(&self) -> Option<&BeaconPublicKey> {
        self.beacon_group_public_key.as_ref()
    }
}
