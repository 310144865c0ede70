use serde::{Deserialize, Serialize};

use crate::crypto::{BeaconPublicKey, StakingPublicKey};

/// 32-byte node identifier, independent of any particular signature scheme.
///
/// The wire header carries `proposer_id` as a fixed 32-byte field
/// rather than a small integer, so identities are addressed by digest
/// rather than by array index — this lets the committee roster change
/// public keys across epochs without renumbering replicas.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

/// A committee member's identity at a given epoch: its addressing id,
/// its two public keys (staking + random-beacon share), and its stake.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Identity {
    pub node_id: NodeId,
    pub staking_pub_key: StakingPublicKey,
    pub beacon_share_pub_key: BeaconPublicKey,
    pub stake: u64,
}
