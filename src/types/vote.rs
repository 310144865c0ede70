use serde::{Deserialize, Serialize};

use crate::types::{Hash, NodeId, View};

/// A single replica's signed assent to `block_id` at `view`, under
/// either staking-only or combined (staking + random-beacon share) signing.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Vote {
    pub view: View,
    pub block_id: Hash,
    pub signer_id: NodeId,
    pub sig_data: Vec<u8>,
}

impl Vote {
    pub fn new(view: View, block_id: Hash, signer_id: NodeId, sig_data: Vec<u8>) -> Self {
        Self {
            view,
            block_id,
            signer_id,
            sig_data,
        }
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vote(view={}, block={}, signer={})", self.view, self.block_id, self.signer_id)
    }
}
