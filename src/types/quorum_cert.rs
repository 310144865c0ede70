use serde::{Deserialize, Serialize};

use crate::types::{Hash, NodeId, View};

/// Proof that a super-majority of stake voted for `block_id` at `view`.
///
/// `sig_data` is an opaque, signer-independent blob produced by the
/// `Signer` and interpreted only by the `Verifier` — either a bare
/// staking aggregate, or a staking aggregate and a reconstructed
/// beacon signature packed together by [`crate::crypto::Combiner`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct QuorumCert {
    pub view: View,
    pub block_id: Hash,
    pub signer_ids: Vec<NodeId>,
    pub sig_data: Vec<u8>,
}

impl QuorumCert {
    pub fn new(view: View, block_id: Hash, signer_ids: Vec<NodeId>, sig_data: Vec<u8>) -> Self {
        Self {
            view,
            block_id,
            signer_ids,
            sig_data,
        }
    }

    /// The well-known certificate for the genesis block: view 0, no
    /// signers, carries no cryptographic weight and is never verified
    /// against the committee. Every fresh chain bootstraps from it.
    pub fn genesis() -> Self {
        Self {
            view: 0,
            block_id: Hash::zero(),
            signer_ids: Vec::new(),
            sig_data: Vec::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.view == 0 && self.block_id.is_zero() && self.signer_ids.is_empty()
    }
}

impl std::fmt::Display for QuorumCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "QC(view={}, block={}, signers={})",
            self.view,
            self.block_id,
            self.signer_ids.len()
        )
    }
}
