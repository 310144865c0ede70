use serde::{Deserialize, Serialize};

use crate::types::{Hash, NodeId, QuorumCert, Timestamp, View};

/// A tree node, immutable once inserted into Forks.
///
/// `block_id` is the digest of every other header field; the QC for
/// the parent is carried inline so any block in the tree can validate
/// its own parent linkage without a separate lookup.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Block {
    pub block_id: Hash,
    pub view: View,
    pub parent_id: Hash,
    pub proposer_id: NodeId,
    pub payload_hash: Hash,
    pub timestamp: Timestamp,
    pub qc_for_parent: QuorumCert,
}

impl Block {
    /// Builds a block header and derives `block_id` from the remaining fields.
    /// `qc_for_parent` must already satisfy `qc_for_parent.block_id == parent_id`.
    pub fn new(
        view: View,
        parent_id: Hash,
        proposer_id: NodeId,
        payload_hash: Hash,
        timestamp: Timestamp,
        qc_for_parent: QuorumCert,
    ) -> Self {
        let block_id = Self::derive_id(view, &parent_id, &proposer_id, &payload_hash, &timestamp);
        Self {
            block_id,
            view,
            parent_id,
            proposer_id,
            payload_hash,
            timestamp,
            qc_for_parent,
        }
    }

    fn derive_id(
        view: View,
        parent_id: &Hash,
        proposer_id: &NodeId,
        payload_hash: &Hash,
        timestamp: &Timestamp,
    ) -> Hash {
        let mut data = Vec::with_capacity(8 + 32 + 32 + 32 + 8);
        data.extend_from_slice(&view.to_le_bytes());
        data.extend_from_slice(parent_id.as_bytes());
        data.extend_from_slice(proposer_id.as_bytes());
        data.extend_from_slice(payload_hash.as_bytes());
        data.extend_from_slice(&timestamp.as_nanos().to_le_bytes());
        Hash::from_bytes(&data)
    }

    /// True iff this block's own id matches what its header fields derive to.
    pub fn id_is_consistent(&self) -> bool {
        self.block_id
            == Self::derive_id(
                self.view,
                &self.parent_id,
                &self.proposer_id,
                &self.payload_hash,
                &self.timestamp,
            )
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Block {{ id: {}, view: {}, parent: {}, proposer: {} }}",
            self.block_id, self.view, self.parent_id, self.proposer_id
        )
    }
}
