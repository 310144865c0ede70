use serde::{Deserialize, Serialize};

use crate::types::Block;

/// A `Block` extended with the proposer's own vote signature — the
/// proposer implicitly votes for its own proposal, so the header and
/// that vote travel together on the wire as `BlockProposal { header, proposer_sig }`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub block: Block,
    pub proposer_sig: Vec<u8>,
}

impl Proposal {
    pub fn new(block: Block, proposer_sig: Vec<u8>) -> Self {
        Self { block, proposer_sig }
    }
}

impl std::fmt::Display for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Proposal({})", self.block)
    }
}
