//! Structural validity of proposals, votes, and quorum certificates,
//! independent of the fork-choice/safety rules Forks applies
//! separately. This is the first gate a remote input passes through,
//! catching malformed or equivocating input before it touches the
//! block tree or vote pools.

use crate::committee::Committee;
use crate::error::HotStuffError;
use crate::signer::Verifier;
use crate::types::{Block, Proposal, QuorumCert, Vote};

pub struct Validator<'a> {
    committee: &'a dyn Committee,
    verifier: &'a Verifier,
}

impl<'a> Validator<'a> {
    pub fn new(committee: &'a dyn Committee, verifier: &'a Verifier) -> Self {
        Self { committee, verifier }
    }

    /// Checks a proposal's header linkage, `block_id` derivation, and
    /// the proposer's own signature — does not check safety/fork-choice.
    pub fn validate_proposal(&self, proposal: &Proposal) -> Result<(), HotStuffError> {
        self.validate_block_shape(&proposal.block)?;

        let expected_leader = self.committee.leader_for_view(proposal.block.view);
        if expected_leader != proposal.block.proposer_id {
            return Err(HotStuffError::InvalidBlock(format!(
                "block at view {} proposed by {}, expected leader {}",
                proposal.block.view, proposal.block.proposer_id, expected_leader
            )));
        }

        let implicit_vote = Vote::new(
            proposal.block.view,
            proposal.block.block_id,
            proposal.block.proposer_id,
            proposal.proposer_sig.clone(),
        );
        self.verifier.verify_vote(&implicit_vote, self.committee)
    }

    fn validate_block_shape(&self, block: &Block) -> Result<(), HotStuffError> {
        if !block.id_is_consistent() {
            return Err(HotStuffError::InvalidBlock(
                "block_id does not match header fields".to_string(),
            ));
        }
        if block.qc_for_parent.block_id != block.parent_id {
            return Err(HotStuffError::InvalidBlock(
                "qc_for_parent does not certify the declared parent".to_string(),
            ));
        }
        if block.qc_for_parent.view >= block.view {
            return Err(HotStuffError::InvalidBlock(format!(
                "parent QC view {} must be strictly less than block view {}",
                block.qc_for_parent.view, block.view
            )));
        }
        if block.qc_for_parent.is_genesis() {
            return Ok(());
        }
        self.validate_qc(&block.qc_for_parent)
    }

    pub fn validate_vote(&self, vote: &Vote) -> Result<(), HotStuffError> {
        self.verifier.verify_vote(vote, self.committee)
    }

    pub fn validate_qc(&self, qc: &QuorumCert) -> Result<(), HotStuffError> {
        let mut seen = std::collections::HashSet::with_capacity(qc.signer_ids.len());
        for signer in &qc.signer_ids {
            if !seen.insert(*signer) {
                return Err(HotStuffError::InvalidQc(format!(
                    "duplicate signer {signer} in quorum certificate"
                )));
            }
        }
        self.verifier.verify_qc(qc, self.committee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::StaticCommittee;
    use crate::crypto::BeaconKeyGen;
    use crate::signer::{Signer, SigningMode};
    use crate::types::{Hash, Identity, NodeId, Timestamp};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn setup() -> (StaticCommittee, Signer, Verifier) {
        let mut rng = ChaCha20Rng::from_seed([21u8; 32]);
        let (group_pk, shares) = BeaconKeyGen::generate(1, 1, &mut rng).unwrap();
        let kp = crate::crypto::StakingKeyPair::generate(&mut rng);
        let node_id = NodeId::from_bytes([1u8; 32]);
        let identity = Identity {
            node_id,
            staking_pub_key: kp.public_key().clone(),
            beacon_share_pub_key: shares[0].public_share(),
            stake: 100,
        };
        let committee = StaticCommittee::with_beacon_group_key(
            node_id,
            vec![identity],
            &Hash::zero(),
            Some(group_pk),
        )
        .unwrap();
        let signer = Signer::new(node_id, SigningMode::Combined, kp).with_beacon_share(shares[0].clone());
        let verifier = Verifier::new(SigningMode::Combined);
        (committee, signer, verifier)
    }

    #[test]
    fn well_formed_proposal_from_the_correct_leader_passes() {
        let (committee, signer, verifier) = setup();
        let block = Block::new(
            1,
            Hash::zero(),
            committee.myself(),
            Hash::from_bytes(b"payload"),
            Timestamp::from_nanos(0),
            QuorumCert::genesis(),
        );
        let proposal = signer.create_proposal(block).unwrap();

        let validator = Validator::new(&committee, &verifier);
        validator.validate_proposal(&proposal).unwrap();
    }

    #[test]
    fn tampered_block_id_is_rejected() {
        let (committee, signer, verifier) = setup();
        let block = Block::new(
            1,
            Hash::zero(),
            committee.myself(),
            Hash::from_bytes(b"payload"),
            Timestamp::from_nanos(0),
            QuorumCert::genesis(),
        );
        let mut proposal = signer.create_proposal(block).unwrap();
        proposal.block.payload_hash = Hash::from_bytes(b"swapped-payload");

        let validator = Validator::new(&committee, &verifier);
        assert!(validator.validate_proposal(&proposal).is_err());
    }
}
