//! Assembles a signed proposal given a parent QC and a target view.

use crate::error::HotStuffError;
use crate::external::Builder;
use crate::signer::Signer;
use crate::types::{Block, NodeId, Proposal, QuorumCert, Timestamp};

pub struct BlockProducer<'a> {
    proposer_id: NodeId,
    signer: &'a Signer,
    builder: &'a dyn Builder,
}

impl<'a> BlockProducer<'a> {
    pub fn new(proposer_id: NodeId, signer: &'a Signer, builder: &'a dyn Builder) -> Self {
        Self {
            proposer_id,
            signer,
            builder,
        }
    }

    /// Builds and signs a proposal for `view`, extending `parent_qc`.
    /// Fails rather than emitting a mismatched header if the Builder's
    /// result would not actually attach to the requested parent.
    pub async fn propose(&self, view: crate::types::View, parent_qc: QuorumCert) -> Result<Proposal, HotStuffError> {
        let payload_hash = self.builder.build_on(parent_qc.block_id).await?;

        let block = Block::new(
            view,
            parent_qc.block_id,
            self.proposer_id,
            payload_hash,
            Timestamp::now(),
            parent_qc,
        );

        if block.view != view || block.parent_id != block.qc_for_parent.block_id {
            return Err(HotStuffError::InvariantViolation(
                "assembled proposal does not match the requested view/parent".to_string(),
            ));
        }

        self.signer.create_proposal(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::StaticCommittee;
    use crate::crypto::{BeaconKeyGen, StakingKeyPair};
    use crate::signer::SigningMode;
    use crate::types::{Hash, Identity};
    use async_trait::async_trait;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    struct FixedBuilder(Hash);

    #[async_trait]
    impl Builder for FixedBuilder {
        async fn build_on(&self, _parent_id: Hash) -> Result<Hash, HotStuffError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn proposal_extends_the_requested_parent_qc() {
        let mut rng = ChaCha20Rng::from_seed([41u8; 32]);
        let (group_pk, shares) = BeaconKeyGen::generate(1, 1, &mut rng).unwrap();
        let kp = StakingKeyPair::generate(&mut rng);
        let node_id = NodeId::from_bytes([5u8; 32]);
        let identity = Identity {
            node_id,
            staking_pub_key: kp.public_key().clone(),
            beacon_share_pub_key: shares[0].public_share(),
            stake: 100,
        };
        let committee =
            StaticCommittee::with_beacon_group_key(node_id, vec![identity], &Hash::zero(), Some(group_pk)).unwrap();
        let _ = committee;
        let signer = Signer::new(node_id, SigningMode::Combined, kp).with_beacon_share(shares[0].clone());

        let parent_qc = QuorumCert::genesis();
        let builder = FixedBuilder(Hash::from_bytes(b"payload"));
        let producer = BlockProducer::new(node_id, &signer, &builder);

        let proposal = producer.propose(1, parent_qc.clone()).await.unwrap();
        assert_eq!(proposal.block.view, 1);
        assert_eq!(proposal.block.parent_id, parent_qc.block_id);
        assert!(proposal.block.id_is_consistent());
    }
}
