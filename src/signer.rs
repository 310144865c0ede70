//! Produces and verifies proposal and vote signatures in either of the
//! two signing modes: staking-only, or staking combined with a
//! random-beacon share.
//!
//! Aggregation itself (stake counting, the decision that "enough"
//! votes have arrived) belongs to the VoteAggregator; this module only
//! turns a set of already-gathered votes into the single opaque
//! `sig_data` blob a QC carries, and the inverse: splitting a QC back
//! into its parts to check them against the committee's public keys.

use crate::committee::Committee;
use crate::crypto::{
    combine_shares, sign_bytes, BeaconSecretKeyShare, BeaconSignature, BeaconSignatureShare,
    Combiner, DomainTag, StakingAggregate, StakingKeyPair, StakingSignature,
};
use crate::error::HotStuffError;
use crate::types::{Block, Hash, NodeId, Proposal, QuorumCert, View, Vote};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SigningMode {
    /// Staking signature only. Used for non-main chains.
    Single,
    /// Staking signature plus a random-beacon share over the same message.
    Combined,
}

pub struct Signer {
    node_id: NodeId,
    mode: SigningMode,
    staking_key: StakingKeyPair,
    beacon_share: Option<BeaconSecretKeyShare>,
}

impl Signer {
    pub fn new(node_id: NodeId, mode: SigningMode, staking_key: StakingKeyPair) -> Self {
        Self {
            node_id,
            mode,
            staking_key,
            beacon_share: None,
        }
    }

    pub fn with_beacon_share(mut self, share: BeaconSecretKeyShare) -> Self {
        self.beacon_share = Some(share);
        self
    }

    fn sign_for(&self, view: View, block_id: &Hash) -> Result<Vec<u8>, HotStuffError> {
        let staking_msg = sign_bytes(DomainTag::ConsensusVote, view, block_id);
        let staking_sig = self.staking_key.sign(&staking_msg);

        match self.mode {
            SigningMode::Single => Ok(staking_sig.to_bytes().to_vec()),
            SigningMode::Combined => {
                let share = self.beacon_share.as_ref().ok_or_else(|| {
                    HotStuffError::Crypto("combined signing requires a beacon share".to_string())
                })?;
                let beacon_msg = sign_bytes(DomainTag::RandomBeacon, view, block_id);
                let beacon_share_sig = share.sign(&beacon_msg);
                Ok(Combiner::join(&staking_sig.to_bytes(), &beacon_share_sig.to_bytes()))
            }
        }
    }

    /// Produces the vote a proposer implicitly casts for its own block.
    pub fn create_proposal(&self, block: Block) -> Result<Proposal, HotStuffError> {
        let proposer_sig = self.sign_for(block.view, &block.block_id)?;
        Ok(Proposal::new(block, proposer_sig))
    }

    pub fn create_vote(&self, view: View, block_id: Hash) -> Result<Vote, HotStuffError> {
        let sig_data = self.sign_for(view, &block_id)?;
        Ok(Vote::new(view, block_id, self.node_id, sig_data))
    }

    /// Aggregates already-validated votes into a QC. Callers (the
    /// VoteAggregator) are responsible for having checked the stake
    /// threshold before calling this.
    pub fn create_qc(
        &self,
        view: View,
        block_id: Hash,
        votes: &[Vote],
        committee: &dyn Committee,
        beacon_threshold: usize,
    ) -> Result<QuorumCert, HotStuffError> {
        if votes.is_empty() {
            return Err(HotStuffError::InsufficientStake);
        }

        let mut staking_entries = Vec::with_capacity(votes.len());
        let mut beacon_shares = Vec::with_capacity(votes.len());

        for vote in votes {
            match self.mode {
                SigningMode::Single => {
                    let sig = parse_staking_signature(&vote.sig_data)?;
                    staking_entries.push((vote.signer_id, sig));
                }
                SigningMode::Combined => {
                    let (staking_part, beacon_part) = Combiner::split(&vote.sig_data)?;
                    staking_entries.push((vote.signer_id, parse_staking_signature(staking_part)?));
                    let index = committee.share_index(&vote.signer_id)?;
                    beacon_shares.push(parse_beacon_share(index, beacon_part)?);
                }
            }
        }

        let signer_ids: Vec<NodeId> = votes.iter().map(|v| v.signer_id).collect();
        let staking_aggregate = StakingAggregate::new(staking_entries);
        let staking_bytes = staking_aggregate.to_bytes()?;

        let sig_data = match self.mode {
            SigningMode::Single => staking_bytes,
            SigningMode::Combined => {
                let combined_beacon = combine_shares(&beacon_shares, beacon_threshold)?;
                Combiner::join(&staking_bytes, &combined_beacon.to_bytes())
            }
        };

        Ok(QuorumCert::new(view, block_id, signer_ids, sig_data))
    }
}

pub struct Verifier {
    mode: SigningMode,
}

impl Verifier {
    pub fn new(mode: SigningMode) -> Self {
        Self { mode }
    }

    pub fn verify_vote(&self, vote: &Vote, committee: &dyn Committee) -> Result<(), HotStuffError> {
        let identity = committee.identity(&vote.block_id, &vote.signer_id)?;
        let staking_msg = sign_bytes(DomainTag::ConsensusVote, vote.view, &vote.block_id);

        match self.mode {
            SigningMode::Single => {
                let sig = parse_staking_signature(&vote.sig_data)?;
                if !identity.staking_pub_key.verify(&staking_msg, &sig) {
                    return Err(HotStuffError::InvalidSignature(format!(
                        "staking signature invalid for signer {}",
                        vote.signer_id
                    )));
                }
            }
            SigningMode::Combined => {
                let (staking_part, beacon_part) = Combiner::split(&vote.sig_data)?;
                let staking_sig = parse_staking_signature(staking_part)?;
                if !identity.staking_pub_key.verify(&staking_msg, &staking_sig) {
                    return Err(HotStuffError::InvalidSignature(format!(
                        "staking signature invalid for signer {}",
                        vote.signer_id
                    )));
                }

                let beacon_msg = sign_bytes(DomainTag::RandomBeacon, vote.view, &vote.block_id);
                let beacon_sig = BeaconSignature::from_bytes(beacon_part)?;
                if !beacon_sig.verify(&beacon_msg, &identity.beacon_share_pub_key) {
                    return Err(HotStuffError::InvalidSignature(format!(
                        "beacon share invalid for signer {}",
                        vote.signer_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn verify_qc(&self, qc: &QuorumCert, committee: &dyn Committee) -> Result<(), HotStuffError> {
        if qc.signer_ids.is_empty() {
            return Err(HotStuffError::InvalidQc("quorum certificate has no signers".to_string()));
        }

        let mut stake_sum = 0u64;
        for node_id in &qc.signer_ids {
            let identity = committee.identity(&qc.block_id, node_id)?;
            stake_sum += identity.stake;
        }
        let threshold = (2 * committee.total_stake()) / 3;
        if stake_sum <= threshold {
            return Err(HotStuffError::InsufficientStake);
        }

        let staking_msg = sign_bytes(DomainTag::ConsensusVote, qc.view, &qc.block_id);
        let staking_bytes = match self.mode {
            SigningMode::Single => qc.sig_data.as_slice(),
            SigningMode::Combined => Combiner::split(&qc.sig_data)?.0,
        };
        let staking_aggregate = StakingAggregate::from_bytes(staking_bytes)?;
        let ok = staking_aggregate.verify_all(&staking_msg, |node_id| {
            committee.identity(&qc.block_id, node_id).ok().map(|id| id.staking_pub_key)
        });
        if !ok {
            return Err(HotStuffError::InvalidSignature(
                "staking aggregate failed verification".to_string(),
            ));
        }

        if self.mode == SigningMode::Combined {
            let (_, beacon_part) = Combiner::split(&qc.sig_data)?;
            let group_pk = committee.beacon_group_public_key().ok_or_else(|| {
                HotStuffError::Crypto("committee has no beacon group public key".to_string())
            })?;
            let beacon_msg = sign_bytes(DomainTag::RandomBeacon, qc.view, &qc.block_id);
            let beacon_sig = BeaconSignature::from_bytes(beacon_part)?;
            if !beacon_sig.verify(&beacon_msg, group_pk) {
                return Err(HotStuffError::InvalidSignature(
                    "beacon signature failed verification".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_staking_signature(bytes: &[u8]) -> Result<StakingSignature, HotStuffError> {
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| HotStuffError::Crypto("invalid staking signature length".to_string()))?;
    Ok(StakingSignature::from_bytes(&arr))
}

fn parse_beacon_share(index: u64, bytes: &[u8]) -> Result<BeaconSignatureShare, HotStuffError> {
    BeaconSignatureShare::from_indexed_bytes(index, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::StaticCommittee;
    use crate::crypto::BeaconKeyGen;
    use crate::types::Identity;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn setup(stakes: &[u64]) -> (StaticCommittee, Vec<Signer>) {
        let mut rng = ChaCha20Rng::from_seed([11u8; 32]);
        let threshold = stakes.len() / 2 + 1;
        let (group_pk, shares) = BeaconKeyGen::generate(threshold, stakes.len(), &mut rng).unwrap();

        let mut identities = Vec::new();
        let mut signers = Vec::new();
        for (i, &stake) in stakes.iter().enumerate() {
            let kp = StakingKeyPair::generate(&mut rng);
            let node_id = NodeId::from_bytes({
                let mut b = [0u8; 32];
                b[0] = i as u8 + 1;
                b
            });
            identities.push(Identity {
                node_id,
                staking_pub_key: kp.public_key().clone(),
                beacon_share_pub_key: shares[i].public_share(),
                stake,
            });
            signers.push(Signer::new(node_id, SigningMode::Combined, kp).with_beacon_share(shares[i].clone()));
        }

        let committee = StaticCommittee::with_beacon_group_key(
            identities[0].node_id,
            identities,
            &Hash::zero(),
            Some(group_pk),
        )
        .unwrap();

        (committee, signers)
    }

    #[test]
    fn combined_vote_round_trips_through_qc() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 5;
        let block_id = Hash::from_bytes(b"block-under-test");

        let votes: Vec<Vote> = signers
            .iter()
            .map(|s| s.create_vote(view, block_id).unwrap())
            .collect();

        let verifier = Verifier::new(SigningMode::Combined);
        for vote in &votes {
            verifier.verify_vote(vote, &committee).unwrap();
        }

        let qc = signers[0]
            .create_qc(view, block_id, &votes, &committee, 2)
            .unwrap();
        verifier.verify_qc(&qc, &committee).unwrap();
    }

    #[test]
    fn tampered_vote_is_rejected() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 5;
        let block_id = Hash::from_bytes(b"block-under-test");
        let mut vote = signers[0].create_vote(view, block_id).unwrap();
        if let Some(byte) = vote.sig_data.last_mut() {
            *byte ^= 0xff;
        }

        let verifier = Verifier::new(SigningMode::Combined);
        assert!(verifier.verify_vote(&vote, &committee).is_err());
    }

    #[test]
    fn qc_below_threshold_is_rejected() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 5;
        let block_id = Hash::from_bytes(b"block-under-test");
        let vote = signers[0].create_vote(view, block_id).unwrap();

        let verifier = Verifier::new(SigningMode::Combined);
        let qc = signers[0]
            .create_qc(view, block_id, std::slice::from_ref(&vote), &committee, 1)
            .unwrap();
        assert!(matches!(
            verifier.verify_qc(&qc, &committee),
            Err(HotStuffError::InsufficientStake)
        ));
    }
}
