//! Collects votes for each (view, block) pair and turns them into a
//! quorum certificate once a super-majority of stake has voted.
//!
//! Mirrors the structural role of the storage layer's vote bookkeeping
//! but keyed on the in-flight voting round rather than persisted
//! block state: entries here are transient and pruned once their view
//! is superseded.

use std::collections::HashMap;

use crate::committee::Committee;
use crate::error::HotStuffError;
use crate::signer::Signer;
use crate::types::{Hash, NodeId, QuorumCert, View, Vote};

/// One (view, block_id) round's accumulated votes.
#[derive(Default)]
struct VotingStatus {
    votes_by_signer: HashMap<NodeId, Vote>,
    qc: Option<QuorumCert>,
}

pub struct VoteAggregator {
    beacon_threshold: usize,
    rounds: HashMap<(View, Hash), VotingStatus>,
    /// Votes for a block this replica has not yet inserted into Forks,
    /// kept in arrival order so draining them on block arrival
    /// reproduces the order they would have been processed in had the
    /// block arrived first.
    pending: HashMap<Hash, Vec<Vote>>,
}

impl VoteAggregator {
    pub fn new(beacon_threshold: usize) -> Self {
        Self {
            beacon_threshold,
            rounds: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Buffers a vote whose referenced block has not yet arrived.
    /// Deduplicates by `(view, signer_id)` against votes already
    /// pending for the same block.
    pub fn store_pending_vote(&mut self, vote: Vote) {
        let entry = self.pending.entry(vote.block_id).or_default();
        if entry
            .iter()
            .any(|v| v.view == vote.view && v.signer_id == vote.signer_id)
        {
            return;
        }
        entry.push(vote);
    }

    /// Stores the implicit vote carried inside a proposal. The leader
    /// always has the block already, so this is just
    /// `store_vote_and_build_qc` under a name that matches the
    /// proposal-side call site.
    pub fn store_proposer_vote(
        &mut self,
        vote: Vote,
        signer: &Signer,
        committee: &dyn Committee,
    ) -> Result<Option<QuorumCert>, HotStuffError> {
        self.store_vote_and_build_qc(vote, signer, committee)
    }

    /// On block arrival, drains whatever votes were buffered for it
    /// (in arrival order), stopping as soon as the stake threshold is
    /// met and a QC is produced.
    pub fn build_qc_on_received_block(
        &mut self,
        block_id: &Hash,
        signer: &Signer,
        committee: &dyn Committee,
    ) -> Result<Option<QuorumCert>, HotStuffError> {
        let Some(buffered) = self.pending.remove(block_id) else {
            return Ok(None);
        };
        for vote in buffered {
            match self.store_vote_and_build_qc(vote, signer, committee) {
                Ok(Some(qc)) => return Ok(Some(qc)),
                Ok(None) => continue,
                Err(HotStuffError::DoubleVote(pair)) => return Err(HotStuffError::DoubleVote(pair)),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Records `vote`, returning the freshly-built QC if this vote was
    /// the one that crossed the stake threshold. Idempotent: a vote
    /// already on file for `(view, signer)` at a different block is
    /// reported as an equivocation rather than silently overwritten.
    pub fn store_vote_and_build_qc(
        &mut self,
        vote: Vote,
        signer: &Signer,
        committee: &dyn Committee,
    ) -> Result<Option<QuorumCert>, HotStuffError> {
        self.check_double_vote(&vote)?;

        let key = (vote.view, vote.block_id);
        let status = self.rounds.entry(key).or_default();
        if status.qc.is_some() {
            return Ok(status.qc.clone());
        }
        status.votes_by_signer.insert(vote.signer_id, vote);

        let votes: Vec<Vote> = status.votes_by_signer.values().cloned().collect();
        let stake_sum: u64 = votes
            .iter()
            .filter_map(|v| committee.identity(&v.block_id, &v.signer_id).ok())
            .map(|identity| identity.stake)
            .sum();
        let threshold = (2 * committee.total_stake()) / 3;
        if stake_sum <= threshold {
            return Ok(None);
        }

        let (view, block_id) = key;
        let qc = signer.create_qc(view, block_id, &votes, committee, self.beacon_threshold)?;
        self.rounds.get_mut(&key).expect("round exists").qc = Some(qc.clone());
        Ok(Some(qc))
    }

    /// A replica must never cast two votes for different blocks at the
    /// same view. Detects the violation against votes already on file
    /// and, on detection, evicts the signer's earlier vote from its
    /// original round so that round can never reach quorum on the
    /// strength of an equivocator's stake; does not itself prevent this
    /// replica's own `Signer` from being asked to sign twice — that
    /// discipline belongs to the event loop.
    fn check_double_vote(&mut self, vote: &Vote) -> Result<(), HotStuffError> {
        let conflict = self.rounds.iter().find_map(|((view, block_id), status)| {
            if *view != vote.view || *block_id == vote.block_id {
                return None;
            }
            status
                .votes_by_signer
                .get(&vote.signer_id)
                .filter(|existing| existing.block_id != vote.block_id)
                .map(|existing| ((*view, *block_id), existing.clone()))
        });

        let Some((other_round, existing)) = conflict else {
            return Ok(());
        };
        if let Some(status) = self.rounds.get_mut(&other_round) {
            status.votes_by_signer.remove(&vote.signer_id);
        }
        Err(HotStuffError::DoubleVote(Box::new((existing, vote.clone()))))
    }

    /// Discards every round at or below `v`; called once those views
    /// are finalised or otherwise beyond reconsideration. Votes
    /// arriving afterwards for a pruned view are rejected upstream
    /// with `StaleVote` before ever reaching this type.
    pub fn prune_by_view(&mut self, v: View) {
        self.rounds.retain(|(view, _), _| *view > v);
        for buffered in self.pending.values_mut() {
            buffered.retain(|vote| vote.view > v);
        }
        self.pending.retain(|_, buffered| !buffered.is_empty());
    }

    pub fn qc_for(&self, view: View, block_id: &Hash) -> Option<&QuorumCert> {
        self.rounds.get(&(view, *block_id)).and_then(|s| s.qc.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::StaticCommittee;
    use crate::crypto::{BeaconKeyGen, StakingKeyPair};
    use crate::signer::SigningMode;
    use crate::types::Identity;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn setup(stakes: &[u64]) -> (StaticCommittee, Vec<Signer>) {
        let mut rng = ChaCha20Rng::from_seed([31u8; 32]);
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
    fn qc_forms_once_stake_crosses_two_thirds() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 3;
        let block_id = Hash::from_bytes(b"round-under-test");
        let mut aggregator = VoteAggregator::new(2);

        let v0 = signers[0].create_vote(view, block_id).unwrap();
        let first = aggregator
            .store_vote_and_build_qc(v0, &signers[0], &committee)
            .unwrap();
        assert!(first.is_none());

        let v1 = signers[1].create_vote(view, block_id).unwrap();
        let second = aggregator
            .store_vote_and_build_qc(v1, &signers[1], &committee)
            .unwrap();
        assert!(second.is_some());
        assert_eq!(second.unwrap().signer_ids.len(), 2);
    }

    #[test]
    fn double_vote_at_same_view_is_rejected() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 3;
        let block_a = Hash::from_bytes(b"block-a");
        let block_b = Hash::from_bytes(b"block-b");
        let mut aggregator = VoteAggregator::new(2);

        let vote_a = signers[0].create_vote(view, block_a).unwrap();
        aggregator
            .store_vote_and_build_qc(vote_a, &signers[0], &committee)
            .unwrap();

        let vote_b = signers[0].create_vote(view, block_b).unwrap();
        let result = aggregator.store_vote_and_build_qc(vote_b, &signers[0], &committee);
        assert!(matches!(result, Err(HotStuffError::DoubleVote(_))));
    }

    #[test]
    fn equivocators_earlier_vote_is_evicted_and_cannot_help_reach_quorum() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 3;
        let block_a = Hash::from_bytes(b"block-a");
        let block_b = Hash::from_bytes(b"block-b");
        let mut aggregator = VoteAggregator::new(2);

        // Signer 0 votes for block_a, then equivocates onto block_b.
        let vote_a0 = signers[0].create_vote(view, block_a).unwrap();
        aggregator
            .store_vote_and_build_qc(vote_a0, &signers[0], &committee)
            .unwrap();
        let vote_b0 = signers[0].create_vote(view, block_b).unwrap();
        let result = aggregator.store_vote_and_build_qc(vote_b0, &signers[0], &committee);
        assert!(matches!(result, Err(HotStuffError::DoubleVote(_))));

        // The two remaining honest replicas vote for block_a. Their
        // combined stake (200 of 300) sits exactly at the non-strict
        // threshold: with signer 0's evicted stake gone, block_a's
        // round can never cross the strict `> 2S/3` bar, no matter how
        // many further votes arrive, proving the equivocator's earlier
        // vote no longer counts toward this round's quorum.
        let vote_a1 = signers[1].create_vote(view, block_a).unwrap();
        let after_one_more = aggregator
            .store_vote_and_build_qc(vote_a1, &signers[1], &committee)
            .unwrap();
        assert!(after_one_more.is_none());

        let vote_a2 = signers[2].create_vote(view, block_a).unwrap();
        let after_all_remaining = aggregator
            .store_vote_and_build_qc(vote_a2, &signers[2], &committee)
            .unwrap();
        assert!(
            after_all_remaining.is_none(),
            "block_a's round must not count the equivocator's evicted stake toward quorum"
        );
    }

    #[test]
    fn pending_votes_drain_on_block_arrival_and_stop_at_threshold() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let view = 4;
        let block_id = Hash::from_bytes(b"not-yet-arrived");
        let mut aggregator = VoteAggregator::new(2);

        for signer in &signers {
            let vote = signer.create_vote(view, block_id).unwrap();
            aggregator.store_pending_vote(vote);
        }

        let qc = aggregator
            .build_qc_on_received_block(&block_id, &signers[0], &committee)
            .unwrap();
        assert!(qc.is_some());
        assert_eq!(qc.unwrap().signer_ids.len(), 2);

        // The round is already satisfied; a second drain for the same
        // block finds nothing left buffered.
        assert!(aggregator
            .build_qc_on_received_block(&block_id, &signers[0], &committee)
            .unwrap()
            .is_none());
    }

    #[test]
    fn prune_by_view_drops_old_rounds() {
        let (committee, signers) = setup(&[100, 100, 100]);
        let mut aggregator = VoteAggregator::new(2);
        let block_id = Hash::from_bytes(b"old-round");
        let vote = signers[0].create_vote(1, block_id).unwrap();
        aggregator
            .store_vote_and_build_qc(vote, &signers[0], &committee)
            .unwrap();

        aggregator.prune_by_view(5);
        assert!(aggregator.qc_for(1, &block_id).is_none());
    }
}
