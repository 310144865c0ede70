//! Dispatches validated proposals, votes, and timeouts into the
//! Forks/VoteAggregator/PaceMaker components and decides what this
//! replica should do next (vote, propose, re-arm a timer). Owns no
//! suspension points of its own beyond the external `Network` and
//! `Builder` calls it makes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::block_producer::BlockProducer;
use crate::committee::Committee;
use crate::error::{ErrorKind, HotStuffError};
use crate::external::{Builder, Network};
use crate::forks::Forks;
use crate::notifier::NotifierDistributor;
use crate::pacemaker::{PaceMaker, ViewChange};
use crate::persister::Persister;
use crate::signer::{Signer, Verifier};
use crate::types::{Hash, Proposal, QuorumCert, Vote};
use crate::validator::Validator;
use crate::vote_aggregator::VoteAggregator;
use crate::wire::WireMessage;

pub struct EventHandler {
    node_id: crate::types::NodeId,
    committee: Arc<dyn Committee>,
    network: Arc<dyn Network>,
    builder: Arc<dyn Builder>,
    persister: Arc<dyn Persister>,
    notifier: Arc<NotifierDistributor>,
    signer: Signer,
    verifier: Verifier,
    forks: Forks,
    vote_aggregator: VoteAggregator,
    pacemaker: PaceMaker,
    beacon_threshold: usize,
    /// Proposals queued for re-entry into `on_receive_proposal` rather
    /// than processed inline: proposals this replica produced for
    /// itself (a leader that forms its own QC instantly, e.g. a
    /// committee of one, would otherwise re-enter
    /// `propose_for_current_view` from inside itself, building a
    /// self-referential future), plus proposals whose missing parent
    /// has just arrived and are ready for a second `add_block` attempt.
    /// The caller (the EventLoop, or a test harness driving the
    /// handler directly) drains this queue in a plain loop after each
    /// dispatch.
    own_proposals: VecDeque<Proposal>,
    /// Proposals buffered because their parent block had not yet
    /// arrived, keyed by the missing parent's `block_id`. Drained into
    /// `own_proposals` as soon as that parent is inserted, mirroring
    /// `VoteAggregator`'s pending-vote buffer.
    pending_proposals: HashMap<Hash, Vec<Proposal>>,
}

impl EventHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: crate::types::NodeId,
        committee: Arc<dyn Committee>,
        network: Arc<dyn Network>,
        builder: Arc<dyn Builder>,
        persister: Arc<dyn Persister>,
        notifier: Arc<NotifierDistributor>,
        signer: Signer,
        verifier: Verifier,
        forks: Forks,
        pacemaker: PaceMaker,
        beacon_threshold: usize,
    ) -> Self {
        Self {
            node_id,
            committee,
            network,
            builder,
            persister,
            notifier,
            signer,
            verifier,
            forks,
            vote_aggregator: VoteAggregator::new(beacon_threshold),
            pacemaker,
            beacon_threshold,
            own_proposals: VecDeque::new(),
            pending_proposals: HashMap::new(),
        }
    }

    /// Drains proposals ready for (re-)entry into `on_receive_proposal`:
    /// ones this replica produced for itself, and ones that were
    /// buffered on a missing parent that has since arrived. Callers
    /// must keep calling this (processing each returned proposal
    /// through [`EventHandler::on_receive_proposal`]) until it returns
    /// empty, since processing one can enqueue another.
    pub fn take_own_proposals(&mut self) -> Vec<Proposal> {
        self.own_proposals.drain(..).collect()
    }

    pub fn current_view(&self) -> crate::types::View {
        self.pacemaker.current_view()
    }

    pub fn finalized_view(&self) -> crate::types::View {
        self.forks.finalized_view()
    }

    pub fn finalized_block_id(&self) -> crate::types::Hash {
        self.forks.finalized_block_id()
    }

    pub fn highest_qc(&self) -> QuorumCert {
        self.forks.highest_qc().clone()
    }

    pub fn node_id(&self) -> crate::types::NodeId {
        self.node_id
    }

    /// Validates, inserts into Forks, updates the PaceMaker, and if
    /// this replica may safely vote, does so — forwarding the vote to
    /// next view's leader (or processing it locally if that leader is
    /// this replica).
    pub async fn on_receive_proposal(&mut self, proposal: Proposal) -> Result<(), HotStuffError> {
        let validator = Validator::new(self.committee.as_ref(), &self.verifier);
        if let Err(e) = validator.validate_proposal(&proposal) {
            if e.classify() == ErrorKind::Invalid {
                self.notifier.on_invalid_vote_detected(
                    &Vote::new(proposal.block.view, proposal.block.block_id, proposal.block.proposer_id, Vec::new()),
                    &e.to_string(),
                );
            }
            return Err(e);
        }

        let block = proposal.block.clone();
        let outcome = match self.forks.add_block(block.clone()) {
            Ok(outcome) => outcome,
            Err(HotStuffError::MissingBlock(missing_parent)) => {
                self.pending_proposals.entry(missing_parent).or_default().push(proposal);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if let Some((a, b)) = &outcome.double_propose {
            self.notifier.on_double_propose_detected(a, b);
        }
        self.notifier.on_block_incorporated(&block);
        if let Some(waiting) = self.pending_proposals.remove(&block.block_id) {
            self.own_proposals.extend(waiting);
        }
        for finalized in &outcome.finalized {
            self.notifier.on_finalized_block(finalized);
        }
        if !outcome.finalized.is_empty() {
            self.vote_aggregator.prune_by_view(self.forks.finalized_view());
            self.prune_pending_proposals(self.forks.finalized_view());
        }

        if !block.qc_for_parent.is_genesis() {
            let newly_finalized = self.forks.add_qc(block.qc_for_parent.clone())?;
            self.notifier.on_qc_incorporated(&block.qc_for_parent);
            for finalized in &newly_finalized {
                self.notifier.on_finalized_block(finalized);
            }
            if !newly_finalized.is_empty() {
                self.vote_aggregator.prune_by_view(self.forks.finalized_view());
                self.prune_pending_proposals(self.forks.finalized_view());
            }
            self.pacemaker.record_progress();
            let change = self.pacemaker.advance_on_qc(block.qc_for_parent.view);
            self.apply_view_change(change);
        }

        let next_leader = self.committee.leader_for_view(block.view + 1);
        if block.proposer_id == self.node_id {
            let implicit_vote = Vote::new(block.view, block.block_id, block.proposer_id, proposal.proposer_sig.clone());
            if next_leader == self.node_id {
                self.absorb_proposer_vote(implicit_vote).await?;
            } else {
                let bytes = WireMessage::Vote(implicit_vote).encode()?;
                self.network.send(next_leader, bytes).await?;
            }
        }

        // Drain any votes that arrived for this block before the
        // block itself did.
        let drained = self.vote_aggregator.build_qc_on_received_block(
            &block.block_id,
            &self.signer,
            self.committee.as_ref(),
        )?;
        if let Some(qc) = drained {
            self.incorporate_fresh_qc(qc).await?;
        }

        // A proposer already cast its vote implicitly (`proposal.proposer_sig`,
        // absorbed above); it must not separately construct and cast a
        // second, explicit vote for its own block.
        if block.proposer_id != self.node_id
            && self.forks.is_safe_block(&block)
            && self.persister.last_voted_view()? < block.view
        {
            let vote = self.signer.create_vote(block.view, block.block_id)?;
            self.persister.put_voted_view(block.view)?;
            if next_leader == self.node_id {
                self.absorb_vote(vote).await?;
            } else {
                let bytes = WireMessage::Vote(vote).encode()?;
                self.network.send(next_leader, bytes).await?;
            }
        }

        Ok(())
    }

    /// Forwards to the VoteAggregator; on QC formation, hands the QC
    /// to Forks & the PaceMaker, and proposes immediately if this
    /// replica is the new current view's leader. A vote for a block
    /// this replica has not yet seen is buffered rather than dropped
    /// — it drains once the block itself arrives.
    pub async fn on_receive_vote(&mut self, vote: Vote) -> Result<(), HotStuffError> {
        let validator = Validator::new(self.committee.as_ref(), &self.verifier);
        if let Err(e) = validator.validate_vote(&vote) {
            self.notifier.on_invalid_vote_detected(&vote, &e.to_string());
            return Err(e);
        }
        if !self.forks.contains(&vote.block_id) {
            self.vote_aggregator.store_pending_vote(vote);
            return Ok(());
        }
        self.absorb_vote(vote).await
    }

    async fn absorb_vote(&mut self, vote: Vote) -> Result<(), HotStuffError> {
        let result = self
            .vote_aggregator
            .store_vote_and_build_qc(vote, &self.signer, self.committee.as_ref());
        self.handle_vote_result(result).await
    }

    async fn absorb_proposer_vote(&mut self, vote: Vote) -> Result<(), HotStuffError> {
        let result = self
            .vote_aggregator
            .store_proposer_vote(vote, &self.signer, self.committee.as_ref());
        self.handle_vote_result(result).await
    }

    async fn handle_vote_result(
        &mut self,
        result: Result<Option<QuorumCert>, HotStuffError>,
    ) -> Result<(), HotStuffError> {
        match result {
            Ok(Some(qc)) => self.incorporate_fresh_qc(qc).await,
            Ok(None) => Ok(()),
            Err(HotStuffError::DoubleVote(pair)) => {
                let (a, b) = *pair;
                self.notifier.on_double_voting_detected(&a, &b);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn incorporate_fresh_qc(&mut self, qc: QuorumCert) -> Result<(), HotStuffError> {
        let newly_finalized = self.forks.add_qc(qc.clone())?;
        self.notifier.on_qc_incorporated(&qc);
        for finalized in &newly_finalized {
            self.notifier.on_finalized_block(finalized);
        }
        if !newly_finalized.is_empty() {
            self.vote_aggregator.prune_by_view(self.forks.finalized_view());
            self.prune_pending_proposals(self.forks.finalized_view());
        }
        self.pacemaker.record_progress();
        let change = self.pacemaker.advance_on_qc(qc.view);
        self.apply_view_change(change);

        let cur_view = self.pacemaker.current_view();
        if self.committee.leader_for_view(cur_view) == self.node_id {
            self.propose_for_current_view().await?;
        }
        Ok(())
    }

    /// Drops any proposal buffered on a parent that will never arrive
    /// because its view has since been finalised/pruned past — mirrors
    /// `VoteAggregator::prune_by_view`'s handling of stale pending votes.
    fn prune_pending_proposals(&mut self, floor: crate::types::View) {
        self.pending_proposals.retain(|_, waiting| {
            waiting.retain(|p| p.block.view > floor);
            !waiting.is_empty()
        });
    }

    /// Asks the PaceMaker for the next-view decision; if this replica
    /// now leads, proposes from the highest known QC.
    pub async fn on_local_timeout(&mut self) -> Result<(), HotStuffError> {
        self.notifier.on_reached_timeout(self.pacemaker.current_view());
        let change = self.pacemaker.advance_on_timeout();
        self.apply_view_change(change);

        let cur_view = self.pacemaker.current_view();
        self.persister.put_started_view(cur_view)?;
        if self.committee.leader_for_view(cur_view) == self.node_id {
            self.propose_for_current_view().await?;
        }
        Ok(())
    }

    async fn propose_for_current_view(&mut self) -> Result<(), HotStuffError> {
        let cur_view = self.pacemaker.current_view();
        let parent_qc = self.forks.make_fork_choice(cur_view)?;
        self.notifier.on_fork_choice_generated(&parent_qc);

        if !self.pacemaker.block_rate_delay().is_zero() {
            tokio::time::sleep(self.pacemaker.block_rate_delay()).await;
        }

        let producer = BlockProducer::new(self.node_id, &self.signer, self.builder.as_ref());
        let proposal = producer.propose(cur_view, parent_qc).await?;

        // A proposal carries the proposer's own implicit vote
        // (`proposal.proposer_sig`), so this write must land before the
        // proposal reaches the network — same crash-safety discipline
        // as the explicit-vote branch below.
        if self.persister.last_voted_view()? < cur_view {
            self.persister.put_voted_view(cur_view)?;
        }

        let bytes = WireMessage::Proposal(proposal.clone()).encode()?;
        let targets: Vec<_> = self
            .committee
            .identities(&proposal.block.parent_id, &|identity| identity.node_id != self.node_id)
            .into_iter()
            .map(|identity| identity.node_id)
            .collect();
        self.network.broadcast(&targets, bytes).await?;

        // The proposer processes its own proposal exactly like a
        // remote one, but queued rather than called directly — see
        // `own_proposals`.
        self.own_proposals.push_back(proposal);
        Ok(())
    }

    fn apply_view_change(&self, change: ViewChange) {
        match change {
            ViewChange::None => {}
            ViewChange::Advanced(view) => self.notifier.on_entering_view(view),
            ViewChange::SkippedAhead(view) => {
                self.notifier.on_entering_view(view);
                self.notifier.on_skipped_ahead(view);
            }
        }
    }

    pub fn beacon_threshold(&self) -> usize {
        self.beacon_threshold
    }

    /// The duration the EventLoop's timer should be re-armed for, and
    /// which kind of timeout it is. A leader already holding the
    /// parent QC for the current view gets the shorter
    /// vote-collection window instead of the full replica timeout.
    pub fn timer_directive(&self) -> (std::time::Duration, crate::pacemaker::TimeoutKind) {
        let cur_view = self.pacemaker.current_view();
        let is_leader = self.committee.leader_for_view(cur_view) == self.node_id;
        let has_parent_qc = is_leader && self.forks.make_fork_choice(cur_view).is_ok();
        let directive = self.pacemaker.next_timeout(has_parent_qc);
        self.notifier.on_starting_timeout(cur_view, directive.0);
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::StaticCommittee;
    use crate::config::ConsensusConfig;
    use crate::crypto::{BeaconKeyGen, StakingKeyPair};
    use crate::persister::InMemoryPersister;
    use crate::signer::SigningMode;
    use crate::testkit::{CountingBuilder, InMemoryNetwork, NodeNetworkHandle};
    use crate::types::{Block, Identity, NodeId, Timestamp};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn genesis() -> Block {
        Block::new(
            0,
            Hash::zero(),
            NodeId::from_bytes([0u8; 32]),
            Hash::zero(),
            Timestamp::from_nanos(0),
            QuorumCert::genesis(),
        )
    }

    /// One-node committee plus the two proposals (view 1, and its
    /// child at view 2) an honest leader would produce, built entirely
    /// outside of any `EventHandler` so a test can feed them in
    /// whatever order it likes.
    fn single_node_chain() -> (Arc<dyn Committee>, Signer, Verifier, Proposal, Proposal) {
        let mut rng = ChaCha20Rng::from_seed([101u8; 32]);
        let (group_pk, shares) = BeaconKeyGen::generate(1, 1, &mut rng).unwrap();
        let kp = StakingKeyPair::generate(&mut rng);
        let node_id = NodeId::from_bytes([9u8; 32]);
        let identity = Identity {
            node_id,
            staking_pub_key: kp.public_key().clone(),
            beacon_share_pub_key: shares[0].public_share(),
            stake: 100,
        };
        let committee: Arc<dyn Committee> = Arc::new(
            StaticCommittee::with_beacon_group_key(node_id, vec![identity], &Hash::zero(), Some(group_pk))
                .expect("committee construction"),
        );
        let signer = Signer::new(node_id, SigningMode::Combined, kp).with_beacon_share(shares[0].clone());
        let verifier = Verifier::new(SigningMode::Combined);

        let genesis = genesis();
        let b1 = Block::new(
            1,
            genesis.block_id,
            node_id,
            Hash::from_bytes(b"payload-1"),
            Timestamp::from_nanos(1),
            QuorumCert::genesis(),
        );
        let proposal1 = signer.create_proposal(b1.clone()).unwrap();
        let vote1 = Vote::new(1, b1.block_id, node_id, proposal1.proposer_sig.clone());
        let qc1 = signer.create_qc(1, b1.block_id, &[vote1], committee.as_ref(), 1).unwrap();

        let b2 = Block::new(
            2,
            b1.block_id,
            node_id,
            Hash::from_bytes(b"payload-2"),
            Timestamp::from_nanos(2),
            qc1,
        );
        let proposal2 = signer.create_proposal(b2).unwrap();

        (committee, signer, verifier, proposal1, proposal2)
    }

    fn handler_for(committee: Arc<dyn Committee>, signer: Signer, verifier: Verifier) -> EventHandler {
        let node_id = committee.myself();
        let forks = Forks::new(genesis());
        let pacemaker = PaceMaker::new(ConsensusConfig::default(), 0).unwrap();
        let network: Arc<dyn Network> = Arc::new(NodeNetworkHandle::new(node_id, InMemoryNetwork::new(&[node_id])));
        let builder: Arc<dyn Builder> = Arc::new(CountingBuilder::new());
        let persister: Arc<dyn Persister> = Arc::new(InMemoryPersister::new());
        let distributor = Arc::new(NotifierDistributor::new());

        EventHandler::new(
            node_id, committee, network, builder, persister, distributor, signer, verifier, forks, pacemaker, 1,
        )
    }

    /// A proposal whose parent has not yet arrived must be buffered,
    /// not dropped, and replayed once the parent lands — mirroring
    /// `VoteAggregator`'s pending-vote buffer for the analogous
    /// situation on the vote path.
    #[tokio::test]
    async fn out_of_order_proposal_is_buffered_then_reconciled_on_parent_arrival() {
        let (committee, signer, verifier, proposal1, proposal2) = single_node_chain();
        let mut handler = handler_for(committee, signer, verifier);

        // The child arrives first: its parent is unknown to Forks, so
        // this must come back Ok (buffered), not an error, and nothing
        // should be ready for re-entry yet.
        handler.on_receive_proposal(proposal2.clone()).await.unwrap();
        assert!(handler.take_own_proposals().is_empty());

        // Now the parent arrives and is accepted; the buffered child
        // must be requeued for a second `add_block` attempt.
        handler.on_receive_proposal(proposal1.clone()).await.unwrap();
        let requeued = handler.take_own_proposals();
        assert!(
            requeued.iter().any(|p| p.block.block_id == proposal2.block.block_id),
            "the buffered child proposal must be requeued once its parent is inserted"
        );
    }

    /// A proposal this replica itself produces always carries its own
    /// implicit vote, so the persister write recording that vote must
    /// land before the proposal is handed to the network — otherwise a
    /// crash before the next persister write would let a restarted
    /// replica cast a second, conflicting vote at the same view.
    #[tokio::test]
    async fn own_proposal_persists_last_voted_view_before_leaving_the_replica() {
        let (committee, signer, verifier, _proposal1, _proposal2) = single_node_chain();
        let mut handler = handler_for(committee, signer, verifier);

        handler.on_local_timeout().await.unwrap();
        let produced = handler.take_own_proposals();
        assert_eq!(produced.len(), 1);
        let proposed_view = produced[0].block.view;

        // The implicit vote for this proposal must already be durable
        // even though the proposal has not been fed back through
        // `on_receive_proposal` yet — i.e. the write genuinely precedes
        // the proposal reaching the network, not just reconciliation.
        assert_eq!(handler.persister.last_voted_view().unwrap(), proposed_view);
    }
}
