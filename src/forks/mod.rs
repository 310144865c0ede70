//! Forks: the block tree, the HotStuff safety rule, three-chain
//! finalisation, and fork-choice (selection of the QC a new proposal
//! extends). Exclusively owns the block tree — no other component
//! mutates it.

mod tree;

pub use tree::BlockTree;

use crate::error::HotStuffError;
use crate::types::{Block, Hash, QuorumCert, View};

/// Outcome of [`Forks::add_block`]: newly finalised blocks (oldest
/// first) and whether this insertion revealed a double propose.
#[derive(Debug, Default)]
pub struct AddBlockOutcome {
    pub finalized: Vec<Block>,
    pub double_propose: Option<(Block, Block)>,
}

pub struct Forks {
    tree: BlockTree,
    locked_view: View,
    locked_block_id: Hash,
    finalized_view: View,
    finalized_block_id: Hash,
    highest_qc: QuorumCert,
}

impl Forks {
    /// Builds a fresh tree rooted at `genesis`, locked and finalised on it.
    pub fn new(genesis: Block) -> Self {
        let genesis_id = genesis.block_id;
        let genesis_view = genesis.view;
        let mut tree = BlockTree::new();
        tree.insert(genesis);

        Self {
            tree,
            locked_view: genesis_view,
            locked_block_id: genesis_id,
            finalized_view: genesis_view,
            finalized_block_id: genesis_id,
            highest_qc: QuorumCert::genesis(),
        }
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.tree.contains(id)
    }

    pub fn get(&self, id: &Hash) -> Option<&Block> {
        self.tree.get(id)
    }

    pub fn finalized_view(&self) -> View {
        self.finalized_view
    }

    pub fn finalized_block_id(&self) -> Hash {
        self.finalized_block_id
    }

    pub fn locked_view(&self) -> View {
        self.locked_view
    }

    pub fn highest_qc(&self) -> &QuorumCert {
        &self.highest_qc
    }

    /// Rejects a block that is a stale/duplicate/malformed extension;
    /// otherwise inserts it and re-evaluates the lock against its
    /// parent chain. Re-adding an already-known block is a no-op.
    ///
    /// Never finalises: `block` itself carries no QC for itself, only
    /// `qc_for_parent` (a certificate for its parent), so the most a
    /// freshly-proposed block can justify is advancing the lock one
    /// step. Finalisation needs a QC that actually certifies `block`
    /// or a descendant of it, which only `add_qc` ever receives.
    pub fn add_block(&mut self, block: Block) -> Result<AddBlockOutcome, HotStuffError> {
        if self.tree.contains(&block.block_id) {
            return Ok(AddBlockOutcome::default());
        }
        if block.view <= self.finalized_view {
            return Err(HotStuffError::StaleView {
                view: block.view,
                floor: self.finalized_view,
            });
        }
        if !self.tree.contains(&block.parent_id) {
            return Err(HotStuffError::MissingBlock(block.parent_id));
        }

        let double_propose = self
            .tree
            .blocks_at_view_by_proposer(block.view, &block.proposer_id)
            .first()
            .map(|existing| ((*existing).clone(), block.clone()));

        let parent_id = block.parent_id;
        self.tree.insert(block.clone());
        self.advance_lock(&parent_id);

        Ok(AddBlockOutcome {
            finalized: Vec::new(),
            double_propose,
        })
    }

    /// Standard HotStuff safety rule: a replica may vote for `block`
    /// without violating an earlier vote iff it extends the locked
    /// block, or its parent QC view is newer than the lock.
    pub fn is_safe_block(&self, block: &Block) -> bool {
        if block.qc_for_parent.view > self.locked_view {
            return true;
        }
        self.tree
            .path_from_root(&self.locked_block_id, &block.block_id)
            .is_some()
    }

    /// Returns the highest-view QC known, provided it is strictly
    /// below `cur_view` (a replica must never build on a QC from its
    /// own or a future view).
    pub fn make_fork_choice(&self, cur_view: View) -> Result<QuorumCert, HotStuffError> {
        if self.highest_qc.view >= cur_view && !self.highest_qc.is_genesis() {
            return Err(HotStuffError::InvalidForkChoice(cur_view));
        }
        Ok(self.highest_qc.clone())
    }

    /// Registers a newly-seen QC, re-running the lock/finality check
    /// along the certified block's ancestor chain and updating the
    /// preferred fork-choice parent.
    pub fn add_qc(&mut self, qc: QuorumCert) -> Result<Vec<Block>, HotStuffError> {
        if !self.tree.contains(&qc.block_id) {
            return Err(HotStuffError::MissingBlock(qc.block_id));
        }

        if qc.view > self.highest_qc.view || self.highest_qc.is_genesis() {
            self.highest_qc = qc.clone();
        }

        let certified_block = self.tree.get(&qc.block_id).expect("checked above").clone();
        self.advance_lock_and_finality(&certified_block)
    }

    /// Re-checks the 2-chain lock rule treating `certified_block_id`
    /// as a block this replica knows to be genuinely QC-certified: if
    /// its parent is newer than the current lock and the two are
    /// consecutive views, the lock advances to that parent. Performs
    /// no finalisation — see [`Forks::advance_lock_and_finality`] for
    /// the full lock-and-finalise check, which only runs against a
    /// block an actual QC certifies.
    fn advance_lock(&mut self, certified_block_id: &Hash) {
        let Some(certified_block) = self.tree.get(certified_block_id) else {
            return;
        };
        let Some(parent) = self.tree.get(&certified_block.parent_id) else {
            return;
        };
        if parent.view + 1 != certified_block.view {
            return;
        }
        if parent.view > self.locked_view {
            self.locked_view = parent.view;
            self.locked_block_id = parent.block_id;
        }
    }

    /// Given `block` as the newest certified tip of a chain (a QC
    /// genuinely certifies `block` itself), checks for a 2-chain
    /// (updates the lock) and a 3-chain (finalises the grandparent and
    /// everything between it and the prior finalised tip).
    fn advance_lock_and_finality(&mut self, block: &Block) -> Result<Vec<Block>, HotStuffError> {
        self.advance_lock(&block.block_id);

        let Some(parent) = self.tree.get(&block.parent_id).cloned() else {
            return Ok(Vec::new());
        };
        if parent.view + 1 != block.view {
            return Ok(Vec::new());
        }

        let Some(grandparent) = self.tree.get(&parent.parent_id).cloned() else {
            return Ok(Vec::new());
        };
        if grandparent.view + 1 != parent.view {
            return Ok(Vec::new());
        }
        if grandparent.view <= self.finalized_view {
            return Ok(Vec::new());
        }

        let newly_finalized = self.finalize_up_to(&grandparent.block_id)?;
        Ok(newly_finalized)
    }

    fn finalize_up_to(&mut self, new_finalized_tip: &Hash) -> Result<Vec<Block>, HotStuffError> {
        let path = self
            .tree
            .path_from_root(&self.finalized_block_id, new_finalized_tip)
            .ok_or_else(|| {
                HotStuffError::InvariantViolation(
                    "finalisation target is not a descendant of the current finalised block".to_string(),
                )
            })?;

        // `path` includes the old finalised tip itself at index 0; the
        // newly finalised blocks are everything after it.
        let newly_finalized: Vec<Block> = path[1..]
            .iter()
            .map(|id| self.tree.get(id).expect("path only names known blocks").clone())
            .collect();

        if let Some(last) = newly_finalized.last() {
            self.finalized_view = last.view;
            self.finalized_block_id = last.block_id;
            self.tree.prune_to(&self.finalized_block_id);
        }

        Ok(newly_finalized)
    }

    /// Prunes vote/tree state for views at or below `v`; currently a
    /// thin wrapper since pruning already happens on finalisation —
    /// kept as an explicit entry point for the EventLoop's shutdown path.
    pub fn prune_by_view(&mut self, _v: View) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, Timestamp};

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

    fn child(parent: &Block, view: View) -> Block {
        Block::new(
            view,
            parent.block_id,
            NodeId::from_bytes([1u8; 32]),
            Hash::from_bytes(format!("payload-{view}").as_bytes()),
            Timestamp::from_nanos(view as i64),
            QuorumCert::new(parent.view, parent.block_id, vec![NodeId::from_bytes([1u8; 32])], vec![1, 2, 3]),
        )
    }

    #[test]
    fn add_block_alone_never_finalises() {
        let genesis = genesis();
        let mut forks = Forks::new(genesis.clone());

        let b1 = child(&genesis, 1);
        let b2 = child(&b1, 2);
        let b3 = child(&b2, 3);

        // None of these carry a QC for themselves, only for their
        // parent, so no amount of add_block alone may finalise anything.
        forks.add_block(b1.clone()).unwrap();
        forks.add_block(b2.clone()).unwrap();
        let outcome = forks.add_block(b3.clone()).unwrap();

        assert!(outcome.finalized.is_empty());
        assert_eq!(forks.finalized_view(), 0);
    }

    #[test]
    fn three_chain_finalises_the_grandparent_once_a_qc_certifies_the_tip() {
        let genesis = genesis();
        let mut forks = Forks::new(genesis.clone());

        let b1 = child(&genesis, 1);
        let b2 = child(&b1, 2);
        let b3 = child(&b2, 3);

        forks.add_block(b1.clone()).unwrap();
        forks.add_block(b2.clone()).unwrap();
        forks.add_block(b3.clone()).unwrap();

        // A QC that actually certifies b3 (not merely b3's embedded
        // qc_for_parent, which only certifies b2) is what drives
        // finalisation of the grandparent, b1.
        let qc_for_b3 = QuorumCert::new(b3.view, b3.block_id, vec![NodeId::from_bytes([1u8; 32])], vec![1, 2, 3]);
        let finalized = forks.add_qc(qc_for_b3).unwrap();

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].block_id, b1.block_id);
        assert_eq!(forks.finalized_view(), 1);
        assert_eq!(forks.locked_view(), b2.view);
    }

    #[test]
    fn is_safe_block_allows_extension_of_locked_block() {
        let genesis = genesis();
        let mut forks = Forks::new(genesis.clone());
        let b1 = child(&genesis, 1);
        let b2 = child(&b1, 2);
        forks.add_block(b1.clone()).unwrap();
        forks.add_block(b2.clone()).unwrap();

        let b3 = child(&b2, 3);
        assert!(forks.is_safe_block(&b3));
    }

    #[test]
    fn re_adding_a_known_block_is_a_no_op() {
        let genesis = genesis();
        let mut forks = Forks::new(genesis.clone());
        let b1 = child(&genesis, 1);
        forks.add_block(b1.clone()).unwrap();
        let outcome = forks.add_block(b1).unwrap();
        assert!(outcome.finalized.is_empty());
        assert!(outcome.double_propose.is_none());
    }

    #[test]
    fn fork_choice_rejects_a_qc_at_or_above_current_view() {
        let genesis = genesis();
        let mut forks = Forks::new(genesis.clone());
        let b1 = child(&genesis, 1);
        forks.add_block(b1).unwrap();
        assert!(forks.make_fork_choice(0).is_err());
    }
}
