//! An arena-keyed block tree: blocks are addressed by `block_id`, with
//! a children index for O(1) traversal, in place of pointer-linked
//! tree nodes. Grounded in Diem/Aptos's `block_store.rs`, which keeps
//! exactly this shape (a flat map plus a child-list index) to avoid
//! cyclic `Arc` ownership between parent and child nodes.

use std::collections::HashMap;

use crate::types::{Block, Hash, View};

pub struct BlockTree {
    blocks: HashMap<Hash, Block>,
    children: HashMap<Hash, Vec<Hash>>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn insert(&mut self, block: Block) {
        if self.blocks.contains_key(&block.block_id) {
            return;
        }
        self.children.entry(block.parent_id).or_default().push(block.block_id);
        self.blocks.insert(block.block_id, block);
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn get(&self, id: &Hash) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn children_of(&self, id: &Hash) -> &[Hash] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Blocks proposed by `proposer` at `view`, used to detect a double propose.
    pub fn blocks_at_view_by_proposer(&self, view: View, proposer: &crate::types::NodeId) -> Vec<&Block> {
        self.blocks
            .values()
            .filter(|b| b.view == view && &b.proposer_id == proposer)
            .collect()
    }

    /// Walks parent pointers from `tip` back to (and including) `root`,
    /// returning the chain oldest-first. `None` if `root` is not an ancestor of `tip`.
    pub fn path_from_root(&self, root: &Hash, tip: &Hash) -> Option<Vec<Hash>> {
        let mut path = Vec::new();
        let mut current = *tip;
        loop {
            path.push(current);
            if current == *root {
                path.reverse();
                return Some(path);
            }
            let block = self.blocks.get(&current)?;
            if block.block_id == block.parent_id {
                return None;
            }
            current = block.parent_id;
        }
    }

    /// Discards every block not reachable (forward) from `new_root`,
    /// i.e. every block on a branch that conflicts with the finalised
    /// chain. `new_root` itself is kept.
    pub fn prune_to(&mut self, new_root: &Hash) {
        let mut keep = std::collections::HashSet::new();
        let mut stack = vec![*new_root];
        while let Some(id) = stack.pop() {
            if !keep.insert(id) {
                continue;
            }
            stack.extend(self.children_of(&id).iter().copied());
        }

        self.blocks.retain(|id, _| keep.contains(id));
        self.children.retain(|id, _| keep.contains(id));
        for child_list in self.children.values_mut() {
            child_list.retain(|id| keep.contains(id));
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for BlockTree {
    fn default() -> Self {
        Self::new()
    }
}
