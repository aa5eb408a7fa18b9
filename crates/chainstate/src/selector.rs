//! Fork choice over the set of validated leaves.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use headerd_consensus::Hash256;
use primitive_types::U256;

use crate::index::{BlockIndexStore, HeaderNode, NodeId, STATUS_VALID_TREE};

/// Orders candidates by chain-work (desc), height (desc), then stored hash
/// bytes (asc), so the first entry is the preferred tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateKey {
    work: Reverse<U256>,
    height: Reverse<i32>,
    hash: Hash256,
    id: NodeId,
}

impl CandidateKey {
    fn new(id: NodeId, node: &HeaderNode) -> Self {
        Self {
            work: Reverse(node.chainwork),
            height: Reverse(node.height),
            hash: node.hash,
            id,
        }
    }

    fn of(index: &BlockIndexStore, id: NodeId) -> Self {
        Self::new(id, index.get(id))
    }
}

#[derive(Default)]
pub struct ChainSelector {
    candidates: BTreeSet<CandidateKey>,
    best_header: Option<NodeId>,
}

impl ChainSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` if it is a validated leaf, displacing its parent.
    pub fn try_add(&mut self, index: &BlockIndexStore, id: NodeId) -> bool {
        let node = index.get(id);
        if !node.is_valid(STATUS_VALID_TREE) || node.has_children() {
            return false;
        }
        if let Some(parent) = node.parent {
            self.candidates.remove(&CandidateKey::of(index, parent));
        }
        self.candidates.insert(CandidateKey::new(id, node))
    }

    pub fn add_candidate(&mut self, index: &BlockIndexStore, id: NodeId) -> bool {
        self.candidates.insert(CandidateKey::of(index, id))
    }

    pub fn remove(&mut self, index: &BlockIndexStore, id: NodeId) -> bool {
        self.candidates.remove(&CandidateKey::of(index, id))
    }

    pub fn contains(&self, index: &BlockIndexStore, id: NodeId) -> bool {
        self.candidates.contains(&CandidateKey::of(index, id))
    }

    pub fn find_most_work_chain(&self, index: &BlockIndexStore) -> Option<NodeId> {
        self.candidates
            .iter()
            .map(|key| key.id)
            .find(|id| !index.get(*id).is_failed())
    }

    pub fn is_preferred(index: &BlockIndexStore, a: NodeId, b: NodeId) -> bool {
        CandidateKey::of(index, a) < CandidateKey::of(index, b)
    }

    /// Drops every candidate that can no longer become the tip: less work than
    /// `tip`, `tip` itself or one of its ancestors, nodes with children and
    /// failed nodes.
    pub fn prune(&mut self, index: &BlockIndexStore, tip: NodeId) {
        let tip_node = index.get(tip);
        let tip_work = tip_node.chainwork;
        let before = self.candidates.len();
        self.candidates.retain(|key| {
            let node = index.get(key.id);
            if node.chainwork < tip_work || key.id == tip {
                return false;
            }
            if index.ancestor(tip, node.height) == Some(key.id) {
                return false;
            }
            !node.has_children() && !node.is_failed()
        });
        let pruned = before - self.candidates.len();
        if pruned > 0 {
            headerd_log::log_trace!("pruned {pruned} block index candidates");
        }
    }

    pub fn update_best_header(&mut self, index: &BlockIndexStore, id: NodeId) {
        let replace = match self.best_header {
            Some(best) => index.get(id).chainwork > index.get(best).chainwork,
            None => true,
        };
        if replace {
            self.best_header = Some(id);
        }
    }

    pub fn set_best_header(&mut self, id: Option<NodeId>) {
        self.best_header = id;
    }

    pub fn best_header(&self) -> Option<NodeId> {
        self.best_header
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.best_header = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.candidates.iter().map(|key| key.id)
    }
}
