use std::collections::HashMap;

use headerd_consensus::constants::MEDIAN_TIME_SPAN;
use headerd_consensus::{is_null_hash, Hash256};
use headerd_pow::difficulty::block_proof;
use headerd_pow::HeaderInfo;
use headerd_primitives::{BlockHeader, BlockLocator};
use primitive_types::U256;

pub const STATUS_UNKNOWN: u8 = 0;
/// Parsed, cheap proof-of-work checked.
pub const STATUS_VALID_HEADER: u8 = 1;
/// Fully validated header whose ancestors are all valid.
pub const STATUS_VALID_TREE: u8 = 2;
pub const STATUS_VALID_MASK: u8 = 0x07;
pub const STATUS_FAILED_VALID: u8 = 1 << 5;
pub const STATUS_FAILED_CHILD: u8 = 1 << 6;
pub const STATUS_FAILED_MASK: u8 = STATUS_FAILED_VALID | STATUS_FAILED_CHILD;

const LOCATOR_DENSE_ENTRIES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    Duplicate,
    MissingParent,
    NotExtendingTip,
    Full,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Duplicate => write!(f, "header already indexed"),
            IndexError::MissingParent => write!(f, "parent header not indexed"),
            IndexError::NotExtendingTip => write!(f, "node does not extend the active tip"),
            IndexError::Full => write!(f, "block index is full"),
        }
    }
}

impl std::error::Error for IndexError {}

#[derive(Clone, Debug)]
pub struct HeaderNode {
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub parent: Option<NodeId>,
    pub height: i32,
    pub chainwork: U256,
    pub time: u32,
    pub bits: u32,
    pub status: u8,
    pub header: BlockHeader,
    child_count: u32,
}

impl HeaderNode {
    pub fn is_failed(&self) -> bool {
        (self.status & STATUS_FAILED_MASK) != 0
    }

    pub fn validity(&self) -> u8 {
        self.status & STATUS_VALID_MASK
    }

    pub fn is_valid(&self, level: u8) -> bool {
        !self.is_failed() && self.validity() >= level
    }

    pub fn raise_validity(&mut self, level: u8) -> bool {
        if self.is_failed() || self.validity() >= level {
            return false;
        }
        self.status = (self.status & !STATUS_VALID_MASK) | level;
        true
    }

    pub fn has_children(&self) -> bool {
        self.child_count > 0
    }

    pub fn info(&self) -> HeaderInfo {
        HeaderInfo {
            height: self.height,
            time: i64::from(self.time),
            bits: self.bits,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub height: i32,
    pub chainwork: U256,
    pub time: u32,
    pub bits: u32,
    pub status: u8,
    pub header: BlockHeader,
}

impl BlockIndexEntry {
    pub fn is_failed(&self) -> bool {
        (self.status & STATUS_FAILED_MASK) != 0
    }
}

impl From<&HeaderNode> for BlockIndexEntry {
    fn from(node: &HeaderNode) -> Self {
        Self {
            hash: node.hash,
            prev_hash: node.prev_hash,
            height: node.height,
            chainwork: node.chainwork,
            time: node.time,
            bits: node.bits,
            status: node.status,
            header: node.header.clone(),
        }
    }
}

#[derive(Default)]
pub struct BlockIndexStore {
    nodes: Vec<HeaderNode>,
    by_hash: HashMap<Hash256, NodeId>,
    active: Vec<NodeId>,
}

impl BlockIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, header: &BlockHeader) -> Result<NodeId, IndexError> {
        let hash = header.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(IndexError::Duplicate);
        }

        let parent = if is_null_hash(&header.prev_block) {
            None
        } else {
            Some(
                self.lookup(&header.prev_block)
                    .ok_or(IndexError::MissingParent)?,
            )
        };
        let (height, prev_work) = match parent {
            Some(parent) => {
                let node = self.get(parent);
                (node.height + 1, node.chainwork)
            }
            None => (0, U256::zero()),
        };

        let id = NodeId(u32::try_from(self.nodes.len()).map_err(|_| IndexError::Full)?);
        self.nodes.push(HeaderNode {
            hash,
            prev_hash: header.prev_block,
            parent,
            height,
            chainwork: prev_work.saturating_add(block_proof(header.bits)),
            time: header.time,
            bits: header.bits,
            status: STATUS_UNKNOWN,
            header: header.clone(),
            child_count: 0,
        });
        self.by_hash.insert(hash, id);
        if let Some(parent) = parent {
            self.nodes[parent.index()].child_count += 1;
        }
        Ok(id)
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<NodeId> {
        self.by_hash.get(hash).copied()
    }

    pub fn node(&self, hash: &Hash256) -> Option<&HeaderNode> {
        self.lookup(hash).map(|id| self.get(id))
    }

    pub fn get(&self, id: NodeId) -> &HeaderNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut HeaderNode {
        &mut self.nodes[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &HeaderNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    pub fn block_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.get(id).has_children()
    }

    /// Sets a failure flag on `id`. A failed node no longer counts as a child
    /// of its parent.
    pub fn mark_failed(&mut self, id: NodeId, flag: u8) {
        let node = &mut self.nodes[id.index()];
        let was_failed = node.is_failed();
        node.status |= flag & STATUS_FAILED_MASK;
        if was_failed || !node.is_failed() {
            return;
        }
        if let Some(parent) = node.parent {
            let parent = &mut self.nodes[parent.index()];
            parent.child_count = parent.child_count.saturating_sub(1);
        }
    }

    pub fn tip(&self) -> Option<NodeId> {
        self.active.last().copied()
    }

    pub fn height(&self) -> i32 {
        self.active.len() as i32 - 1
    }

    pub fn genesis(&self) -> Option<NodeId> {
        self.active.first().copied()
    }

    pub fn node_at_height(&self, height: i32) -> Option<NodeId> {
        usize::try_from(height)
            .ok()
            .and_then(|height| self.active.get(height))
            .copied()
    }

    pub fn is_on_active_chain(&self, id: NodeId) -> bool {
        let height = self.get(id).height;
        self.node_at_height(height) == Some(id)
    }

    pub fn extend_active_chain(&mut self, id: NodeId) -> Result<(), IndexError> {
        let node = self.get(id);
        if node.parent != self.tip() || node.height != self.active.len() as i32 {
            return Err(IndexError::NotExtendingTip);
        }
        self.active.push(id);
        Ok(())
    }

    pub fn rewind_active_chain(&mut self) -> Option<NodeId> {
        self.active.pop()
    }

    pub fn set_active_tip(&mut self, id: NodeId) {
        let height = self.get(id).height;
        self.active.resize(height as usize + 1, id);
        let mut walk = Some(id);
        while let Some(current) = walk {
            let slot = self.get(current).height as usize;
            if self.active[slot] == current && current != id {
                break;
            }
            self.active[slot] = current;
            walk = self.get(current).parent;
        }
    }

    pub fn ancestor(&self, id: NodeId, height: i32) -> Option<NodeId> {
        if height < 0 || height > self.get(id).height {
            return None;
        }
        let mut walk = id;
        loop {
            if self.is_on_active_chain(walk) {
                return self.node_at_height(height);
            }
            let node = self.get(walk);
            if node.height == height {
                return Some(walk);
            }
            walk = node.parent?;
        }
    }

    /// Median timestamp of `id` and up to ten of its ancestors.
    pub fn median_time_past(&self, id: NodeId) -> i64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut walk = Some(id);
        while let Some(current) = walk {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            let node = self.get(current);
            times.push(i64::from(node.time));
            walk = node.parent;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    pub fn last_common_ancestor(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        let height = self.get(a).height.min(self.get(b).height);
        let mut a = self.ancestor(a, height)?;
        let mut b = self.ancestor(b, height)?;
        while a != b {
            a = self.get(a).parent?;
            b = self.get(b).parent?;
        }
        Some(a)
    }

    /// Hashes from `id` back to genesis: the first ten one step apart, then
    /// doubling the step each time.
    pub fn locator(&self, id: NodeId) -> BlockLocator {
        let mut have = Vec::new();
        let mut step = 1i32;
        let mut walk = id;
        loop {
            let node = self.get(walk);
            have.push(node.hash);
            if node.height == 0 {
                break;
            }
            let height = (node.height - step).max(0);
            if have.len() > LOCATOR_DENSE_ENTRIES {
                step = step.saturating_mul(2);
            }
            match self.ancestor(walk, height) {
                Some(next) => walk = next,
                None => break,
            }
        }
        BlockLocator::new(have)
    }
}
