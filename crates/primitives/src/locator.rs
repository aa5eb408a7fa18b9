use headerd_consensus::Hash256;

/// Sparse list of ancestor hashes, densest near the tip, always ending at
/// genesis. Used by peers to find the fork point between their chains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockLocator {
    pub have: Vec<Hash256>,
}

impl BlockLocator {
    pub fn new(have: Vec<Hash256>) -> Self {
        Self { have }
    }

    pub fn is_empty(&self) -> bool {
        self.have.is_empty()
    }

    pub fn len(&self) -> usize {
        self.have.len()
    }
}
