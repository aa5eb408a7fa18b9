//! Header-chain state: the block index tree, fork choice, header validation
//! and the manager that ties them together.

pub mod index;
pub mod manager;
pub mod notify;
pub mod orphans;
pub mod persist;
pub mod selector;
pub mod timedata;
pub mod validation;

use headerd_pow::validation::PowError;
use headerd_primitives::DecodeError;
use headerd_storage::StoreError;

pub use index::{BlockIndexEntry, BlockIndexStore, HeaderNode, IndexError, NodeId};
pub use manager::{AcceptOutcome, ChainstateConfig, ChainstateManager};
pub use notify::{ChainEvent, ChainNotifications};
pub use orphans::{OrphanLimits, OrphanPool};
pub use selector::ChainSelector;
pub use timedata::{Clock, ManualClock, SystemClock, TimeData};
pub use validation::{
    ConsensusHeaderChecks, EpochPowCheck, HeaderChecks, HeaderPowCheck, Rejection,
};

#[derive(Debug)]
pub enum ChainStateError {
    Invalid(Rejection),
    Pow(PowError),
    Store(StoreError),
    Decode(DecodeError),
    Index(IndexError),
    NotInitialized,
    /// The parent is indexed but has not finished validation.
    UnvalidatedParent,
    GenesisMismatch,
    Corrupt(&'static str),
    Poisoned,
}

impl ChainStateError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, ChainStateError::Invalid(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ChainStateError::Invalid(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        self.rejection().map(|rejection| rejection.reason)
    }
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Invalid(rejection) => write!(f, "invalid header: {rejection}"),
            ChainStateError::Pow(err) => write!(f, "{err}"),
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::Decode(err) => write!(f, "{err}"),
            ChainStateError::Index(err) => write!(f, "{err}"),
            ChainStateError::NotInitialized => write!(f, "chainstate not initialized"),
            ChainStateError::UnvalidatedParent => write!(f, "parent header not yet validated"),
            ChainStateError::GenesisMismatch => write!(f, "genesis hash mismatch"),
            ChainStateError::Corrupt(message) => write!(f, "corrupt chainstate: {message}"),
            ChainStateError::Poisoned => write!(f, "chainstate lock poisoned"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<Rejection> for ChainStateError {
    fn from(rejection: Rejection) -> Self {
        ChainStateError::Invalid(rejection)
    }
}

impl From<PowError> for ChainStateError {
    fn from(err: PowError) -> Self {
        ChainStateError::Pow(err)
    }
}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<DecodeError> for ChainStateError {
    fn from(err: DecodeError) -> Self {
        ChainStateError::Decode(err)
    }
}

impl From<IndexError> for ChainStateError {
    fn from(err: IndexError) -> Self {
        ChainStateError::Index(err)
    }
}
