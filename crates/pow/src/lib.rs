//! Difficulty adjustment and proof-of-work verification.

pub mod difficulty;
pub mod epoch;
pub mod validation;

pub use difficulty::{block_proof, next_work_required, AsertContext, CompactError, HeaderInfo};
pub use epoch::{EpochCache, EpochContext, EpochError};
pub use validation::{check_proof_of_work, PowError, PowMode};
