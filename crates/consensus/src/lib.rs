//! Consensus constants, network parameters, and hash helpers.

pub mod constants;
pub mod params;

pub use params::{
    consensus_params, hash256_from_hex, hash256_to_hex, ConsensusParams, GenesisParams,
    HexError, Network,
};

/// 256-bit hash stored in little-endian byte order.
pub type Hash256 = [u8; 32];

pub const NULL_HASH: Hash256 = [0u8; 32];

pub fn is_null_hash(hash: &Hash256) -> bool {
    hash.iter().all(|byte| *byte == 0)
}
