use blake2b_simd::Params;
use headerd_consensus::{is_null_hash, ConsensusParams, Hash256};
use headerd_primitives::block::BlockHeader;
use primitive_types::U256;

use crate::difficulty::{compact_to_u256, hash_meets_target, CompactError};
use crate::epoch::{epoch_for_time, EpochCache, EpochError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowMode {
    /// Check the committed digest against the target without recomputing it.
    CommitmentOnly,
    /// Recompute the epoch hash and require it to match the committed digest.
    Full,
    /// Compute the epoch hash for a header whose digest is not filled in yet.
    Mining,
}

#[derive(Debug)]
pub enum PowError {
    InvalidBits(&'static str),
    Compact(CompactError),
    NullCommitment,
    CommitmentAboveTarget,
    HashMismatch,
    Epoch(EpochError),
}

impl PowError {
    /// True when the failure says nothing about the header itself.
    pub fn is_system_error(&self) -> bool {
        matches!(self, PowError::Epoch(_))
    }
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::InvalidBits(message) => write!(f, "{message}"),
            PowError::Compact(err) => write!(f, "{err}"),
            PowError::NullCommitment => write!(f, "proof-of-work digest is null"),
            PowError::CommitmentAboveTarget => write!(f, "commitment does not meet target"),
            PowError::HashMismatch => write!(f, "proof-of-work digest mismatch"),
            PowError::Epoch(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PowError {}

impl From<CompactError> for PowError {
    fn from(err: CompactError) -> Self {
        PowError::Compact(err)
    }
}

impl From<EpochError> for PowError {
    fn from(err: EpochError) -> Self {
        PowError::Epoch(err)
    }
}

/// RandomX commitment: blake2b-256 over the digest-less header followed by the
/// digest.
pub fn pow_commitment(header: &BlockHeader, digest: &Hash256) -> Hash256 {
    let out = Params::new()
        .hash_length(32)
        .to_state()
        .update(&header.consensus_encode_for_pow())
        .update(digest)
        .finalize();
    let mut commitment = [0u8; 32];
    commitment.copy_from_slice(out.as_bytes());
    commitment
}

pub fn epoch_hash(
    header: &BlockHeader,
    params: &ConsensusParams,
    cache: &EpochCache,
) -> Result<Hash256, PowError> {
    let epoch = epoch_for_time(header.time, params.epoch_duration)?;
    let context = cache.get(epoch)?;
    Ok(context.hash(&header.consensus_encode_for_pow())?)
}

pub fn target_from_bits(bits: u32) -> Result<U256, PowError> {
    let target = compact_to_u256(bits)?;
    if target.is_zero() {
        return Err(PowError::InvalidBits("pow target is zero"));
    }
    Ok(target)
}

/// Verifies the proof-of-work of `header` in `mode` and returns the digest
/// that satisfied the target: the stored one, or the freshly computed one in
/// [`PowMode::Mining`].
pub fn check_proof_of_work(
    header: &BlockHeader,
    params: &ConsensusParams,
    mode: PowMode,
    cache: &EpochCache,
) -> Result<Hash256, PowError> {
    let target = target_from_bits(header.bits)?;

    if mode != PowMode::Mining {
        if is_null_hash(&header.hash_pow) {
            return Err(PowError::NullCommitment);
        }
        let commitment = pow_commitment(header, &header.hash_pow);
        if !hash_meets_target(&commitment, &target) {
            return Err(PowError::CommitmentAboveTarget);
        }
        if mode == PowMode::CommitmentOnly {
            return Ok(header.hash_pow);
        }
    }

    let computed = epoch_hash(header, params, cache)?;
    if mode == PowMode::Mining {
        let commitment = pow_commitment(header, &computed);
        if !hash_meets_target(&commitment, &target) {
            return Err(PowError::CommitmentAboveTarget);
        }
        return Ok(computed);
    }

    if computed != header.hash_pow {
        return Err(PowError::HashMismatch);
    }
    Ok(computed)
}

pub fn grind_nonce(
    header: &BlockHeader,
    params: &ConsensusParams,
    cache: &EpochCache,
    max_tries: u32,
) -> Result<Option<BlockHeader>, PowError> {
    let mut candidate = header.clone();
    for _ in 0..max_tries {
        match check_proof_of_work(&candidate, params, PowMode::Mining, cache) {
            Ok(digest) => {
                candidate.hash_pow = digest;
                return Ok(Some(candidate));
            }
            Err(PowError::CommitmentAboveTarget) => {
                candidate.nonce = candidate.nonce.wrapping_add(1);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}
