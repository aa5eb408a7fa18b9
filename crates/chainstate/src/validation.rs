//! Header validation.

use std::sync::Arc;

use headerd_consensus::constants::{
    ANTI_DOS_WORK_BUFFER_BLOCKS, MAX_FUTURE_BLOCK_TIME, MIN_BLOCK_VERSION,
};
use headerd_consensus::{hash256_to_hex, ConsensusParams};
use headerd_pow::difficulty::block_proof;
use headerd_pow::validation::{check_proof_of_work, PowError, PowMode};
use headerd_pow::{next_work_required, AsertContext, EpochCache};
use headerd_primitives::BlockHeader;
use primitive_types::U256;

use crate::index::{BlockIndexStore, HeaderNode, NodeId};
use crate::ChainStateError;

pub const REJECT_DUPLICATE: &str = "duplicate";
pub const REJECT_HIGH_HASH: &str = "high-hash";
pub const REJECT_BAD_GENESIS: &str = "bad-genesis";
pub const REJECT_BAD_PREVBLK: &str = "bad-prevblk";
pub const REJECT_BAD_DIFFBITS: &str = "bad-diffbits";
pub const REJECT_TIME_TOO_OLD: &str = "time-too-old";
pub const REJECT_TIME_TOO_NEW: &str = "time-too-new";
pub const REJECT_BAD_VERSION: &str = "bad-version";
pub const REJECT_NETWORK_EXPIRED: &str = "network-expired";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub reason: &'static str,
    pub debug: String,
}

impl Rejection {
    pub fn new(reason: &'static str, debug: impl Into<String>) -> Self {
        Self {
            reason,
            debug: debug.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.debug.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{} ({})", self.reason, self.debug)
        }
    }
}

impl std::error::Error for Rejection {}

pub(crate) fn reject(reason: &'static str, debug: impl Into<String>) -> ChainStateError {
    ChainStateError::Invalid(Rejection::new(reason, debug))
}

pub trait HeaderPowCheck: Send + Sync {
    fn check_commitment(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError>;

    fn check_full(&self, header: &BlockHeader, params: &ConsensusParams)
        -> Result<(), ChainStateError>;
}

pub trait HeaderChecks: Send + Sync {
    fn check_structural(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
        pow: &dyn HeaderPowCheck,
    ) -> Result<(), ChainStateError>;

    fn check_contextual(
        &self,
        header: &BlockHeader,
        index: &BlockIndexStore,
        parent: NodeId,
        adjusted_time: i64,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError>;
}

pub struct EpochPowCheck {
    cache: Arc<EpochCache>,
}

impl EpochPowCheck {
    pub fn new(cache: Arc<EpochCache>) -> Self {
        Self { cache }
    }
}

impl Default for EpochPowCheck {
    fn default() -> Self {
        Self::new(EpochCache::global())
    }
}

impl HeaderPowCheck for EpochPowCheck {
    fn check_commitment(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        pow_outcome(check_proof_of_work(
            header,
            params,
            PowMode::CommitmentOnly,
            &self.cache,
        ))
    }

    fn check_full(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        pow_outcome(check_proof_of_work(header, params, PowMode::Full, &self.cache))
    }
}

/// Header failures become `high-hash` rejections; a missing epoch context is
/// a system error.
fn pow_outcome<T>(result: Result<T, PowError>) -> Result<(), ChainStateError> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_system_error() => Err(ChainStateError::Pow(err)),
        Err(err) => Err(reject(REJECT_HIGH_HASH, err.to_string())),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ConsensusHeaderChecks;

impl HeaderChecks for ConsensusHeaderChecks {
    fn check_structural(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
        pow: &dyn HeaderPowCheck,
    ) -> Result<(), ChainStateError> {
        check_block_header(header, params, pow)
    }

    fn check_contextual(
        &self,
        header: &BlockHeader,
        index: &BlockIndexStore,
        parent: NodeId,
        adjusted_time: i64,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        contextual_check_block_header(header, index, parent, adjusted_time, params)
    }
}

pub fn check_block_header(
    header: &BlockHeader,
    params: &ConsensusParams,
    pow: &dyn HeaderPowCheck,
) -> Result<(), ChainStateError> {
    pow.check_full(header, params)
}

pub fn next_work_required_for(
    index: &BlockIndexStore,
    parent: Option<NodeId>,
    params: &ConsensusParams,
) -> u32 {
    let Some(parent) = parent else {
        return next_work_required(None, params);
    };
    let prev = index.get(parent);
    let Some(anchor_id) = index.ancestor(parent, params.asert_anchor_height) else {
        // Still below the anchor: no ASERT context yet.
        return next_work_required(None, params);
    };
    let anchor = index.get(anchor_id);
    let context = AsertContext {
        prev: prev.info(),
        anchor: anchor.info(),
        anchor_parent_time: anchor
            .parent
            .map(|id| i64::from(index.get(id).time)),
    };
    next_work_required(Some(&context), params)
}

pub fn contextual_check_block_header(
    header: &BlockHeader,
    index: &BlockIndexStore,
    parent: NodeId,
    adjusted_time: i64,
    params: &ConsensusParams,
) -> Result<(), ChainStateError> {
    let height = index.get(parent).height + 1;

    let expected_bits = next_work_required_for(index, Some(parent), params);
    if header.bits != expected_bits {
        return Err(reject(
            REJECT_BAD_DIFFBITS,
            format!(
                "incorrect proof of work at height {height}: expected {expected_bits:08x}, got {:08x}",
                header.bits
            ),
        ));
    }

    let time = i64::from(header.time);
    let median_time_past = index.median_time_past(parent);
    if time <= median_time_past {
        return Err(reject(
            REJECT_TIME_TOO_OLD,
            format!("block time {time} not after median time past {median_time_past}"),
        ));
    }
    if time > adjusted_time + MAX_FUTURE_BLOCK_TIME {
        return Err(reject(
            REJECT_TIME_TOO_NEW,
            format!(
                "block time {time} more than {}s after adjusted time {adjusted_time}",
                MAX_FUTURE_BLOCK_TIME
            ),
        ));
    }

    if header.version < MIN_BLOCK_VERSION {
        return Err(reject(
            REJECT_BAD_VERSION,
            format!("block version {} too old", header.version),
        ));
    }

    check_network_expiration(height, params)
}

/// Rejects heights past the configured expiration and warns inside the grace
/// period before it.
pub fn check_network_expiration(
    height: i32,
    params: &ConsensusParams,
) -> Result<(), ChainStateError> {
    let expiration_height = params.network_expiration_interval;
    if expiration_height <= 0 {
        return Ok(());
    }
    if height > expiration_height {
        return Err(reject(
            REJECT_NETWORK_EXPIRED,
            format!("network expired at height {expiration_height}; this version is outdated"),
        ));
    }
    if height > expiration_height - params.network_expiration_grace_period {
        headerd_log::log_warn!(
            "Warning: network expires at height {} (current {}); update soon",
            expiration_height,
            height
        );
    }
    Ok(())
}

pub fn check_headers_pow(
    headers: &[BlockHeader],
    params: &ConsensusParams,
    pow: &dyn HeaderPowCheck,
) -> Result<(), ChainStateError> {
    for header in headers {
        if let Err(err) = pow.check_commitment(header, params) {
            headerd_log::log_debug!(
                "header {} failed batch commitment check: {}",
                hash256_to_hex(&header.hash()),
                err
            );
            return Err(err);
        }
    }
    Ok(())
}

pub fn check_headers_are_continuous(headers: &[BlockHeader]) -> bool {
    headers
        .windows(2)
        .all(|pair| pair[1].prev_block == pair[0].hash())
}

pub fn calculate_headers_work(headers: &[BlockHeader]) -> U256 {
    headers.iter().fold(U256::zero(), |total, header| {
        total.saturating_add(block_proof(header.bits))
    })
}

/// Minimum chain-work a peer's headers must reach before we spend effort on
/// them: zero while syncing, otherwise the configured minimum or the tip's
/// work less a buffer of [`ANTI_DOS_WORK_BUFFER_BLOCKS`] blocks, whichever is
/// higher.
pub fn anti_dos_work_threshold(
    tip: Option<&HeaderNode>,
    params: &ConsensusParams,
    is_initial_block_download: bool,
) -> U256 {
    if is_initial_block_download {
        return U256::zero();
    }
    let minimum = U256::from_little_endian(&params.minimum_chain_work);
    let Some(tip) = tip else {
        return minimum;
    };
    let buffer = block_proof(tip.bits)
        .saturating_mul(U256::from(ANTI_DOS_WORK_BUFFER_BLOCKS))
        .min(tip.chainwork);
    minimum.max(tip.chainwork - buffer)
}
