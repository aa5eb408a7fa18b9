//! Difficulty and compact target utilities.

use headerd_consensus::{ConsensusParams, Hash256};
use primitive_types::{U256, U512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub height: i32,
    pub time: i64,
    pub bits: u32,
}

/// Inputs to one ASERT step: the parent of the block being retargeted, the
/// anchor block and the anchor's parent (for its timestamp).
#[derive(Clone, Copy, Debug)]
pub struct AsertContext {
    pub prev: HeaderInfo,
    pub anchor: HeaderInfo,
    pub anchor_parent_time: Option<i64>,
}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    let value = if size <= 3 {
        let shift = 8 * (3 - size);
        word >>= shift;
        U256::from(word)
    } else {
        let shift = 8 * (size - 3);
        if shift >= 256 {
            U256::zero()
        } else {
            U256::from(word) << shift
        }
    };

    if negative && word != 0 {
        return Err(CompactError::Negative);
    }

    if word != 0 {
        let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
        if overflow {
            return Err(CompactError::Overflow);
        }
    }

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact: u32;

    if size <= 3 {
        compact = value.low_u32() << (8 * (3 - size));
    } else {
        let shift = 8 * (size - 3);
        compact = (value >> shift).low_u32();
    }

    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn compact_to_target(bits: u32) -> Result<Hash256, CompactError> {
    let value = compact_to_u256(bits)?;
    Ok(u256_to_hash(value))
}

pub fn target_to_compact(target: &Hash256) -> u32 {
    u256_to_compact(U256::from_little_endian(target))
}

pub fn hash_meets_target(hash: &Hash256, target: &U256) -> bool {
    U256::from_little_endian(hash) <= *target
}

/// Expected number of hashes for a block at `bits`; zero when the target is
/// unusable.
pub fn block_proof(bits: u32) -> U256 {
    let target = match compact_to_u256(bits) {
        Ok(target) => target,
        Err(_) => return U256::zero(),
    };
    if target.is_zero() {
        return U256::zero();
    }
    let one = U256::from(1u64);
    (!target / (target + one)) + one
}

pub fn u256_to_hash(value: U256) -> Hash256 {
    value.to_little_endian()
}

pub fn pow_limit_bits(params: &ConsensusParams) -> u32 {
    target_to_compact(&params.pow_limit)
}

pub fn difficulty(bits: u32, params: &ConsensusParams) -> f64 {
    let target = match compact_to_u256(bits) {
        Ok(target) => target,
        Err(_) => return 0.0,
    };
    if target.is_zero() || target > U256::from_little_endian(&params.pow_limit) {
        return 0.0;
    }

    let mut shift = (bits >> 24) & 0xff;
    let mut diff = 0x0000_ffff as f64 / (bits & 0x00ff_ffff) as f64;
    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}

/// Compact target required for the block following `context.prev`.
///
/// Without a context (genesis), on networks that never retarget, and before
/// the anchor height, this is the proof-of-work limit. Otherwise the target is
/// scaled from the anchor's by `2^((time_diff - ideal_time) / half_life)`.
pub fn next_work_required(context: Option<&AsertContext>, params: &ConsensusParams) -> u32 {
    let limit_bits = pow_limit_bits(params);
    let Some(context) = context else {
        return limit_bits;
    };
    if params.pow_no_retargeting() || context.prev.height < params.asert_anchor_height {
        return limit_bits;
    }

    let pow_limit = U256::from_little_endian(&params.pow_limit);
    let ref_target = match compact_to_u256(context.anchor.bits) {
        Ok(target) if !target.is_zero() && target <= pow_limit => target,
        _ => pow_limit,
    };

    let reference_time = context
        .anchor_parent_time
        .unwrap_or(context.anchor.time - params.pow_target_spacing);
    let time_diff = context.prev.time - reference_time;
    let height_diff = i64::from(context.prev.height - params.asert_anchor_height);

    let next = calculate_asert(
        ref_target,
        params.pow_target_spacing,
        time_diff,
        height_diff,
        pow_limit,
        params.asert_half_life,
    );
    u256_to_compact(next)
}

/// Fixed-point ASERT step. The cubic approximation of `2^x` and its
/// coefficients are consensus constants.
pub fn calculate_asert(
    ref_target: U256,
    target_spacing: i64,
    time_diff: i64,
    height_diff: i64,
    pow_limit: U256,
    half_life: i64,
) -> U256 {
    let exponent_base =
        i128::from(time_diff) - i128::from(target_spacing) * (i128::from(height_diff) + 1);
    let exponent = (exponent_base * 65_536) / i128::from(half_life.max(1));

    let mut shifts = exponent >> 16;
    let frac = exponent as u16 as u64;

    let poly = 195_766_423_245_049u64
        .wrapping_mul(frac)
        .wrapping_add(971_821_376u64.wrapping_mul(frac).wrapping_mul(frac))
        .wrapping_add(5_127u64.wrapping_mul(frac).wrapping_mul(frac).wrapping_mul(frac))
        .wrapping_add(1u64 << 47);
    let factor = 65_536u64 + (poly >> 48);

    let pow_limit512 = u256_to_u512(pow_limit);
    let mut next512 = u256_to_u512(ref_target) * U512::from(factor);

    shifts -= 16;
    if shifts <= 0 {
        let right = -shifts;
        next512 = if right >= 512 {
            U512::zero()
        } else {
            next512 >> (right as usize)
        };
    } else if shifts >= 512 {
        next512 = pow_limit512;
    } else {
        let left = shifts as usize;
        let shifted = next512 << left;
        next512 = if (shifted >> left) != next512 {
            pow_limit512
        } else {
            shifted
        };
    }

    if next512 > pow_limit512 {
        next512 = pow_limit512;
    }

    let next = u512_to_u256(next512);
    if next.is_zero() {
        U256::from(1u64)
    } else if next > pow_limit {
        pow_limit
    } else {
        next
    }
}

fn u256_to_u512(value: U256) -> U512 {
    U512::from_little_endian(&value.to_little_endian())
}

fn u512_to_u256(value: U512) -> U256 {
    let bytes = value.to_little_endian();
    U256::from_little_endian(&bytes[..32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use headerd_consensus::params::{consensus_params, Network};

    fn info(height: i32, time: i64, bits: u32) -> HeaderInfo {
        HeaderInfo { height, time, bits }
    }

    #[test]
    fn block_proof_of_max_target_is_one() {
        assert_eq!(block_proof(0x207f_ffff), U256::from(2u64));
        assert_eq!(block_proof(0x0180_0000), U256::zero());
        assert_eq!(block_proof(0), U256::zero());
        assert_eq!(block_proof(0xff12_3456), U256::zero());
    }

    #[test]
    fn block_proof_matches_bitcoin_genesis() {
        // 0x1d00ffff has work 0x100010001.
        assert_eq!(block_proof(0x1d00_ffff), U256::from(0x1_0001_0001u64));
    }

    #[test]
    fn compact_rejects_negative_and_overflow() {
        assert_eq!(compact_to_u256(0x0480_0001), Err(CompactError::Negative));
        assert_eq!(compact_to_u256(0xff12_3456), Err(CompactError::Overflow));
        assert_eq!(compact_to_u256(0x0080_0000), Ok(U256::zero()));
    }

    #[test]
    fn genesis_and_pre_anchor_use_pow_limit() {
        let params = consensus_params(Network::Mainnet);
        let limit = pow_limit_bits(&params);
        assert_eq!(next_work_required(None, &params), limit);

        let genesis = info(0, 1_000_000, 0x1d00_ffff);
        let context = AsertContext {
            prev: genesis,
            anchor: genesis,
            anchor_parent_time: None,
        };
        assert_eq!(next_work_required(Some(&context), &params), limit);
    }

    #[test]
    fn regtest_never_retargets() {
        let params = consensus_params(Network::Regtest);
        let anchor = info(1, 1_000, 0x1d00_ffff);
        let context = AsertContext {
            prev: info(50, 1_001, 0x1d00_ffff),
            anchor,
            anchor_parent_time: Some(900),
        };
        assert_eq!(next_work_required(Some(&context), &params), 0x207f_ffff);
    }

    #[test]
    fn on_schedule_keeps_anchor_target() {
        let params = consensus_params(Network::Mainnet);
        let spacing = params.pow_target_spacing;
        let anchor_bits = 0x1d00_ffff;
        let genesis_time = 1_700_000_000i64;
        let anchor = info(1, genesis_time + spacing, anchor_bits);

        for height in 1..=1_000i32 {
            let context = AsertContext {
                prev: info(height, genesis_time + spacing * i64::from(height), anchor_bits),
                anchor,
                anchor_parent_time: Some(genesis_time),
            };
            assert_eq!(next_work_required(Some(&context), &params), anchor_bits);
        }
    }

    #[test]
    fn one_half_life_ahead_doubles_target() {
        let params = consensus_params(Network::Mainnet);
        let pow_limit = U256::from_little_endian(&params.pow_limit);
        let ref_target = compact_to_u256(0x1d00_ffff).expect("target");
        let spacing = params.pow_target_spacing;
        let half_life = params.asert_half_life;

        let ahead = spacing * 11 + half_life;
        let next = calculate_asert(ref_target, spacing, ahead, 10, pow_limit, half_life);
        assert_eq!(next, ref_target * U256::from(2u64));

        let behind = spacing * 11 - half_life;
        let next = calculate_asert(ref_target, spacing, behind, 10, pow_limit, half_life);
        assert_eq!(next, ref_target / U256::from(2u64));
    }

    #[test]
    fn fractional_exponent_uses_cubic_approximation() {
        let pow_limit = U256::max_value();
        let ref_target = U256::from(1u64) << 200;
        // Half a half-life behind schedule; exact 2^0.5 * 65536 would be 92682.
        let next = calculate_asert(ref_target, 600, 600 + 86_400, 0, pow_limit, 172_800);
        let factor = 65_536u64
            + ((195_766_423_245_049u64 * 32_768
                + 971_821_376u64 * 32_768 * 32_768
                + 5_127u64 * 32_768 * 32_768 * 32_768
                + (1u64 << 47))
                >> 48);
        assert_eq!(factor, 92_674);
        assert_eq!(next, (ref_target * U256::from(factor)) >> 16);
    }

    #[test]
    fn far_behind_schedule_clamps_to_pow_limit() {
        let params = consensus_params(Network::Mainnet);
        let pow_limit = U256::from_little_endian(&params.pow_limit);
        let ref_target = compact_to_u256(0x1d00_ffff).expect("target");
        let next = calculate_asert(
            ref_target,
            params.pow_target_spacing,
            400 * params.asert_half_life,
            1,
            pow_limit,
            params.asert_half_life,
        );
        assert_eq!(next, pow_limit);
    }

    #[test]
    fn far_ahead_of_schedule_never_reaches_zero() {
        let pow_limit = U256::max_value();
        let next = calculate_asert(U256::from(1u64), 600, -1_000_000_000, 10, pow_limit, 60);
        assert_eq!(next, U256::from(1u64));
    }

    #[test]
    fn difficulty_of_pow_limit_is_positive() {
        let params = consensus_params(Network::Mainnet);
        let diff = difficulty(pow_limit_bits(&params), &params);
        assert!(diff > 0.0);
        assert_eq!(difficulty(0x0180_0000, &params), 0.0);
    }
}
