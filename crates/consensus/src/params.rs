//! Consensus parameter definitions.

use crate::constants::DEFAULT_SUSPICIOUS_REORG_DEPTH;
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Network::Mainnet),
            "test" | "testnet" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Fields of the genesis header that vary per network. The remaining fields
/// (previous hash, miner address, proof-of-work commitment) are null.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GenesisParams {
    pub version: i32,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub genesis: GenesisParams,
    pub pow_limit: Hash256,
    pub pow_target_spacing: i64,
    /// Seconds per proof-of-work epoch; each epoch keys its own hashing context.
    pub epoch_duration: u32,
    pub asert_half_life: i64,
    pub asert_anchor_height: i32,
    pub minimum_chain_work: Hash256,
    /// Height above which headers are rejected; zero disables the check.
    pub network_expiration_interval: i32,
    pub network_expiration_grace_period: i32,
    pub suspicious_reorg_depth: i32,
}

impl ConsensusParams {
    pub fn pow_no_retargeting(&self) -> bool {
        self.network == Network::Regtest
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a big-endian display hex string into a little-endian hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }

    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(&padded[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();

    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        genesis: GenesisParams {
            version: 1,
            time: 1_760_292_878,
            bits: 0x1e27_0fd8,
            nonce: 633_285,
        },
        pow_limit: hash256_from_hex(
            "000fffff00000000000000000000000000000000000000000000000000000000",
        )
        .expect("mainnet pow limit"),
        pow_target_spacing: 2 * 60,
        epoch_duration: 7 * 24 * 60 * 60,
        asert_half_life: 2 * 24 * 60 * 60,
        asert_anchor_height: 1,
        minimum_chain_work: [0u8; 32],
        network_expiration_interval: 0,
        network_expiration_grace_period: 0,
        suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        genesis: GenesisParams {
            version: 1,
            time: 1_760_549_555,
            bits: 0x1f7f_ffff,
            nonce: 253,
        },
        pow_limit: hash256_from_hex(
            "007fffff00000000000000000000000000000000000000000000000000000000",
        )
        .expect("testnet pow limit"),
        pow_target_spacing: 5,
        epoch_duration: 7 * 24 * 60 * 60,
        asert_half_life: 60,
        asert_anchor_height: 1,
        minimum_chain_work: [0u8; 32],
        network_expiration_interval: 0,
        network_expiration_grace_period: 0,
        suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        genesis: GenesisParams {
            version: 1,
            time: 1_296_688_602,
            bits: 0x207f_ffff,
            nonce: 2,
        },
        pow_limit: hash256_from_hex(
            "7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .expect("regtest pow limit"),
        pow_target_spacing: 2 * 60,
        epoch_duration: 365 * 24 * 60 * 60,
        asert_half_life: 2 * 24 * 60 * 60,
        asert_anchor_height: 1,
        minimum_chain_work: [0u8; 32],
        network_expiration_interval: 0,
        network_expiration_grace_period: 0,
        suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_reverses_bytes() {
        let hash = hash256_from_hex("0x01").expect("hex");
        assert_eq!(hash[0], 1);
        assert!(hash[1..].iter().all(|byte| *byte == 0));
        assert_eq!(
            hash256_to_hex(&hash),
            "0000000000000000000000000000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(matches!(hash256_from_hex(""), Err(HexError::InvalidLength)));
        assert!(matches!(
            hash256_from_hex(&"f".repeat(65)),
            Err(HexError::InvalidLength)
        ));
        assert!(matches!(hash256_from_hex("zz"), Err(HexError::InvalidHex)));
    }

    #[test]
    fn network_parse_accepts_aliases() {
        assert_eq!(Network::parse("mainnet"), Some(Network::Mainnet));
        assert_eq!(Network::parse(" TEST "), Some(Network::Testnet));
        assert_eq!(Network::parse("regtest"), Some(Network::Regtest));
        assert_eq!(Network::parse("signet"), None);
    }

    #[test]
    fn only_regtest_skips_retargeting() {
        assert!(consensus_params(Network::Regtest).pow_no_retargeting());
        assert!(!consensus_params(Network::Mainnet).pow_no_retargeting());
        assert!(!consensus_params(Network::Testnet).pow_no_retargeting());
    }
}
