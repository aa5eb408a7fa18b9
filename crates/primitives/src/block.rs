//! Block header type.

use headerd_consensus::constants::{HEADER_SIZE, MINER_ADDRESS_SIZE};
use headerd_consensus::{GenesisParams, Hash256};

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::sha256d;

pub type MinerAddress = [u8; MINER_ADDRESS_SIZE];

pub const CURRENT_VERSION: i32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub miner_address: MinerAddress,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Proof-of-work digest committed to by the header.
    pub hash_pow: Hash256,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        self.encode_with_pow(&self.hash_pow)
    }

    /// Serialization with the proof-of-work field zeroed, the preimage for
    /// both the epoch hash and the commitment.
    pub fn consensus_encode_for_pow(&self) -> Vec<u8> {
        self.encode_with_pow(&[0u8; 32])
    }

    fn encode_with_pow(&self, hash_pow: &Hash256) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_bytes(&self.miner_address);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.write_hash_le(hash_pow);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn is_genesis(&self) -> bool {
        headerd_consensus::is_null_hash(&self.prev_block)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != HEADER_SIZE {
            return Err(DecodeError::InvalidData("block header must be 100 bytes"));
        }
        let mut decoder = Decoder::new(bytes);
        let header = Self::consensus_decode_from(&mut decoder)?;
        decoder.finish()?;
        Ok(header)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            miner_address: decoder.read_fixed::<MINER_ADDRESS_SIZE>()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
            hash_pow: decoder.read_hash_le()?,
        })
    }
}

pub fn genesis_header(genesis: &GenesisParams) -> BlockHeader {
    BlockHeader {
        version: genesis.version,
        prev_block: [0u8; 32],
        miner_address: [0u8; MINER_ADDRESS_SIZE],
        time: genesis.time,
        bits: genesis.bits,
        nonce: genesis.nonce,
        hash_pow: [0u8; 32],
    }
}
