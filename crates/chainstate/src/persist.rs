//! Block index records in a [`KeyValueStore`].

use headerd_consensus::constants::HEADER_SIZE;
use headerd_consensus::{hash256_to_hex, Hash256};
use headerd_primitives::{BlockHeader, DecodeError, Decoder};
use headerd_storage::{Column, KeyValueStore, WriteBatch};

use crate::index::{BlockIndexStore, STATUS_FAILED_MASK};
use crate::ChainStateError;

pub const FORMAT_VERSION: u32 = 1;

pub const META_FORMAT_VERSION: &[u8] = b"format_version";
pub const META_GENESIS: &[u8] = b"genesis";
pub const META_TIP: &[u8] = b"tip";
pub const META_BLOCK_COUNT: &[u8] = b"block_count";

const RECORD_LEN: usize = HEADER_SIZE + 4 + 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub header: BlockHeader,
    pub height: i32,
    pub status: u8,
}

impl HeaderRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.extend_from_slice(&self.header.consensus_encode());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.push(self.status);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != RECORD_LEN {
            return Err(DecodeError::InvalidData("header index record has wrong length"));
        }
        let header = BlockHeader::consensus_decode(&bytes[..HEADER_SIZE])?;
        let mut decoder = Decoder::new(&bytes[HEADER_SIZE..]);
        let height = decoder.read_i32_le()?;
        let status = decoder.read_u8()?;
        decoder.finish()?;
        Ok(Self {
            header,
            height,
            status,
        })
    }
}

pub fn index_batch(index: &BlockIndexStore, genesis: &Hash256) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch.reserve(index.block_count() + 4);
    for (_, node) in index.iter() {
        let record = HeaderRecord {
            header: node.header.clone(),
            height: node.height,
            status: node.status,
        };
        batch.put(Column::HeaderIndex, node.hash, record.encode());
    }
    batch.put(Column::Meta, META_FORMAT_VERSION, FORMAT_VERSION.to_le_bytes());
    batch.put(Column::Meta, META_GENESIS, *genesis);
    if let Some(tip) = index.tip() {
        batch.put(Column::Meta, META_TIP, index.get(tip).hash);
    }
    batch.put(
        Column::Meta,
        META_BLOCK_COUNT,
        (index.block_count() as u64).to_le_bytes(),
    );
    batch
}

pub fn save_index<S: KeyValueStore + ?Sized>(
    store: &S,
    index: &BlockIndexStore,
    genesis: &Hash256,
) -> Result<(), ChainStateError> {
    store.write_batch(&index_batch(index, genesis))?;
    Ok(())
}

fn read_meta<S: KeyValueStore + ?Sized, const N: usize>(
    store: &S,
    key: &'static [u8],
) -> Result<Option<[u8; N]>, ChainStateError> {
    match store.get(Column::Meta, key)? {
        Some(bytes) => bytes
            .as_slice()
            .try_into()
            .map(Some)
            .map_err(|_| ChainStateError::Corrupt("meta value has wrong length")),
        None => Ok(None),
    }
}

/// Rebuilds the block index from `store`, with the active chain ending at the
/// stored tip. `None` when the store has never been written.
pub fn load_index<S: KeyValueStore + ?Sized>(
    store: &S,
    genesis: &Hash256,
) -> Result<Option<BlockIndexStore>, ChainStateError> {
    let Some(version) = read_meta::<S, 4>(store, META_FORMAT_VERSION)? else {
        return Ok(None);
    };
    if u32::from_le_bytes(version) != FORMAT_VERSION {
        return Err(ChainStateError::Corrupt("unsupported block index format"));
    }
    let stored_genesis = read_meta::<S, 32>(store, META_GENESIS)?
        .ok_or(ChainStateError::Corrupt("block index without genesis"))?;
    if stored_genesis != *genesis {
        headerd_log::log_error!(
            "stored genesis {} does not match configured {}",
            hash256_to_hex(&stored_genesis),
            hash256_to_hex(genesis)
        );
        return Err(ChainStateError::GenesisMismatch);
    }

    let mut records = Vec::new();
    for (key, value) in store.scan_prefix(Column::HeaderIndex, &[])? {
        let record = HeaderRecord::decode(&value)?;
        if key.as_slice() != record.header.hash().as_slice() {
            return Err(ChainStateError::Corrupt("header index key does not match header"));
        }
        records.push(record);
    }
    if let Some(count) = read_meta::<S, 8>(store, META_BLOCK_COUNT)? {
        if u64::from_le_bytes(count) != records.len() as u64 {
            return Err(ChainStateError::Corrupt("header index record count mismatch"));
        }
    }
    // Parents first; ties by hash keep the arena order stable across loads.
    records.sort_by(|a, b| {
        a.height
            .cmp(&b.height)
            .then_with(|| a.header.hash().cmp(&b.header.hash()))
    });

    let mut index = BlockIndexStore::new();
    for record in &records {
        let id = index
            .insert(&record.header)
            .map_err(|_| ChainStateError::Corrupt("header index record without parent"))?;
        let node = index.get_mut(id);
        if node.height != record.height {
            return Err(ChainStateError::Corrupt("header index height mismatch"));
        }
        node.status = record.status & !STATUS_FAILED_MASK;
        index.mark_failed(id, record.status);
    }
    if !index.is_empty() && index.lookup(genesis).is_none() {
        return Err(ChainStateError::Corrupt("header index missing genesis"));
    }

    if let Some(tip) = read_meta::<S, 32>(store, META_TIP)? {
        let tip = index
            .lookup(&tip)
            .ok_or(ChainStateError::Corrupt("stored tip not in header index"))?;
        index.set_active_tip(tip);
    }
    Ok(Some(index))
}
