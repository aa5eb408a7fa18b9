//! Headers that arrived before their parent.

use std::collections::HashMap;

use headerd_consensus::constants::{
    MAX_ORPHAN_HEADERS, MAX_ORPHAN_HEADERS_PER_PEER, ORPHAN_HEADER_EXPIRE_TIME,
};
use headerd_consensus::{hash256_to_hex, Hash256};
use headerd_primitives::BlockHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrphanLimits {
    pub max_total: usize,
    pub max_per_peer: usize,
    /// Orphans older than this many seconds are evicted.
    pub expire_secs: i64,
}

impl Default for OrphanLimits {
    fn default() -> Self {
        Self {
            max_total: MAX_ORPHAN_HEADERS,
            max_per_peer: MAX_ORPHAN_HEADERS_PER_PEER,
            expire_secs: ORPHAN_HEADER_EXPIRE_TIME,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrphanHeader {
    pub header: BlockHeader,
    pub received: i64,
    pub peer_id: i64,
}

#[derive(Default)]
pub struct OrphanPool {
    limits: OrphanLimits,
    orphans: HashMap<Hash256, OrphanHeader>,
    per_peer: HashMap<i64, usize>,
}

impl OrphanPool {
    pub fn new(limits: OrphanLimits) -> Self {
        Self {
            limits,
            orphans: HashMap::new(),
            per_peer: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.orphans.contains_key(hash)
    }

    pub fn peer_count(&self, peer_id: i64) -> usize {
        self.per_peer.get(&peer_id).copied().unwrap_or(0)
    }

    /// Stores `header` unless its peer is at the per-peer cap. A full pool
    /// makes room by eviction first. Returns true when the header is held,
    /// including when it already was.
    pub fn try_add(&mut self, header: &BlockHeader, peer_id: i64, now: i64) -> bool {
        let hash = header.hash();
        if self.orphans.contains_key(&hash) {
            return true;
        }
        if self.peer_count(peer_id) >= self.limits.max_per_peer {
            headerd_log::log_debug!(
                "peer {} at orphan header limit ({}), dropping {}",
                peer_id,
                self.limits.max_per_peer,
                hash256_to_hex(&hash)
            );
            return false;
        }
        if self.orphans.len() >= self.limits.max_total && self.evict(now) == 0 {
            return false;
        }

        self.orphans.insert(
            hash,
            OrphanHeader {
                header: header.clone(),
                received: now,
                peer_id,
            },
        );
        *self.per_peer.entry(peer_id).or_insert(0) += 1;
        true
    }

    /// Removes expired orphans; when none expired and the pool is full, drops
    /// the oldest one instead.
    pub fn evict(&mut self, now: i64) -> usize {
        let expired: Vec<Hash256> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| now - orphan.received > self.limits.expire_secs)
            .map(|(hash, _)| *hash)
            .collect();
        let mut evicted = 0;
        for hash in expired {
            if self.remove(&hash).is_some() {
                evicted += 1;
            }
        }

        if evicted == 0 && self.orphans.len() >= self.limits.max_total {
            let oldest = self
                .orphans
                .iter()
                .min_by(|(a_hash, a), (b_hash, b)| {
                    a.received.cmp(&b.received).then_with(|| a_hash.cmp(b_hash))
                })
                .map(|(hash, _)| *hash);
            if let Some(hash) = oldest {
                self.remove(&hash);
                evicted = 1;
            }
        }

        if evicted > 0 {
            headerd_log::log_debug!(
                "evicted {} orphan headers ({} left)",
                evicted,
                self.orphans.len()
            );
        }
        evicted
    }

    pub fn take_children(&mut self, parent: &Hash256) -> Vec<OrphanHeader> {
        let mut hashes: Vec<Hash256> = self
            .orphans
            .iter()
            .filter(|(_, orphan)| orphan.header.prev_block == *parent)
            .map(|(hash, _)| *hash)
            .collect();
        hashes.sort_unstable();
        hashes
            .into_iter()
            .filter_map(|hash| self.remove(&hash))
            .collect()
    }

    pub fn clear(&mut self) {
        self.orphans.clear();
        self.per_peer.clear();
    }

    fn remove(&mut self, hash: &Hash256) -> Option<OrphanHeader> {
        let orphan = self.orphans.remove(hash)?;
        if let Some(count) = self.per_peer.get_mut(&orphan.peer_id) {
            *count -= 1;
            if *count == 0 {
                self.per_peer.remove(&orphan.peer_id);
            }
        }
        Some(orphan)
    }
}
