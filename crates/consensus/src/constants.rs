//! Consensus-wide constants shared across validation.

/// The minimum allowed block version (network rule).
pub const MIN_BLOCK_VERSION: i32 = 1;
/// Serialized size of a block header, in bytes.
pub const HEADER_SIZE: usize = 100;
/// Size of the miner address embedded in each header.
pub const MINER_ADDRESS_SIZE: usize = 20;
/// Maximum seconds a header timestamp may run ahead of network-adjusted time.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// Number of blocks used for the median-time-past rule.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Blocks of tip work subtracted when computing the anti-DoS work threshold.
pub const ANTI_DOS_WORK_BUFFER_BLOCKS: u64 = 144;
/// A tip older than this (seconds) keeps the node in initial block download.
pub const MAX_TIP_AGE: i64 = 12 * 60 * 60;

/// Orphan headers kept across all peers.
pub const MAX_ORPHAN_HEADERS: usize = 1000;
/// Orphan headers kept per peer.
pub const MAX_ORPHAN_HEADERS_PER_PEER: usize = 50;
/// Orphan headers older than this (seconds) are evicted.
pub const ORPHAN_HEADER_EXPIRE_TIME: i64 = 600;

/// Reorgs deeper than this are reported as suspicious.
pub const DEFAULT_SUSPICIOUS_REORG_DEPTH: i32 = 100;

/// Peer id used for headers that originate locally.
pub const LOCAL_PEER_ID: i64 = -1;

/// Peer time samples retained for network-adjusted time.
pub const MAX_TIME_SAMPLES: usize = 200;
/// Network time offsets beyond this (seconds) are ignored.
pub const DEFAULT_MAX_TIME_ADJUSTMENT: i64 = 70 * 60;
