#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use headerd_chainstate::index::BlockIndexStore;
use headerd_chainstate::validation::REJECT_HIGH_HASH;
use headerd_chainstate::{
    ChainEvent, ChainStateError, ChainstateConfig, ChainstateManager, HeaderChecks,
    HeaderPowCheck, ManualClock, NodeId, Rejection,
};
use headerd_consensus::{consensus_params, ConsensusParams, Network};
use headerd_pow::{EpochError, PowError};
use headerd_primitives::{genesis_header, BlockHeader};

/// Regtest genesis bits; a block proof of 2.
pub const EASY_BITS: u32 = 0x207f_ffff;
/// Block proof of 512.
pub const MEDIUM_BITS: u32 = 0x1f7f_ffff;
/// Block proof of 1024.
pub const HEAVY_BITS: u32 = 0x1f3f_ffff;

/// Headers with this nonce fail structural validation.
pub const POISON_NONCE: u32 = 0xdead_beef;

pub struct AcceptAllPow;

impl HeaderPowCheck for AcceptAllPow {
    fn check_commitment(
        &self,
        _header: &BlockHeader,
        _params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        Ok(())
    }

    fn check_full(
        &self,
        _header: &BlockHeader,
        _params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        Ok(())
    }
}

/// Accepts everything except headers carrying [`POISON_NONCE`].
pub struct PermissiveChecks;

impl HeaderChecks for PermissiveChecks {
    fn check_structural(
        &self,
        header: &BlockHeader,
        _params: &ConsensusParams,
        _pow: &dyn HeaderPowCheck,
    ) -> Result<(), ChainStateError> {
        if header.nonce == POISON_NONCE {
            return Err(ChainStateError::Invalid(Rejection::new(
                REJECT_HIGH_HASH,
                "poisoned nonce",
            )));
        }
        Ok(())
    }

    fn check_contextual(
        &self,
        _header: &BlockHeader,
        _index: &BlockIndexStore,
        _parent: NodeId,
        _adjusted_time: i64,
        _params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        Ok(())
    }
}

/// [`PermissiveChecks`] that first fails `failures` times with a system error.
pub struct FlakyChecks {
    failures: AtomicU32,
}

impl FlakyChecks {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
        }
    }
}

impl HeaderChecks for FlakyChecks {
    fn check_structural(
        &self,
        header: &BlockHeader,
        params: &ConsensusParams,
        pow: &dyn HeaderPowCheck,
    ) -> Result<(), ChainStateError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(ChainStateError::Pow(PowError::Epoch(EpochError::ZeroDuration)));
        }
        PermissiveChecks.check_structural(header, params, pow)
    }

    fn check_contextual(
        &self,
        header: &BlockHeader,
        index: &BlockIndexStore,
        parent: NodeId,
        adjusted_time: i64,
        params: &ConsensusParams,
    ) -> Result<(), ChainStateError> {
        PermissiveChecks.check_contextual(header, index, parent, adjusted_time, params)
    }
}

pub struct Harness {
    pub manager: ChainstateManager,
    pub clock: Arc<ManualClock>,
    pub genesis: BlockHeader,
}

pub fn harness() -> Harness {
    harness_with(ChainstateConfig::default())
}

pub fn harness_with(config: ChainstateConfig) -> Harness {
    harness_for(consensus_params(Network::Regtest), config)
}

pub fn harness_for(params: ConsensusParams, config: ChainstateConfig) -> Harness {
    let genesis = genesis_header(&params.genesis);
    let clock = Arc::new(ManualClock::new(i64::from(genesis.time)));
    let manager = ChainstateManager::with_strategies(
        params,
        config,
        Arc::new(AcceptAllPow),
        Arc::new(PermissiveChecks),
        clock.clone(),
    );
    manager.initialize(&genesis).expect("initialize");
    Harness {
        manager,
        clock,
        genesis,
    }
}

pub fn child(prev: &BlockHeader, bits: u32, nonce: u32) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: prev.hash(),
        time: prev.time + 120,
        bits,
        nonce,
        ..BlockHeader::default()
    }
}

/// `len` easy headers on top of `base`, distinguished by `tag`.
pub fn extend(base: &BlockHeader, len: usize, tag: u32) -> Vec<BlockHeader> {
    let mut out: Vec<BlockHeader> = Vec::with_capacity(len);
    for step in 0..len {
        let prev = out.last().unwrap_or(base);
        out.push(child(prev, EASY_BITS, tag * 10_000 + step as u32));
    }
    out
}

pub fn submit_all(manager: &ChainstateManager, headers: &[BlockHeader]) {
    for header in headers {
        assert!(
            manager.process_new_block_header(header, 1).expect("process"),
            "header was not accepted"
        );
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub connected: usize,
    pub disconnected: usize,
    pub tips: usize,
    pub suspicious: Vec<(i32, i32)>,
    pub expired: Vec<(i32, i32)>,
}

pub fn drain(events: &Receiver<ChainEvent>) -> EventCounts {
    let mut counts = EventCounts::default();
    for event in events.try_iter() {
        match event {
            ChainEvent::BlockConnected { .. } => counts.connected += 1,
            ChainEvent::BlockDisconnected { .. } => counts.disconnected += 1,
            ChainEvent::ChainTip { .. } => counts.tips += 1,
            ChainEvent::SuspiciousReorg { depth, max_allowed } => {
                counts.suspicious.push((depth, max_allowed))
            }
            ChainEvent::NetworkExpired {
                current_height,
                expiration_height,
            } => counts.expired.push((current_height, expiration_height)),
        }
    }
    counts
}
