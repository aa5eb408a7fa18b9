mod common;

use std::sync::Arc;

use common::{
    child, drain, extend, harness, harness_for, submit_all, AcceptAllPow, FlakyChecks,
    EASY_BITS, POISON_NONCE,
};
use headerd_chainstate::validation::{
    REJECT_BAD_DIFFBITS, REJECT_BAD_PREVBLK, REJECT_DUPLICATE, REJECT_HIGH_HASH,
    REJECT_NETWORK_EXPIRED, REJECT_TIME_TOO_NEW,
};
use headerd_chainstate::{
    AcceptOutcome, ChainStateError, ChainstateConfig, ChainstateManager, Clock,
    ConsensusHeaderChecks, EpochPowCheck, ManualClock,
};
use headerd_consensus::constants::MAX_FUTURE_BLOCK_TIME;
use headerd_consensus::{consensus_params, Network};
use headerd_pow::difficulty::pow_limit_bits;
use headerd_pow::validation::grind_nonce;
use headerd_pow::EpochCache;
use headerd_primitives::genesis_header;
use primitive_types::U256;

#[test]
fn genesis_bootstrap_with_full_validation() {
    let params = consensus_params(Network::Regtest);
    let genesis = genesis_header(&params.genesis);
    let cache = Arc::new(EpochCache::new(1));
    let clock = Arc::new(ManualClock::new(i64::from(genesis.time) + 120));
    let manager = ChainstateManager::with_strategies(
        params.clone(),
        ChainstateConfig::for_params(&params),
        Arc::new(EpochPowCheck::new(cache.clone())),
        Arc::new(ConsensusHeaderChecks),
        clock,
    );
    let root = manager.initialize(&genesis).expect("initialize");
    assert_eq!(root.height, 0);
    assert_eq!(root.bits, pow_limit_bits(&params));

    let bits = manager
        .next_work_required(&genesis.hash())
        .expect("genesis indexed");
    let unmined = child(&genesis, bits, 0);
    let err = manager
        .process_new_block_header(&unmined, 1)
        .expect_err("null digest");
    assert_eq!(err.reason(), Some(REJECT_HIGH_HASH));
    assert!(manager.lookup_block_index(&unmined.hash()).is_none());

    let mined = grind_nonce(&unmined, &params, &cache, 10_000)
        .expect("grind")
        .expect("nonce found");
    assert!(manager.process_new_block_header(&mined, 1).expect("accept"));
    assert_eq!(manager.chain_height(), 1);
    assert_eq!(manager.tip().expect("tip").hash, mined.hash());
}

#[test]
fn consensus_checks_reject_bad_bits_and_future_time() {
    let params = consensus_params(Network::Regtest);
    let genesis = genesis_header(&params.genesis);
    let manager = ChainstateManager::with_strategies(
        params.clone(),
        ChainstateConfig::default(),
        Arc::new(AcceptAllPow),
        Arc::new(ConsensusHeaderChecks),
        Arc::new(ManualClock::new(i64::from(genesis.time))),
    );
    manager.initialize(&genesis).expect("initialize");

    let wrong_bits = child(&genesis, 0x1d00_ffff, 1);
    let err = manager
        .accept_block_header(&wrong_bits, 1)
        .expect_err("bits");
    assert_eq!(err.reason(), Some(REJECT_BAD_DIFFBITS));

    let mut future = child(&genesis, EASY_BITS, 2);
    future.time = genesis.time + MAX_FUTURE_BLOCK_TIME as u32 + 1;
    let err = manager.accept_block_header(&future, 1).expect_err("time");
    assert_eq!(err.reason(), Some(REJECT_TIME_TOO_NEW));

    // Both are remembered as failed.
    assert_eq!(manager.failed_count(), 2);
    let err = manager.accept_block_header(&future, 1).expect_err("again");
    assert_eq!(err.reason(), Some(REJECT_DUPLICATE));
}

#[test]
fn network_expiration_rejects_and_notifies() {
    let mut params = consensus_params(Network::Regtest);
    params.network_expiration_interval = 2;
    params.network_expiration_grace_period = 1;
    let genesis = genesis_header(&params.genesis);
    let manager = ChainstateManager::with_strategies(
        params,
        ChainstateConfig::default(),
        Arc::new(AcceptAllPow),
        Arc::new(ConsensusHeaderChecks),
        Arc::new(ManualClock::new(i64::from(genesis.time))),
    );
    manager.initialize(&genesis).expect("initialize");
    let events = manager.subscribe();

    let chain = extend(&genesis, 3, 1);
    submit_all(&manager, &chain[..2]);
    let err = manager
        .process_new_block_header(&chain[2], 1)
        .expect_err("expired");
    assert_eq!(err.reason(), Some(REJECT_NETWORK_EXPIRED));
    assert_eq!(drain(&events).expired, vec![(3, 2)]);
    assert_eq!(manager.chain_height(), 2);
}

#[test]
fn resubmitting_a_valid_header_is_idempotent() {
    let h = harness();
    let header = child(&h.genesis, EASY_BITS, 1);
    let first = h.manager.accept_block_header(&header, 1).expect("first");
    let candidates = h.manager.candidate_count();
    let failed = h.manager.failed_count();

    let second = h.manager.accept_block_header(&header, 2).expect("second");
    assert_eq!(first, second);
    assert!(matches!(second, AcceptOutcome::Accepted(_)));
    assert_eq!(h.manager.candidate_count(), candidates);
    assert_eq!(h.manager.failed_count(), failed);
    assert_eq!(h.manager.block_count(), 2);
}

#[test]
fn chain_work_strictly_increases_with_height() {
    let h = harness();
    let chain = extend(&h.genesis, 50, 1);
    submit_all(&h.manager, &chain);
    assert_eq!(h.manager.chain_height(), 50);

    let mut previous = U256::zero();
    for height in 0..=50 {
        let entry = h.manager.block_at_height(height).expect("block");
        assert_eq!(entry.height, height);
        assert!(entry.chainwork > previous);
        previous = entry.chainwork;
    }
    assert_eq!(h.manager.best_header().expect("best").hash, chain[49].hash());
}

#[test]
fn failed_header_poisons_descendants() {
    let h = harness();
    let bad = child(&h.genesis, EASY_BITS, POISON_NONCE);
    let err = h.manager.accept_block_header(&bad, 1).expect_err("poisoned");
    assert_eq!(err.reason(), Some(REJECT_HIGH_HASH));
    assert!(h.manager.lookup_block_index(&bad.hash()).expect("indexed").is_failed());

    let grandchild = child(&bad, EASY_BITS, 1);
    let err = h
        .manager
        .accept_block_header(&grandchild, 1)
        .expect_err("bad parent");
    assert_eq!(err.reason(), Some(REJECT_BAD_PREVBLK));

    let err = h.manager.accept_block_header(&bad, 1).expect_err("dup");
    assert_eq!(err.reason(), Some(REJECT_DUPLICATE));
    assert_eq!(h.manager.failed_count(), 2);
    assert_eq!(h.manager.chain_height(), 0);
}

#[test]
fn ibd_latch_and_anti_dos_threshold() {
    let h = harness();
    assert!(h.manager.is_initial_block_download());
    assert_eq!(h.manager.anti_dos_work_threshold(), U256::zero());

    let chain = extend(&h.genesis, 200, 1);
    h.clock.set(i64::from(chain[199].time));
    submit_all(&h.manager, &chain);
    assert!(!h.manager.is_initial_block_download());

    let tip = h.manager.tip().expect("tip");
    // Regtest headers each carry a proof of 2.
    assert_eq!(
        h.manager.anti_dos_work_threshold(),
        tip.chainwork - U256::from(2u64 * 144)
    );

    // A stale tip later on does not re-enter initial download.
    h.clock.advance(30 * 24 * 60 * 60);
    assert!(!h.manager.is_initial_block_download());
}

#[test]
fn stale_tip_keeps_initial_download() {
    let h = harness();
    let chain = extend(&h.genesis, 3, 1);
    h.clock.set(i64::from(chain[2].time) + 13 * 60 * 60);
    submit_all(&h.manager, &chain);
    assert!(h.manager.is_initial_block_download());
}

#[test]
fn batch_prefilters() {
    let h = harness();
    let chain = extend(&h.genesis, 4, 1);
    assert!(h.manager.check_headers_are_continuous(&chain));
    assert!(!h.manager.check_headers_are_continuous(&[chain[0].clone(), chain[2].clone()]));
    h.manager.check_headers_pow(&chain).expect("stub pow");
    assert_eq!(
        h.manager.calculate_headers_work(&chain),
        U256::from(8u64)
    );

    let params = consensus_params(Network::Regtest);
    let strict = ChainstateManager::new(params);
    let err = strict.check_headers_pow(&chain).expect_err("null digests");
    assert_eq!(err.reason(), Some(REJECT_HIGH_HASH));
}

#[test]
fn locator_and_lookups() {
    let h = harness();
    let chain = extend(&h.genesis, 30, 1);
    submit_all(&h.manager, &chain);

    let locator = h.manager.locator(None).expect("locator");
    let hashes = &locator.have;
    assert_eq!(hashes.first(), Some(&chain[29].hash()));
    assert_eq!(hashes.last(), Some(&h.genesis.hash()));
    // Heights 30 down to 20, then 19, 17, 13, 5 and genesis.
    assert_eq!(hashes.len(), 16);

    let from_mid = h.manager.locator(Some(&chain[4].hash())).expect("mid");
    assert_eq!(from_mid.len(), 6);
    assert!(h.manager.locator(Some(&[1u8; 32])).is_none());
    assert!(h.manager.lookup_block_index(&[1u8; 32]).is_none());
    assert!(h.manager.block_at_height(31).is_none());
    assert!(h.manager.block_at_height(-1).is_none());
}

#[test]
fn peer_time_samples_shift_adjusted_time() {
    let params = consensus_params(Network::Regtest);
    let h = harness_for(params, ChainstateConfig::default());
    let now = h.clock.now();
    for peer in 1..=4 {
        h.manager.add_time_sample(peer, now + 100);
    }
    assert_eq!(h.manager.time_offset(), 100);
    assert_eq!(h.manager.adjusted_time(), now + 100);
}

#[test]
fn header_retried_after_system_error_still_activates() {
    let params = consensus_params(Network::Regtest);
    let genesis = genesis_header(&params.genesis);
    let manager = ChainstateManager::with_strategies(
        params,
        ChainstateConfig::default(),
        Arc::new(AcceptAllPow),
        Arc::new(FlakyChecks::new(1)),
        Arc::new(ManualClock::new(i64::from(genesis.time))),
    );
    manager.initialize(&genesis).expect("initialize");
    let parent = child(&genesis, EASY_BITS, 1);
    let kid = child(&parent, EASY_BITS, 2);

    let err = manager
        .process_new_block_header(&parent, 1)
        .expect_err("system error");
    assert!(matches!(err, ChainStateError::Pow(_)));
    assert!(!err.is_invalid());

    let err = manager
        .process_new_block_header(&kid, 1)
        .expect_err("parent not validated");
    assert!(matches!(err, ChainStateError::UnvalidatedParent));
    assert!(manager.lookup_block_index(&kid.hash()).is_none());

    assert!(manager.process_new_block_header(&parent, 1).expect("retry"));
    assert_eq!(manager.chain_height(), 1);
    assert_eq!(manager.tip().expect("tip").hash, parent.hash());

    assert!(manager.process_new_block_header(&kid, 1).expect("child"));
    assert_eq!(manager.chain_height(), 2);
}

#[test]
fn invalid_child_leaves_parent_a_leaf() {
    let h = harness();
    let tip = child(&h.genesis, EASY_BITS, 1);
    submit_all(&h.manager, &[tip.clone()]);
    let bad = child(&tip, EASY_BITS, POISON_NONCE);
    h.manager
        .process_new_block_header(&bad, 1)
        .expect_err("poisoned");

    // The tip was pruned from the candidates on activation; it still counts
    // as a leaf.
    assert_eq!(h.manager.candidate_count(), 0);
    assert!(h.manager.try_add_block_index_candidate(&tip.hash()));
    assert!(!h.manager.try_add_block_index_candidate(&h.genesis.hash()));
}
