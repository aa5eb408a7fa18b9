mod common;

use common::{child, extend, harness, harness_for, submit_all, EASY_BITS, MEDIUM_BITS};
use headerd_chainstate::persist::{META_FORMAT_VERSION, META_TIP};
use headerd_chainstate::{ChainStateError, ChainstateConfig};
use headerd_consensus::{consensus_params, Network};
use headerd_storage::memory::MemoryStore;
use headerd_storage::{Column, KeyValueStore};

#[test]
fn save_and_load_round_trip() {
    let h = harness();
    let main = extend(&h.genesis, 6, 1);
    submit_all(&h.manager, &main);
    let side = extend(&main[1], 2, 2);
    submit_all(&h.manager, &side);
    assert!(h.manager.invalidate_block(&main[5].hash()).expect("invalidate"));

    let store = MemoryStore::new();
    h.manager.save(&store).expect("save");
    assert!(store.get(Column::Meta, META_FORMAT_VERSION).expect("get").is_some());
    assert_eq!(
        store.get(Column::Meta, META_TIP).expect("get"),
        Some(main[4].hash().to_vec())
    );

    let restored = harness();
    assert!(restored.manager.load(&store).expect("load"));
    assert_eq!(restored.manager.block_count(), h.manager.block_count());
    assert_eq!(restored.manager.tip(), h.manager.tip());
    assert_eq!(restored.manager.failed_count(), 1);
    for height in 0..=restored.manager.chain_height() {
        assert_eq!(
            restored.manager.block_at_height(height),
            h.manager.block_at_height(height)
        );
    }
    assert!(restored
        .manager
        .lookup_block_index(&main[5].hash())
        .expect("entry")
        .is_failed());

    // The side branch can still take over.
    let heavy = child(&side[1], MEDIUM_BITS, 3);
    assert!(restored.manager.process_new_block_header(&heavy, 1).expect("heavy"));
    assert_eq!(restored.manager.tip().expect("tip").hash, heavy.hash());
    assert_eq!(restored.manager.block_at_height(3).expect("h3").hash, side[0].hash());
}

#[test]
fn empty_store_is_not_an_error() {
    let h = harness();
    let store = MemoryStore::new();
    assert!(!h.manager.load(&store).expect("load"));
    assert_eq!(h.manager.chain_height(), 0);
}

#[test]
fn other_network_index_is_refused() {
    let h = harness();
    submit_all(&h.manager, &extend(&h.genesis, 2, 1));
    let store = MemoryStore::new();
    h.manager.save(&store).expect("save");

    let testnet = harness_for(consensus_params(Network::Testnet), ChainstateConfig::default());
    assert!(matches!(
        testnet.manager.load(&store),
        Err(ChainStateError::GenesisMismatch)
    ));
    assert_eq!(testnet.manager.chain_height(), 0);
}

#[test]
fn loaded_chain_keeps_extending() {
    let h = harness();
    let chain = extend(&h.genesis, 3, 1);
    submit_all(&h.manager, &chain);
    let store = MemoryStore::new();
    h.manager.save(&store).expect("save");

    let restored = harness();
    restored.manager.load(&store).expect("load");
    let next = child(&chain[2], EASY_BITS, 99);
    assert!(restored.manager.process_new_block_header(&next, 1).expect("next"));
    assert_eq!(restored.manager.chain_height(), 4);
    assert_eq!(
        restored.manager.best_header().expect("best").hash,
        next.hash()
    );
}

#[cfg(feature = "fjall")]
#[test]
fn fjall_round_trip_survives_reopen() {
    use headerd_storage::fjall::{FjallOptions, FjallStore};

    let dir = tempfile::tempdir().expect("tempdir");
    let h = harness();
    let chain = extend(&h.genesis, 5, 1);
    submit_all(&h.manager, &chain);
    {
        let options = FjallOptions {
            sync_batches: true,
            ..FjallOptions::default()
        };
        let store = FjallStore::open_with_options(dir.path(), options).expect("open");
        h.manager.save(&store).expect("save");
    }

    let store = FjallStore::open(dir.path()).expect("reopen");
    let restored = harness();
    assert!(restored.manager.load(&store).expect("load"));
    assert_eq!(restored.manager.tip(), h.manager.tip());
}
