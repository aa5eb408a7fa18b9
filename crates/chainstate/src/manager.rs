//! Header acceptance and best-chain activation over one locked state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Receiver;
use headerd_consensus::constants::{
    DEFAULT_MAX_TIME_ADJUSTMENT, DEFAULT_SUSPICIOUS_REORG_DEPTH, MAX_TIP_AGE,
};
use headerd_consensus::{hash256_to_hex, is_null_hash, ConsensusParams, Hash256};
use headerd_primitives::{genesis_header, BlockHeader, BlockLocator};
use headerd_storage::KeyValueStore;
use primitive_types::U256;

use crate::index::{
    BlockIndexEntry, BlockIndexStore, HeaderNode, NodeId, STATUS_FAILED_CHILD,
    STATUS_FAILED_VALID, STATUS_VALID_TREE,
};
use crate::notify::{ChainEvent, ChainNotifications};
use crate::orphans::{OrphanLimits, OrphanPool};
use crate::persist;
use crate::selector::ChainSelector;
use crate::timedata::{Clock, SystemClock, TimeData};
use crate::validation::{
    self, reject, ConsensusHeaderChecks, EpochPowCheck, HeaderChecks, HeaderPowCheck,
    REJECT_BAD_GENESIS, REJECT_BAD_PREVBLK, REJECT_DUPLICATE, REJECT_NETWORK_EXPIRED,
};
use crate::ChainStateError;

#[derive(Clone, Debug)]
pub struct ChainstateConfig {
    /// Reorgs at least this deep are reported; zero turns the report off.
    pub suspicious_reorg_depth: i32,
    pub orphan_limits: OrphanLimits,
    pub max_time_adjustment: i64,
}

impl Default for ChainstateConfig {
    fn default() -> Self {
        Self {
            suspicious_reorg_depth: DEFAULT_SUSPICIOUS_REORG_DEPTH,
            orphan_limits: OrphanLimits::default(),
            max_time_adjustment: DEFAULT_MAX_TIME_ADJUSTMENT,
        }
    }
}

impl ChainstateConfig {
    pub fn for_params(params: &ConsensusParams) -> Self {
        Self {
            suspicious_reorg_depth: params.suspicious_reorg_depth,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted(BlockIndexEntry),
    Orphaned,
    OrphanDropped,
}

impl AcceptOutcome {
    pub fn entry(&self) -> Option<&BlockIndexEntry> {
        match self {
            AcceptOutcome::Accepted(entry) => Some(entry),
            _ => None,
        }
    }
}

struct State {
    index: BlockIndexStore,
    selector: ChainSelector,
    orphans: OrphanPool,
    failed: HashSet<NodeId>,
    time_data: TimeData,
    pending: Vec<ChainEvent>,
}

pub struct ChainstateManager {
    params: ConsensusParams,
    config: ChainstateConfig,
    genesis_hash: Hash256,
    pow: Arc<dyn HeaderPowCheck>,
    checks: Arc<dyn HeaderChecks>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    in_initial_download: AtomicBool,
    notifications: ChainNotifications,
}

impl ChainstateManager {
    pub fn new(params: ConsensusParams) -> Self {
        let config = ChainstateConfig::for_params(&params);
        Self::with_strategies(
            params,
            config,
            Arc::new(EpochPowCheck::default()),
            Arc::new(ConsensusHeaderChecks),
            Arc::new(SystemClock),
        )
    }

    pub fn with_strategies(
        params: ConsensusParams,
        config: ChainstateConfig,
        pow: Arc<dyn HeaderPowCheck>,
        checks: Arc<dyn HeaderChecks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let genesis_hash = genesis_header(&params.genesis).hash();
        let state = State {
            index: BlockIndexStore::new(),
            selector: ChainSelector::new(),
            orphans: OrphanPool::new(config.orphan_limits),
            failed: HashSet::new(),
            time_data: TimeData::new(config.max_time_adjustment),
            pending: Vec::new(),
        };
        Self {
            params,
            config,
            genesis_hash,
            pow,
            checks,
            clock,
            state: Mutex::new(state),
            in_initial_download: AtomicBool::new(true),
            notifications: ChainNotifications::new(),
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn config(&self) -> &ChainstateConfig {
        &self.config
    }

    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_hash
    }

    pub fn notifications(&self) -> &ChainNotifications {
        &self.notifications
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        self.notifications.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ChainStateError> {
        self.state.lock().map_err(|_| ChainStateError::Poisoned)
    }

    fn with_state<T>(
        &self,
        op: impl FnOnce(&mut State) -> Result<T, ChainStateError>,
    ) -> Result<T, ChainStateError> {
        let (result, events) = {
            let mut state = self.lock()?;
            let result = op(&mut state);
            (result, std::mem::take(&mut state.pending))
        };
        self.notifications.dispatch(events);
        result
    }

    /// Read-only access; a poisoned lock reads as `None`.
    fn view<T>(&self, op: impl FnOnce(&State) -> T) -> Option<T> {
        match self.state.lock() {
            Ok(state) => Some(op(&state)),
            Err(_) => {
                headerd_log::log_warn!("chainstate lock poisoned");
                None
            }
        }
    }

    pub fn initialize(&self, genesis: &BlockHeader) -> Result<BlockIndexEntry, ChainStateError> {
        self.with_state(|state| self.initialize_locked(state, genesis))
    }

    fn initialize_locked(
        &self,
        state: &mut State,
        genesis: &BlockHeader,
    ) -> Result<BlockIndexEntry, ChainStateError> {
        let hash = genesis.hash();
        if hash != self.genesis_hash || !is_null_hash(&genesis.prev_block) {
            return Err(ChainStateError::GenesisMismatch);
        }
        if let Some(existing) = state.index.node(&hash) {
            return Ok(BlockIndexEntry::from(existing));
        }

        let id = state.index.insert(genesis)?;
        state.index.get_mut(id).raise_validity(STATUS_VALID_TREE);
        state.index.extend_active_chain(id)?;
        state.selector.try_add(&state.index, id);
        state.selector.update_best_header(&state.index, id);
        state.pending.push(ChainEvent::BlockConnected {
            hash,
            height: 0,
            header: genesis.clone(),
        });
        state.pending.push(ChainEvent::ChainTip { hash, height: 0 });
        headerd_log::log_info!("initialized chain at genesis {}", hash256_to_hex(&hash));
        Ok(BlockIndexEntry::from(state.index.get(id)))
    }

    pub fn accept_block_header(
        &self,
        header: &BlockHeader,
        peer_id: i64,
    ) -> Result<AcceptOutcome, ChainStateError> {
        self.with_state(|state| self.accept_locked(state, header, peer_id))
    }

    pub fn process_new_block_header(
        &self,
        header: &BlockHeader,
        peer_id: i64,
    ) -> Result<bool, ChainStateError> {
        self.with_state(|state| {
            match self.accept_locked(state, header, peer_id)? {
                AcceptOutcome::Accepted(_) => {
                    self.activate_locked(state, None)?;
                    Ok(true)
                }
                AcceptOutcome::Orphaned | AcceptOutcome::OrphanDropped => Ok(false),
            }
        })
    }

    fn accept_locked(
        &self,
        state: &mut State,
        header: &BlockHeader,
        peer_id: i64,
    ) -> Result<AcceptOutcome, ChainStateError> {
        let outcome = self.accept_one(state, header, peer_id)?;
        if let AcceptOutcome::Accepted(entry) = &outcome {
            self.resolve_orphans(state, entry.hash);
        }
        Ok(outcome)
    }

    fn accept_one(
        &self,
        state: &mut State,
        header: &BlockHeader,
        peer_id: i64,
    ) -> Result<AcceptOutcome, ChainStateError> {
        let hash = header.hash();
        if let Some(id) = state.index.lookup(&hash) {
            let node = state.index.get(id);
            if node.is_failed() {
                return Err(reject(
                    REJECT_DUPLICATE,
                    format!("header {} already marked invalid", hash256_to_hex(&hash)),
                ));
            }
            if node.is_valid(STATUS_VALID_TREE) {
                return Ok(AcceptOutcome::Accepted(BlockIndexEntry::from(node)));
            }
            // Validation stopped on a system error last time.
            return self.validate_node(state, id);
        }

        if let Err(err) = self.pow.check_commitment(header, &self.params) {
            headerd_log::log_debug!(
                "header {} from peer {} failed commitment check: {}",
                hash256_to_hex(&hash),
                peer_id,
                err
            );
            return Err(err);
        }

        if is_null_hash(&header.prev_block) {
            if hash == self.genesis_hash {
                return self
                    .initialize_locked(state, header)
                    .map(AcceptOutcome::Accepted);
            }
            return Err(reject(
                REJECT_BAD_GENESIS,
                format!(
                    "header {} has no parent but is not genesis {}",
                    hash256_to_hex(&hash),
                    hash256_to_hex(&self.genesis_hash)
                ),
            ));
        }

        let Some(parent) = state.index.lookup(&header.prev_block) else {
            let now = self.clock.now();
            return Ok(if state.orphans.try_add(header, peer_id, now) {
                headerd_log::log_debug!(
                    "orphan header {} from peer {} ({} held)",
                    hash256_to_hex(&hash),
                    peer_id,
                    state.orphans.len()
                );
                AcceptOutcome::Orphaned
            } else {
                AcceptOutcome::OrphanDropped
            });
        };
        // Nothing is indexed under a parent that has not validated yet.
        let parent = state.index.get(parent);
        if !parent.is_failed() && !parent.is_valid(STATUS_VALID_TREE) {
            return Err(ChainStateError::UnvalidatedParent);
        }

        let id = state.index.insert(header)?;
        self.validate_node(state, id)
    }

    fn validate_node(
        &self,
        state: &mut State,
        id: NodeId,
    ) -> Result<AcceptOutcome, ChainStateError> {
        let node = state.index.get(id);
        let hash = node.hash;
        let height = node.height;
        let header = node.header.clone();
        let parent = node
            .parent
            .ok_or(ChainStateError::Corrupt("non-genesis header without parent"))?;

        let parent_node = state.index.get(parent);
        if parent_node.is_failed() {
            let parent_hash = parent_node.hash;
            state.index.mark_failed(id, STATUS_FAILED_CHILD);
            state.failed.insert(id);
            return Err(reject(
                REJECT_BAD_PREVBLK,
                format!(
                    "parent {} of header {} is invalid",
                    hash256_to_hex(&parent_hash),
                    hash256_to_hex(&hash)
                ),
            ));
        }
        if !parent_node.is_valid(STATUS_VALID_TREE) {
            return Err(ChainStateError::UnvalidatedParent);
        }

        let adjusted_time = state.time_data.adjusted_time(self.clock.now());
        let checked = self
            .checks
            .check_structural(&header, &self.params, self.pow.as_ref())
            .and_then(|()| {
                self.checks.check_contextual(
                    &header,
                    &state.index,
                    parent,
                    adjusted_time,
                    &self.params,
                )
            });
        if let Err(err) = checked {
            if let Some(rejection) = err.rejection() {
                if rejection.reason == REJECT_NETWORK_EXPIRED {
                    state.pending.push(ChainEvent::NetworkExpired {
                        current_height: height,
                        expiration_height: self.params.network_expiration_interval,
                    });
                }
                state.index.mark_failed(id, STATUS_FAILED_VALID);
                state.failed.insert(id);
            }
            headerd_log::log_debug!(
                "header {} at height {} rejected: {}",
                hash256_to_hex(&hash),
                height,
                err
            );
            return Err(err);
        }

        state.index.get_mut(id).raise_validity(STATUS_VALID_TREE);
        state.selector.update_best_header(&state.index, id);
        state.selector.try_add(&state.index, id);
        Ok(AcceptOutcome::Accepted(BlockIndexEntry::from(
            state.index.get(id),
        )))
    }

    fn resolve_orphans(&self, state: &mut State, parent: Hash256) {
        let mut ready = vec![parent];
        while let Some(parent) = ready.pop() {
            for orphan in state.orphans.take_children(&parent) {
                let hash = orphan.header.hash();
                match self.accept_one(state, &orphan.header, orphan.peer_id) {
                    Ok(AcceptOutcome::Accepted(_)) => ready.push(hash),
                    Ok(_) => {}
                    Err(err) => headerd_log::log_debug!(
                        "orphan header {} from peer {} rejected: {}",
                        hash256_to_hex(&hash),
                        orphan.peer_id,
                        err
                    ),
                }
            }
        }
    }

    pub fn activate_best_chain(&self, hint: Option<&Hash256>) -> Result<(), ChainStateError> {
        self.with_state(|state| {
            let hint = match hint {
                Some(hash) => match state.index.lookup(hash) {
                    Some(id) => Some(id),
                    None => return Ok(()),
                },
                None => None,
            };
            self.activate_locked(state, hint)
        })
    }

    fn activate_locked(
        &self,
        state: &mut State,
        hint: Option<NodeId>,
    ) -> Result<(), ChainStateError> {
        let Some(target) = hint.or_else(|| state.selector.find_most_work_chain(&state.index))
        else {
            return Ok(());
        };
        let old_tip = state.index.tip();
        if old_tip == Some(target) {
            return Ok(());
        }
        let target_node = state.index.get(target);
        if target_node.is_failed() || !target_node.is_valid(STATUS_VALID_TREE) {
            return Ok(());
        }
        if let Some(tip) = old_tip {
            if !ChainSelector::is_preferred(&state.index, target, tip) {
                return Ok(());
            }
        }

        let fork = match old_tip {
            Some(tip) => Some(
                state
                    .index
                    .last_common_ancestor(tip, target)
                    .ok_or(ChainStateError::Corrupt("candidate does not share the active genesis"))?,
            ),
            None => None,
        };
        let old_height = state.index.height();
        let fork_height = fork.map_or(-1, |id| state.index.get(id).height);
        let depth = old_height - fork_height;

        let threshold = self.config.suspicious_reorg_depth;
        if threshold > 0 && depth >= threshold {
            headerd_log::log_warn!(
                "suspicious reorg of depth {} (threshold {}) from height {} to fork at {}",
                depth,
                threshold,
                old_height,
                fork_height
            );
            state.pending.push(ChainEvent::SuspiciousReorg {
                depth,
                max_allowed: threshold - 1,
            });
        }

        while state.index.tip() != fork {
            let Some(tip) = state.index.tip() else {
                break;
            };
            let node = state.index.get(tip);
            state.pending.push(ChainEvent::BlockDisconnected {
                hash: node.hash,
                height: node.height,
                header: node.header.clone(),
            });
            state.index.rewind_active_chain();
        }

        let mut path = Vec::new();
        let mut walk = Some(target);
        while walk != fork {
            let id = walk.ok_or(ChainStateError::Corrupt("fork point not on target chain"))?;
            path.push(id);
            walk = state.index.get(id).parent;
        }
        for id in path.into_iter().rev() {
            state.index.extend_active_chain(id)?;
            let node = state.index.get(id);
            state.pending.push(ChainEvent::BlockConnected {
                hash: node.hash,
                height: node.height,
                header: node.header.clone(),
            });
        }

        let tip = state.index.get(target);
        state.pending.push(ChainEvent::ChainTip {
            hash: tip.hash,
            height: tip.height,
        });
        if old_tip.is_some() && depth > 0 {
            headerd_log::log_info!(
                "reorganized {} blocks at fork height {}; new tip {} at height {}",
                depth,
                fork_height,
                hash256_to_hex(&tip.hash),
                tip.height
            );
        } else {
            headerd_log::log_debug!(
                "new tip {} at height {}",
                hash256_to_hex(&tip.hash),
                tip.height
            );
        }

        state.selector.prune(&state.index, target);
        self.update_initial_download(state);
        Ok(())
    }

    /// Marks the block and its descendants invalid and falls back to the best
    /// remaining chain. Returns false for unknown hashes and for genesis.
    pub fn invalidate_block(&self, hash: &Hash256) -> Result<bool, ChainStateError> {
        self.with_state(|state| self.invalidate_locked(state, hash))
    }

    fn invalidate_locked(&self, state: &mut State, hash: &Hash256) -> Result<bool, ChainStateError> {
        let Some(id) = state.index.lookup(hash) else {
            return Ok(false);
        };
        if state.index.get(id).parent.is_none() {
            headerd_log::log_error!("refusing to invalidate genesis block {}", hash256_to_hex(hash));
            return Ok(false);
        }

        while state.index.is_on_active_chain(id) {
            let Some(tip) = state.index.tip() else {
                break;
            };
            let node = state.index.get(tip);
            state.pending.push(ChainEvent::BlockDisconnected {
                hash: node.hash,
                height: node.height,
                header: node.header.clone(),
            });
            state.index.rewind_active_chain();
        }

        state.index.mark_failed(id, STATUS_FAILED_VALID);
        state.failed.insert(id);

        // Parents precede children in the arena.
        let mut tainted = HashSet::from([id]);
        let mut descendants = Vec::new();
        for (other, node) in state.index.iter() {
            if node.parent.is_some_and(|parent| tainted.contains(&parent)) {
                tainted.insert(other);
                descendants.push(other);
            }
        }
        for other in &descendants {
            state.index.mark_failed(*other, STATUS_FAILED_CHILD);
            state.failed.insert(*other);
        }
        headerd_log::log_info!(
            "invalidated block {} and {} descendants",
            hash256_to_hex(hash),
            descendants.len()
        );

        rebuild_candidates(state);
        self.activate_locked(state, None)?;
        if let Some(tip) = state.index.tip() {
            state.selector.prune(&state.index, tip);
        }
        Ok(true)
    }

    pub fn evict_orphan_headers(&self) -> usize {
        let now = self.clock.now();
        self.view_mut(|state| state.orphans.evict(now)).unwrap_or(0)
    }

    pub fn add_orphan_header(&self, header: &BlockHeader, peer_id: i64) -> bool {
        let now = self.clock.now();
        self.view_mut(|state| state.orphans.try_add(header, peer_id, now))
            .unwrap_or(false)
    }

    pub fn orphan_header_count(&self) -> usize {
        self.view(|state| state.orphans.len()).unwrap_or(0)
    }

    fn view_mut<T>(&self, op: impl FnOnce(&mut State) -> T) -> Option<T> {
        match self.state.lock() {
            Ok(mut state) => Some(op(&mut state)),
            Err(_) => {
                headerd_log::log_warn!("chainstate lock poisoned");
                None
            }
        }
    }

    pub fn tip(&self) -> Option<BlockIndexEntry> {
        self.view(|state| state.index.tip().map(|id| state.index.get(id).into()))
            .flatten()
    }

    pub fn chain_height(&self) -> i32 {
        self.view(|state| state.index.height()).unwrap_or(-1)
    }

    pub fn block_count(&self) -> usize {
        self.view(|state| state.index.block_count()).unwrap_or(0)
    }

    pub fn lookup_block_index(&self, hash: &Hash256) -> Option<BlockIndexEntry> {
        self.view(|state| state.index.node(hash).map(BlockIndexEntry::from))
            .flatten()
    }

    pub fn block_at_height(&self, height: i32) -> Option<BlockIndexEntry> {
        self.view(|state| {
            state
                .index
                .node_at_height(height)
                .map(|id| state.index.get(id).into())
        })
        .flatten()
    }

    pub fn locator(&self, hash: Option<&Hash256>) -> Option<BlockLocator> {
        self.view(|state| {
            let start = match hash {
                Some(hash) => state.index.lookup(hash),
                None => state.index.tip(),
            };
            start.map(|id| state.index.locator(id))
        })
        .flatten()
    }

    pub fn is_on_active_chain(&self, hash: &Hash256) -> bool {
        self.view(|state| {
            state
                .index
                .lookup(hash)
                .is_some_and(|id| state.index.is_on_active_chain(id))
        })
        .unwrap_or(false)
    }

    pub fn best_header(&self) -> Option<BlockIndexEntry> {
        self.view(|state| {
            state
                .selector
                .best_header()
                .map(|id| state.index.get(id).into())
        })
        .flatten()
    }

    pub fn candidate_count(&self) -> usize {
        self.view(|state| state.selector.len()).unwrap_or(0)
    }

    pub fn failed_count(&self) -> usize {
        self.view(|state| state.failed.len()).unwrap_or(0)
    }

    pub fn try_add_block_index_candidate(&self, hash: &Hash256) -> bool {
        self.view_mut(|state| match state.index.lookup(hash) {
            Some(id) => state.selector.try_add(&state.index, id),
            None => false,
        })
        .unwrap_or(false)
    }

    pub fn next_work_required(&self, parent: &Hash256) -> Option<u32> {
        self.view(|state| {
            state
                .index
                .lookup(parent)
                .map(|id| validation::next_work_required_for(&state.index, Some(id), &self.params))
        })
        .flatten()
    }

    /// Latched: once the chain is current this stays false.
    pub fn is_initial_block_download(&self) -> bool {
        if !self.in_initial_download.load(Ordering::Relaxed) {
            return false;
        }
        self.view(|state| self.update_initial_download(state));
        self.in_initial_download.load(Ordering::Relaxed)
    }

    fn update_initial_download(&self, state: &State) {
        if !self.in_initial_download.load(Ordering::Relaxed) {
            return;
        }
        let Some(tip) = state.index.tip() else {
            return;
        };
        let tip = state.index.get(tip);
        if tip.height == 0 {
            return;
        }
        if tip.chainwork < U256::from_little_endian(&self.params.minimum_chain_work) {
            return;
        }
        if i64::from(tip.time) < self.clock.now() - MAX_TIP_AGE {
            return;
        }
        if self.in_initial_download.swap(false, Ordering::Relaxed) {
            headerd_log::log_info!(
                "leaving initial block download at height {}",
                tip.height
            );
        }
    }

    pub fn check_headers_pow(&self, headers: &[BlockHeader]) -> Result<(), ChainStateError> {
        validation::check_headers_pow(headers, &self.params, self.pow.as_ref())
    }

    pub fn check_headers_are_continuous(&self, headers: &[BlockHeader]) -> bool {
        validation::check_headers_are_continuous(headers)
    }

    pub fn calculate_headers_work(&self, headers: &[BlockHeader]) -> U256 {
        validation::calculate_headers_work(headers)
    }

    pub fn anti_dos_work_threshold(&self) -> U256 {
        let is_ibd = self.is_initial_block_download();
        self.view(|state| {
            let tip = state.index.tip().map(|id| state.index.get(id));
            validation::anti_dos_work_threshold(tip, &self.params, is_ibd)
        })
        .unwrap_or_else(|| U256::from_little_endian(&self.params.minimum_chain_work))
    }

    pub fn add_time_sample(&self, peer_id: i64, peer_time: i64) {
        let offset = peer_time - self.clock.now();
        self.view_mut(|state| state.time_data.add_sample(peer_id, offset));
    }

    pub fn time_offset(&self) -> i64 {
        self.view(|state| state.time_data.offset()).unwrap_or(0)
    }

    pub fn adjusted_time(&self) -> i64 {
        let now = self.clock.now();
        self.view(|state| state.time_data.adjusted_time(now))
            .unwrap_or(now)
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), ChainStateError> {
        let batch = {
            let state = self.lock()?;
            if state.index.is_empty() {
                return Err(ChainStateError::NotInitialized);
            }
            persist::index_batch(&state.index, &self.genesis_hash)
        };
        store.write_batch(&batch)?;
        headerd_log::log_debug!("saved block index ({} writes)", batch.len());
        Ok(())
    }

    pub fn load<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<bool, ChainStateError> {
        let Some(loaded) = persist::load_index(store, &self.genesis_hash)? else {
            return Ok(false);
        };
        self.with_state(|state| {
            state.index = loaded;
            state.failed = state
                .index
                .iter()
                .filter(|(_, node)| node.is_failed())
                .map(|(id, _)| id)
                .collect();
            state.orphans.clear();
            rebuild_candidates(state);
            if let Some(tip) = state.index.tip() {
                state.selector.prune(&state.index, tip);
                let node = state.index.get(tip);
                state.pending.push(ChainEvent::ChainTip {
                    hash: node.hash,
                    height: node.height,
                });
            }
            self.update_initial_download(state);
            headerd_log::log_info!(
                "loaded {} headers, tip height {}",
                state.index.block_count(),
                state.index.height()
            );
            Ok(true)
        })
    }
}

/// Refills the candidate set with every valid node that has no valid child,
/// and recomputes the best header.
fn rebuild_candidates(state: &mut State) {
    let usable = |node: &HeaderNode| {
        !node.is_failed() && node.is_valid(STATUS_VALID_TREE)
    };
    let extended: HashSet<NodeId> = state
        .index
        .iter()
        .filter(|(_, node)| usable(node))
        .filter_map(|(_, node)| node.parent)
        .collect();

    state.selector.clear();
    let ids: Vec<NodeId> = state
        .index
        .iter()
        .filter(|(_, node)| usable(node))
        .map(|(id, _)| id)
        .collect();
    for id in ids {
        if !extended.contains(&id) {
            state.selector.add_candidate(&state.index, id);
        }
        state.selector.update_best_header(&state.index, id);
    }
}
