//! RandomX contexts keyed by header-time epoch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use headerd_consensus::Hash256;
use headerd_primitives::hash::sha256d;
use randomx_rs::{RandomXCache, RandomXFlag, RandomXVM};

const EPOCH_SEED_PREFIX: &str = "CoinbaseChain/RandomX/Epoch/";
const DEFAULT_CACHED_EPOCHS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    ZeroDuration,
    Vm { epoch: u32, message: String },
    Poisoned(u32),
}

impl std::fmt::Display for EpochError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpochError::ZeroDuration => write!(f, "epoch duration is zero"),
            EpochError::Vm { epoch, message } => {
                write!(f, "randomx vm for epoch {epoch} unavailable: {message}")
            }
            EpochError::Poisoned(epoch) => {
                write!(f, "hashing context for epoch {epoch} is poisoned")
            }
        }
    }
}

impl std::error::Error for EpochError {}

pub fn epoch_for_time(time: u32, epoch_duration: u32) -> Result<u32, EpochError> {
    if epoch_duration == 0 {
        return Err(EpochError::ZeroDuration);
    }
    Ok(time / epoch_duration)
}

pub fn epoch_seed(epoch: u32) -> Hash256 {
    sha256d(format!("{EPOCH_SEED_PREFIX}{epoch}").as_bytes())
}

struct Vm(RandomXVM);

// The VM is only reached through the context mutex, one thread at a time.
unsafe impl Send for Vm {}

/// A light-mode RandomX VM for one epoch.
pub struct EpochContext {
    epoch: u32,
    vm: Mutex<Vm>,
}

impl EpochContext {
    pub fn new(epoch: u32) -> Result<Self, EpochError> {
        let vm_error = |err: randomx_rs::RandomXError| EpochError::Vm {
            epoch,
            message: err.to_string(),
        };
        let flags = RandomXFlag::get_recommended_flags();
        let cache = RandomXCache::new(flags, &epoch_seed(epoch)).map_err(vm_error)?;
        let vm = RandomXVM::new(flags, Some(cache), None).map_err(vm_error)?;
        headerd_log::log_info!("created randomx vm for epoch {epoch}");
        Ok(Self {
            epoch,
            vm: Mutex::new(Vm(vm)),
        })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Calls against the same context run one at a time.
    pub fn hash(&self, preimage: &[u8]) -> Result<Hash256, EpochError> {
        let vm = self
            .vm
            .lock()
            .map_err(|_| EpochError::Poisoned(self.epoch))?;
        let digest = vm.0.calculate_hash(preimage).map_err(|err| EpochError::Vm {
            epoch: self.epoch,
            message: err.to_string(),
        })?;
        digest.as_slice().try_into().map_err(|_| EpochError::Vm {
            epoch: self.epoch,
            message: format!("digest has {} bytes", digest.len()),
        })
    }
}

pub struct EpochCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    contexts: HashMap<u32, Arc<EpochContext>>,
    order: Vec<u32>,
}

static GLOBAL_CACHE: OnceLock<Arc<EpochCache>> = OnceLock::new();

impl EpochCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn global() -> Arc<EpochCache> {
        Arc::clone(GLOBAL_CACHE.get_or_init(|| Arc::new(EpochCache::new(DEFAULT_CACHED_EPOCHS))))
    }

    pub fn get(&self, epoch: u32) -> Result<Arc<EpochContext>, EpochError> {
        if let Some(context) = self.lookup(epoch)? {
            return Ok(context);
        }

        // Built outside the cache lock so other epochs are not held up.
        let built = Arc::new(EpochContext::new(epoch)?);

        let mut inner = self.inner.lock().map_err(|_| EpochError::Poisoned(epoch))?;
        if let Some(existing) = inner.contexts.get(&epoch) {
            let existing = Arc::clone(existing);
            touch(&mut inner.order, epoch);
            return Ok(existing);
        }
        inner.contexts.insert(epoch, Arc::clone(&built));
        inner.order.push(epoch);
        while inner.order.len() > self.capacity {
            let evicted = inner.order.remove(0);
            inner.contexts.remove(&evicted);
            headerd_log::log_debug!("evicted randomx vm for epoch {evicted}");
        }
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.contexts.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, epoch: u32) -> Result<Option<Arc<EpochContext>>, EpochError> {
        let mut inner = self.inner.lock().map_err(|_| EpochError::Poisoned(epoch))?;
        let found = inner.contexts.get(&epoch).map(Arc::clone);
        if found.is_some() {
            touch(&mut inner.order, epoch);
        }
        Ok(found)
    }
}

fn touch(order: &mut Vec<u32>, epoch: u32) {
    if let Some(pos) = order.iter().position(|entry| *entry == epoch) {
        order.remove(pos);
    }
    order.push(epoch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn epoch_is_time_bucket() {
        assert_eq!(epoch_for_time(0, 100), Ok(0));
        assert_eq!(epoch_for_time(99, 100), Ok(0));
        assert_eq!(epoch_for_time(100, 100), Ok(1));
        assert_eq!(epoch_for_time(5, 0), Err(EpochError::ZeroDuration));
    }

    #[test]
    fn seed_is_sha256d_of_epoch_string() {
        let expected = sha256d(b"CoinbaseChain/RandomX/Epoch/42");
        assert_eq!(epoch_seed(42), expected);
        assert_ne!(epoch_seed(42), epoch_seed(43));
    }

    #[test]
    fn hash_depends_on_epoch() {
        let a = EpochContext::new(1).expect("epoch 1");
        let b = EpochContext::new(2).expect("epoch 2");
        let first = a.hash(b"header").expect("hash");
        assert_eq!(first, a.hash(b"header").expect("hash"));
        assert_ne!(first, b.hash(b"header").expect("hash"));
        assert_ne!(first, a.hash(b"header2").expect("hash"));
    }

    #[test]
    fn cache_reuses_and_evicts() {
        let cache = EpochCache::new(2);
        let first = cache.get(1).expect("epoch 1");
        let again = cache.get(1).expect("epoch 1 again");
        assert!(Arc::ptr_eq(&first, &again));

        cache.get(2).expect("epoch 2");
        cache.get(1).expect("touch 1");
        cache.get(3).expect("epoch 3");
        assert_eq!(cache.len(), 2);

        let refreshed = cache.get(1).expect("epoch 1 kept");
        assert!(Arc::ptr_eq(&first, &refreshed));
    }

    #[test]
    fn concurrent_hashes_on_one_context_agree() {
        let context = Arc::new(EpochContext::new(7).expect("epoch 7"));
        let expected = context.hash(b"same input").expect("hash");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let context = Arc::clone(&context);
                thread::spawn(move || context.hash(b"same input").expect("hash"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("join"), expected);
        }
    }
}
