//! Network-adjusted time from peer clock offsets.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use headerd_consensus::constants::{DEFAULT_MAX_TIME_ADJUSTMENT, MAX_TIME_SAMPLES};

const MIN_SAMPLES: usize = 5;
const CLOSE_PEER_OFFSET: i64 = 5 * 60;

/// Source of the local wall clock, in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Median of peer offsets, one sample per peer, applied only while it stays
/// within `max_adjustment` of the local clock.
pub struct TimeData {
    max_adjustment: i64,
    sources: HashSet<i64>,
    samples: VecDeque<i64>,
    offset: i64,
    warned: bool,
}

impl Default for TimeData {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TIME_ADJUSTMENT)
    }
}

impl TimeData {
    pub fn new(max_adjustment: i64) -> Self {
        let mut samples = VecDeque::with_capacity(MAX_TIME_SAMPLES);
        samples.push_back(0);
        Self {
            max_adjustment,
            sources: HashSet::new(),
            samples,
            offset: 0,
            warned: false,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn adjusted_time(&self, now: i64) -> i64 {
        now + self.offset
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Records `offset_sample` (peer clock minus ours) for `peer_id`. Repeat
    /// peers and samples past the source limit are ignored.
    pub fn add_sample(&mut self, peer_id: i64, offset_sample: i64) {
        if self.sources.len() == MAX_TIME_SAMPLES || !self.sources.insert(peer_id) {
            return;
        }
        if self.samples.len() == MAX_TIME_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(offset_sample);

        let count = self.samples.len();
        if count < MIN_SAMPLES || count % 2 == 0 {
            return;
        }
        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let median = sorted[count / 2];

        if median.abs() <= self.max_adjustment {
            if median != self.offset {
                headerd_log::log_debug!(
                    "network time offset {:+}s from {} samples",
                    median,
                    count
                );
            }
            self.offset = median;
            return;
        }

        self.offset = 0;
        if self.warned {
            return;
        }
        let close_peer = sorted
            .iter()
            .any(|offset| *offset != 0 && offset.abs() < CLOSE_PEER_OFFSET);
        if !close_peer {
            self.warned = true;
            headerd_log::log_warn!(
                "Warning: please check that your computer's date and time are correct; \
                 network time differs by {:+}s (more than {} minutes)",
                median,
                self.max_adjustment / 60
            );
        }
    }
}
