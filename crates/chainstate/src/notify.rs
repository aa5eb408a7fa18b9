//! Chain events for collaborators outside the manager.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use headerd_consensus::Hash256;
use headerd_primitives::BlockHeader;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    BlockConnected {
        hash: Hash256,
        height: i32,
        header: BlockHeader,
    },
    /// Sent for a block that was still the tip when it was disconnected.
    BlockDisconnected {
        hash: Hash256,
        height: i32,
        header: BlockHeader,
    },
    ChainTip { hash: Hash256, height: i32 },
    SuspiciousReorg { depth: i32, max_allowed: i32 },
    NetworkExpired {
        current_height: i32,
        expiration_height: i32,
    },
}

#[derive(Default)]
pub struct ChainNotifications {
    subscribers: Mutex<Vec<Sender<ChainEvent>>>,
}

impl ChainNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or_default()
    }

    /// Delivers `events` in order. Subscribers whose receiver is gone are
    /// dropped.
    pub fn dispatch(&self, events: Vec<ChainEvent>) {
        if events.is_empty() {
            return;
        }
        let Ok(mut subscribers) = self.subscribers.lock() else {
            headerd_log::log_error!("chain notification subscribers lock poisoned");
            return;
        };
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}
