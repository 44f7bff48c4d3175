//! `warden-hub` – Live Fan-Out
//!
//! Per-run publish/subscribe built on [`tokio::sync::broadcast`] channels so
//! that every subscriber receives every frame without any single subscriber
//! blocking the others.
//!
//! # Backpressure contract
//!
//! Each run's channel buffers `subscriber_buffer` frames (default 64). A
//! subscriber that falls behind loses the **oldest** frames first; newest
//! wins, keeping the feed live. [`HubSubscriber::recv`] counts dropped
//! frames; once `slow_sub_evict` (default 8) have been dropped without a
//! successful receive in between, the subscriber is evicted and its
//! transport should be closed. Frames that were not dropped arrive in
//! publish order; ordering across subscribers is not guaranteed.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::broadcast;
use warden_types::HubMessage;

/// Default per-subscriber buffer capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Default number of dropped frames after which a subscriber is evicted.
pub const DEFAULT_SLOW_SUB_EVICT: u64 = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Why a subscriber stream ended.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubscriberGone {
    /// The subscriber lagged past the eviction threshold.
    #[error("subscriber evicted after {dropped} dropped frames")]
    Evicted { dropped: u64 },

    /// The run's channel was closed (run reached a terminal status).
    #[error("run channel closed")]
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// RunHub
// ─────────────────────────────────────────────────────────────────────────────

/// The per-run broadcast hub. Clone-free: share it behind an `Arc`.
pub struct RunHub {
    channels: Mutex<HashMap<String, broadcast::Sender<HubMessage>>>,
    capacity: usize,
    evict_after: u64,
}

impl Default for RunHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_SLOW_SUB_EVICT)
    }
}

impl RunHub {
    pub fn new(capacity: usize, evict_after: u64) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
            evict_after,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<HubMessage>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a frame to every subscriber of `run_id`.
    ///
    /// Returns the number of receivers the frame reached; publishing to a
    /// run with no subscribers is not an error and costs one map lookup.
    pub fn publish(&self, run_id: &str, message: HubMessage) -> usize {
        let sender = {
            let channels = self.lock();
            channels.get(run_id).cloned()
        };
        match sender {
            Some(tx) => tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a run's frames. O(1); creates the channel on first use.
    pub fn subscribe(&self, run_id: &str) -> HubSubscriber {
        let mut channels = self.lock();
        let tx = channels
            .entry(run_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        HubSubscriber {
            rx: tx.subscribe(),
            dropped: 0,
            evict_after: self.evict_after,
        }
    }

    /// Number of live subscribers for a run.
    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.lock()
            .get(run_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a run's channel; active subscribers observe [`SubscriberGone::Closed`]
    /// once they drain their buffers.
    pub fn remove_run(&self, run_id: &str) {
        self.lock().remove(run_id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HubSubscriber
// ─────────────────────────────────────────────────────────────────────────────

/// One subscriber's view of a run's frame stream.
pub struct HubSubscriber {
    rx: broadcast::Receiver<HubMessage>,
    dropped: u64,
    evict_after: u64,
}

impl HubSubscriber {
    /// Wait for the next frame.
    ///
    /// Lagging costs frames, not errors, until the consecutive-drop budget
    /// is spent, at which point the subscriber is evicted and must not be
    /// polled again.
    pub async fn recv(&mut self) -> Result<HubMessage, SubscriberGone> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    self.dropped = 0;
                    return Ok(message);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    if self.dropped >= self.evict_after {
                        tracing::warn!(dropped = self.dropped, "evicting slow hub subscriber");
                        return Err(SubscriberGone::Evicted {
                            dropped: self.dropped,
                        });
                    }
                    // Oldest frames were discarded; keep draining from the
                    // newest available.
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SubscriberGone::Closed),
            }
        }
    }
}
