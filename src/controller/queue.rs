//! Rate-Limited Work Queue
//!
//! A key queue with the semantics controllers rely on:
//! - adding a key that is already pending is a no-op
//! - a key being processed is never handed to a second worker; re-adds while
//!   processing are parked and requeued when the worker calls `done`
//! - failed keys come back after a per-key exponential backoff, reset by `forget`
//! - after `shut_down`, new adds are dropped and `get` drains what is left

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

// =============================================================================
// Rate Limiter
// =============================================================================

/// Configuration for per-key retry backoff
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any retry delay
    pub max_delay: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

struct KeyBackoff {
    failures: u32,
    backoff: ExponentialBackoff,
}

/// Per-key exponential backoff: base, 2×base, 4×base, ... capped at max
pub struct ItemRateLimiter {
    config: RateLimiterConfig,
    keys: DashMap<String, KeyBackoff>,
}

impl ItemRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            keys: DashMap::new(),
        }
    }

    /// Delay before `key` may be retried; each call counts one more failure
    pub fn when(&self, key: &str) -> Duration {
        let mut entry = self
            .keys
            .entry(key.to_string())
            .or_insert_with(|| KeyBackoff {
                failures: 0,
                backoff: ExponentialBackoffBuilder::new()
                    .with_initial_interval(self.config.base_delay)
                    .with_multiplier(2.0)
                    .with_randomization_factor(0.0)
                    .with_max_interval(self.config.max_delay)
                    .with_max_elapsed_time(None)
                    .build(),
            });
        entry.failures += 1;
        entry
            .backoff
            .next_backoff()
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay)
    }

    /// Number of failures recorded for `key`
    pub fn retries(&self, key: &str) -> u32 {
        self.keys.get(key).map(|entry| entry.failures).unwrap_or(0)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.keys.remove(key);
    }
}

// =============================================================================
// Work Queue
// =============================================================================

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Deduplicating, rate-limited queue of object names
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ItemRateLimiter,
}

impl WorkQueue {
    /// Create a named queue
    pub fn new(name: impl Into<String>, config: RateLimiterConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter: ItemRateLimiter::new(config),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        {
            let mut state = self.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after its backoff delay and record one more failure
    pub fn add_rate_limited(self: &Arc<Self>, key: impl Into<String>) {
        let key = key.into();
        let delay = self.limiter.when(&key);
        debug!(queue = %self.name, key = %key, delay = ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Clear the backoff history of `key`
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.retries(key)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down and empty.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as finished. A re-add that arrived during processing is queued now.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
