//! Retry scheduler — bounded, linearly backed-off re-dispatch of branches
//! that failed transiently.
//!
//! State lives in an instance-owned map keyed by message and channel. An
//! entry is created on the first failure and removed on success, permanent
//! failure or exhaustion. Every read-modify-write happens under one lock, so
//! concurrent failures for the same key cannot create duplicates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::pipeline::types::{Channel, MessageKey};

/// Key retry state is tracked under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub message: MessageKey,
    pub channel: Channel,
}

impl RetryKey {
    pub fn new(message: MessageKey, channel: Channel) -> Self {
        Self { message, channel }
    }
}

/// Retry bookkeeping for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Dispatch invocations made so far, the first one included.
    pub attempt: u32,
    pub next_eligible_at: DateTime<Utc>,
}

/// What to do after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-dispatch after `delay`; `attempt` is the number of that invocation.
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached; state has been removed.
    Exhausted { attempts: u32 },
}

/// Owns the retry map and the background timers that re-enter dispatch.
pub struct RetryScheduler {
    base_delay: Duration,
    states: Mutex<HashMap<RetryKey, RetryState>>,
}

impl RetryScheduler {
    pub fn new(base_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            base_delay,
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Record a transient failure for `key` and decide whether to retry.
    ///
    /// `max_attempts` caps total dispatch invocations for the key. It is
    /// read from the current policy, so it may change between attempts.
    pub async fn record_failure(&self, key: &RetryKey, max_attempts: u32) -> RetryDecision {
        let mut states = self.states.lock().await;
        let state = states.entry(key.clone()).or_insert_with(|| RetryState {
            attempt: 1,
            next_eligible_at: Utc::now(),
        });

        if state.attempt >= max_attempts {
            let attempts = state.attempt;
            states.remove(key);
            warn!(
                message = %key.message,
                channel = %key.channel,
                attempts,
                "Retries exhausted"
            );
            return RetryDecision::Exhausted { attempts };
        }

        let retry_number = state.attempt;
        state.attempt += 1;
        let delay = self.base_delay.saturating_mul(retry_number);
        let now = Utc::now();
        state.next_eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        info!(
            message = %key.message,
            channel = %key.channel,
            attempt = state.attempt,
            delay_secs = delay.as_secs_f64(),
            "Retry scheduled"
        );
        RetryDecision::Retry {
            attempt: state.attempt,
            delay,
        }
    }

    /// Forget `key` (delivered, or failed permanently). Returns whether state existed.
    pub async fn clear(&self, key: &RetryKey) -> bool {
        let removed = self.states.lock().await.remove(key).is_some();
        if removed {
            debug!(message = %key.message, channel = %key.channel, "Retry state cleared");
        }
        removed
    }

    pub async fn state(&self, key: &RetryKey) -> Option<RetryState> {
        self.states.lock().await.get(key).cloned()
    }

    pub async fn is_pending(&self, key: &RetryKey) -> bool {
        self.states.lock().await.contains_key(key)
    }

    pub async fn pending_count(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Drop all retry state; timers that fire afterwards do nothing.
    pub async fn clear_all(&self) {
        let mut states = self.states.lock().await;
        if !states.is_empty() {
            info!(count = states.len(), "Abandoning pending retries");
        }
        states.clear();
    }

    /// Run `task` on a background task once `key` is eligible, unless it has
    /// been cleared by then.
    pub fn schedule(self: &Arc<Self>, key: RetryKey, task: BoxFuture<'static, ()>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let Some(due) = this.state(&key).await.map(|s| s.next_eligible_at) else {
                debug!(message = %key.message, channel = %key.channel, "Retry no longer needed");
                return;
            };
            // Negative means already eligible
            if let Ok(wait) = (due - Utc::now()).to_std() {
                tokio::time::sleep(wait).await;
            }
            if !this.is_pending(&key).await {
                debug!(message = %key.message, channel = %key.channel, "Retry no longer needed");
                return;
            }
            task.await;
        });
    }
}
