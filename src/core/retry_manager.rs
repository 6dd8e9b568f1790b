//! Exponential backoff with full jitter, one pending retry per work order
//! at a time (§4.3).

use crate::config::RetryConfig;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct PendingRetry {
    generation: Arc<AtomicU64>,
    attempt: u32,
}

/// Tracks at most one pending retry per work-order id. `cancel`/`cancel_all`
/// synchronously prevent a scheduled callback from acting, by bumping a
/// generation counter the callback re-checks right before it fires (§9,
/// "timer/async coupling").
pub struct RetryManager {
    config: RetryConfig,
    pending: Mutex<HashMap<Uuid, PendingRetry>>,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt > self.config.max_attempts
    }

    /// Pure: `base <= delay <= min(maxDelay, base*mult^(n-1)) * (1+jitter)`
    /// (§8 property 6).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let RetryConfig {
            base_delay_ms,
            max_delay_ms,
            multiplier,
            jitter_factor,
            ..
        } = self.config;

        let base = base_delay_ms as f64;
        let max = max_delay_ms as f64;
        let capped = (base * multiplier.powi(attempt.saturating_sub(1) as i32)).min(max);

        let spread = rand::thread_rng().gen_range(-1.0f64..=1.0);
        let jittered = capped + capped * jitter_factor * spread;

        let delay_ms = jittered.clamp(base, max);
        Duration::from_millis(delay_ms.round() as u64)
    }

    /// Schedules `f` to run after the jittered backoff for `attempt`,
    /// replacing any previously pending retry for `id`. The callback holds
    /// a clone of the `generation` token installed at scheduling time; if
    /// `cancel`/`cancel_all` removes that exact entry (or a later
    /// `schedule_retry` replaces it) before the sleep elapses, the token
    /// held by the map no longer matches what the callback captured and it
    /// re-checks this right before acting, never after (§9).
    pub fn schedule_retry<F>(self: &Arc<Self>, id: Uuid, attempt: u32, f: F)
    where
        F: FnOnce() -> BoxFuture + Send + 'static,
    {
        let generation = Arc::new(AtomicU64::new(0));
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                id,
                PendingRetry {
                    generation: Arc::clone(&generation),
                    attempt,
                },
            );
        }

        let delay = self.compute_delay(attempt);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let still_current = {
                let pending = manager.pending.lock().unwrap();
                matches!(pending.get(&id), Some(entry) if Arc::ptr_eq(&entry.generation, &generation))
            };

            if !still_current {
                return;
            }

            manager.pending.lock().unwrap().remove(&id);
            f().await;
        });
    }

    /// Prevents a pending retry for `id` from firing. Idempotent: calling
    /// this with no pending retry is a no-op.
    pub fn cancel(&self, id: Uuid) {
        self.pending.lock().unwrap().remove(&id);
    }

    pub fn cancel_all(&self) {
        self.pending.lock().unwrap().clear();
    }

    /// Clears retry history for `id`, e.g. once an iteration succeeds.
    pub fn record_success(&self, id: Uuid) {
        self.cancel(id);
    }

    pub fn has_pending(&self, id: Uuid) -> bool {
        self.pending.lock().unwrap().contains_key(&id)
    }

    pub fn pending_attempt(&self, id: Uuid) -> Option<u32> {
        self.pending.lock().unwrap().get(&id).map(|e| e.attempt)
    }
}
