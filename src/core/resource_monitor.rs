//! Gates scheduler admission on available concurrency "slots" and, as a
//! second guard, system memory pressure (§4.2). Distinct from
//! [`crate::monitoring`], which is read-only observability over the whole
//! service; this module's state is load-bearing for `Scheduler::poll`.

use crate::config::ResourceMonitorConfig;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Events the monitor emits as slots and memory pressure change. Kept as a
/// plain broadcast channel rather than routed through the
/// [`crate::core::broadcaster::EventBroadcaster`] directly, so this module
/// has no upward dependency on the HTTP-facing event model; the
/// application root bridges the two (§9, "global mutable singletons").
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    SlotAcquired { id: Uuid },
    SlotReleased { id: Uuid },
    MemoryWarning { fraction: f64 },
    MemoryCritical { fraction: f64 },
}

/// A held concurrency slot. Released explicitly via
/// [`ResourceMonitor::release_slot`]; also released on drop as a backstop
/// so a panicking executor task can't leak a slot forever.
pub struct SlotHandle {
    pub id: Uuid,
    released: AtomicBool,
    monitor: Arc<Inner>,
}

impl SlotHandle {
    fn mark_released(&self) -> bool {
        // Idempotent: only the first caller (explicit release or Drop)
        // actually frees the slot.
        self.released
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if self.mark_released() {
            self.monitor.release(self.id);
        }
    }
}

struct Inner {
    max_slots: usize,
    critical_threshold: f64,
    warning_threshold: f64,
    in_use: Mutex<HashSet<Uuid>>,
    memory_fraction: Mutex<f64>,
    events: broadcast::Sender<ResourceEvent>,
    last_warned: AtomicBool,
    last_critical: AtomicBool,
}

impl Inner {
    fn release(&self, id: Uuid) {
        let removed = self.in_use.lock().unwrap().remove(&id);
        if removed {
            let _ = self.events.send(ResourceEvent::SlotReleased { id });
        }
    }
}

/// Tracks concurrency slots and (optionally) memory pressure. All mutation
/// is serialized under a single lock; `acquire_slot` is constant-time.
pub struct ResourceMonitor {
    inner: Arc<Inner>,
    poll_interval: Duration,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceMonitorConfig, max_slots: usize) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                max_slots,
                critical_threshold: config.critical_threshold,
                warning_threshold: config.warning_threshold,
                in_use: Mutex::new(HashSet::new()),
                memory_fraction: Mutex::new(0.0),
                events: tx,
                last_warned: AtomicBool::new(false),
                last_critical: AtomicBool::new(false),
            }),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            poll_handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.inner.events.subscribe()
    }

    /// Non-blocking. Returns `None` if no slot is free or memory pressure
    /// is at/above the critical threshold.
    pub fn acquire_slot(&self, id: Uuid) -> Option<SlotHandle> {
        let mem = *self.inner.memory_fraction.lock().unwrap();
        if self.inner.critical_threshold < 1.0 && mem >= self.inner.critical_threshold {
            return None;
        }

        let mut in_use = self.inner.in_use.lock().unwrap();
        if in_use.len() >= self.inner.max_slots {
            return None;
        }
        in_use.insert(id);
        drop(in_use);

        let _ = self.inner.events.send(ResourceEvent::SlotAcquired { id });
        Some(SlotHandle {
            id,
            released: AtomicBool::new(false),
            monitor: Arc::clone(&self.inner),
        })
    }

    /// Idempotent; a handle already released (explicitly or via drop) is a
    /// no-op here.
    pub fn release_slot(&self, handle: SlotHandle) {
        if handle.mark_released() {
            self.inner.release(handle.id);
        }
    }

    pub fn available_slots(&self) -> usize {
        let in_use = self.inner.in_use.lock().unwrap().len();
        self.inner.max_slots.saturating_sub(in_use)
    }

    pub fn running_count(&self) -> usize {
        self.inner.in_use.lock().unwrap().len()
    }

    pub fn can_start(&self) -> bool {
        self.available_slots() > 0
    }

    pub fn memory_fraction(&self) -> f64 {
        *self.inner.memory_fraction.lock().unwrap()
    }

    /// Spawns the background memory-sampling loop. Sampling is edge
    /// triggered: `memory-warning`/`memory-critical` fire once per
    /// crossing, not on every tick above threshold, so a sustained
    /// pressure episode doesn't flood subscribers.
    pub fn start_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let fraction = crate::monitoring::read_memory_usage_percent() / 100.0;
                *inner.memory_fraction.lock().unwrap() = fraction;

                let critical = inner.critical_threshold < 1.0 && fraction >= inner.critical_threshold;
                let warning = inner.warning_threshold < 1.0 && fraction >= inner.warning_threshold;

                if critical {
                    if !inner.last_critical.swap(true, Ordering::SeqCst) {
                        let _ = inner
                            .events
                            .send(ResourceEvent::MemoryCritical { fraction });
                    }
                } else {
                    inner.last_critical.store(false, Ordering::SeqCst);
                    if warning {
                        if !inner.last_warned.swap(true, Ordering::SeqCst) {
                            let _ = inner.events.send(ResourceEvent::MemoryWarning { fraction });
                        }
                    } else {
                        inner.last_warned.store(false, Ordering::SeqCst);
                    }
                }

                debug!(fraction, "resource monitor sampled memory pressure");
            }
        })
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(critical: f64) -> ResourceMonitorConfig {
        ResourceMonitorConfig {
            warning_threshold: 0.75,
            critical_threshold: critical,
            memory_per_slot_mb: 512,
            poll_interval_ms: 1000,
        }
    }

    #[test]
    fn acquires_up_to_max_slots() {
        let monitor = ResourceMonitor::new(config(1.0), 2);
        let a = monitor.acquire_slot(Uuid::new_v4());
        let b = monitor.acquire_slot(Uuid::new_v4());
        let c = monitor.acquire_slot(Uuid::new_v4());
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none(), "third acquire should fail at max_slots=2");
    }

    #[test]
    fn releasing_frees_a_slot_for_reuse() {
        let monitor = ResourceMonitor::new(config(1.0), 1);
        let handle = monitor.acquire_slot(Uuid::new_v4()).unwrap();
        assert!(monitor.acquire_slot(Uuid::new_v4()).is_none());
        monitor.release_slot(handle);
        assert!(monitor.acquire_slot(Uuid::new_v4()).is_some());
    }

    #[test]
    fn release_is_idempotent_via_drop() {
        let monitor = ResourceMonitor::new(config(1.0), 1);
        let handle = monitor.acquire_slot(Uuid::new_v4()).unwrap();
        drop(handle);
        assert_eq!(monitor.running_count(), 0);
        // A second acquire should succeed since the slot was freed exactly once.
        assert!(monitor.acquire_slot(Uuid::new_v4()).is_some());
    }

    #[test]
    fn critical_threshold_at_or_above_one_disables_memory_check() {
        let monitor = ResourceMonitor::new(config(1.0), 4);
        *monitor.inner.memory_fraction.lock().unwrap() = 0.999;
        assert!(monitor.acquire_slot(Uuid::new_v4()).is_some());
    }

    #[test]
    fn memory_at_or_above_critical_blocks_acquisition() {
        let monitor = ResourceMonitor::new(config(0.9), 4);
        *monitor.inner.memory_fraction.lock().unwrap() = 0.95;
        assert!(monitor.acquire_slot(Uuid::new_v4()).is_none());
    }

    #[test]
    fn running_never_exceeds_max_concurrent_slots() {
        let monitor = ResourceMonitor::new(config(1.0), 3);
        let mut handles = Vec::new();
        for _ in 0..10 {
            if let Some(h) = monitor.acquire_slot(Uuid::new_v4()) {
                handles.push(h);
            }
        }
        assert!(monitor.running_count() <= 3);
    }
}
