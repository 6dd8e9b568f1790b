//! Dual-queue shadow-rollout facade (§4.5). Routes each work order to either
//! the legacy [`QueueManager`] or the new [`Scheduler`] deterministically by
//! id, so a given work order always lands on the same side of a partial
//! rollout no matter how many times its routing is recomputed — a
//! prerequisite for `shadow_mode` to produce comparable before/after
//! behavior per id, and for invariant #1 (§8): routing is a pure function of
//! `(id, use_new_queue_system, rollout_percent, shadow_mode)`.

use crate::config::QueueFacadeConfig;
use crate::core::queue_manager::{QueueBackend, QueueManager};
use crate::core::scheduler::Scheduler;
use crate::models::{QueueState, QueuedWorkOrder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// FNV-1a, 64-bit. Chosen over a keyed hasher (e.g. `SipHash`, the
/// default `HashMap` hasher) because routing must be stable across process
/// restarts and across replicas, not just within one process's lifetime.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(PRIME)
    })
}

/// `id`'s stable position in `[0, 100)`, used to compare against a rollout
/// percentage. Hashing the id's byte representation (rather than its string
/// form) keeps this independent of `Uuid`'s display formatting.
fn routing_bucket(id: Uuid) -> u8 {
    (fnv1a(id.as_bytes()) % 100) as u8
}

/// The id a shadow-mode mirror enqueue uses on the non-primary side. Derived
/// deterministically from `id` (rather than reusing it) so the mirrored
/// enqueue never collides with a real enqueue of the same id landing on that
/// side during a later partial rollout (§4.5: `"shadow-"+x`).
fn shadow_id(id: Uuid) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("shadow-{id}").as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    /// `use_new_queue_system=false, shadow_mode=false`: every work order
    /// routes to legacy, no mirroring.
    Disabled,
    /// `shadow_mode=true`: primary is always legacy; every enqueue is
    /// mirrored onto the new system under a derived id for comparison.
    Shadow,
    /// `use_new_queue_system=true, rollout_percent` strictly between 0 and 100.
    Partial(u8),
    /// `use_new_queue_system=true, rollout_percent>=100`: every work order
    /// routes to the new scheduler.
    Full,
}

#[derive(Debug, Default)]
struct Counters {
    total_routed: AtomicU64,
    routed_to_legacy: AtomicU64,
    routed_to_new: AtomicU64,
    shadow_mismatches: AtomicU64,
    fallbacks: AtomicU64,
}

pub struct QueueFacade {
    config: RwLock<QueueFacadeConfig>,
    legacy: Arc<QueueManager>,
    new_system: Arc<Scheduler>,
    counters: Counters,
}

impl QueueFacade {
    pub fn new(config: QueueFacadeConfig, legacy: Arc<QueueManager>, new_system: Arc<Scheduler>) -> Self {
        Self {
            config: RwLock::new(config),
            legacy,
            new_system,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> QueueFacadeConfig {
        self.config.read().unwrap().clone()
    }

    /// `phase` is derived display/introspection state; the actual per-id
    /// routing decision in [`Self::routes_to_new`] only ever consults
    /// `shadow_mode` and `rollout_percent` directly (§4.5 step 2), so the two
    /// stay consistent by construction rather than needing to be kept in sync.
    pub fn phase(&self) -> RolloutPhase {
        let config = self.config.read().unwrap();
        if config.shadow_mode {
            RolloutPhase::Shadow
        } else if !config.use_new_queue_system {
            RolloutPhase::Disabled
        } else if config.rollout_percent >= 100 {
            RolloutPhase::Full
        } else {
            RolloutPhase::Partial(config.rollout_percent)
        }
    }

    /// Replaces whichever fields are `Some` in `partial`, leaving the rest
    /// untouched, under a single write lock (§4.5: `updateConfig`).
    pub fn update_config(&self, partial: QueueFacadeConfigUpdate) {
        let mut config = self.config.write().unwrap();
        if let Some(use_new) = partial.use_new_queue_system {
            config.use_new_queue_system = use_new;
        }
        if let Some(shadow) = partial.shadow_mode {
            config.shadow_mode = shadow;
        }
        if let Some(percent) = partial.rollout_percent {
            config.rollout_percent = percent.min(100);
        }
    }

    pub fn set_rollout_percent(&self, percent: u8) {
        self.config.write().unwrap().rollout_percent = percent.min(100);
    }

    pub fn set_shadow_mode(&self, enabled: bool) {
        self.config.write().unwrap().shadow_mode = enabled;
    }

    /// Step 2 of §4.5's routing decision, applied only when not in shadow
    /// mode (shadow mode's primary is always legacy, decided separately in
    /// [`Self::enqueue`]).
    fn routes_to_new(&self, id: Uuid) -> bool {
        let config = self.config.read().unwrap();
        if !config.use_new_queue_system {
            return false;
        }
        routing_bucket(id) < config.rollout_percent
    }

    fn shadow_mode(&self) -> bool {
        self.config.read().unwrap().shadow_mode
    }

    pub fn counters(&self) -> FacadeCounters {
        FacadeCounters {
            total_routed: self.counters.total_routed.load(Ordering::Relaxed),
            routed_to_legacy: self.counters.routed_to_legacy.load(Ordering::Relaxed),
            routed_to_new: self.counters.routed_to_new.load(Ordering::Relaxed),
            shadow_mismatches: self.counters.shadow_mismatches.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.counters.total_routed.store(0, Ordering::Relaxed);
        self.counters.routed_to_legacy.store(0, Ordering::Relaxed);
        self.counters.routed_to_new.store(0, Ordering::Relaxed);
        self.counters.shadow_mismatches.store(0, Ordering::Relaxed);
        self.counters.fallbacks.store(0, Ordering::Relaxed);
    }

    /// Enqueues on the authoritative side for `id`'s routing decision and
    /// returns its result to the caller unchanged (§4.5 invariant: "enqueue
    /// result mirrors the primary system's result"). In shadow mode, also
    /// mirrors the call onto the other side under [`shadow_id`] so its
    /// behavior can be compared out-of-band; a disagreement between the two
    /// outcomes counts as a `shadow_mismatch` but never surfaces to the
    /// caller (§7: "shadow-system errors in the facade never surface to
    /// callers").
    pub fn enqueue(&self, id: Uuid, priority: i32) -> crate::Result<QueuedWorkOrder> {
        self.counters.total_routed.fetch_add(1, Ordering::Relaxed);

        if self.shadow_mode() {
            let primary = self.legacy.enqueue(id, priority);
            self.counters.routed_to_legacy.fetch_add(1, Ordering::Relaxed);

            let shadow_result = self.new_system.enqueue(shadow_id(id), priority);
            if primary.is_ok() != shadow_result.is_ok() {
                self.counters.shadow_mismatches.fetch_add(1, Ordering::Relaxed);
                warn!(
                    work_order_id = %id,
                    primary_ok = primary.is_ok(),
                    shadow_ok = shadow_result.is_ok(),
                    "shadow queue mismatch"
                );
            }
            return primary;
        }

        if self.routes_to_new(id) {
            match self.new_system.enqueue(id, priority) {
                Ok(entry) => {
                    self.counters.routed_to_new.fetch_add(1, Ordering::Relaxed);
                    Ok(entry)
                }
                Err(e) => {
                    // Step 3 (§4.5): fall back to legacy if the chosen
                    // system is unavailable. A full queue on the new side
                    // is the only failure mode that can occur here, so it's
                    // the only one that triggers fallback; propagate other
                    // errors (e.g. already-enqueued) as-is.
                    if matches!(e, crate::CoreError::QueueFull { .. }) {
                        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                        self.counters.routed_to_legacy.fetch_add(1, Ordering::Relaxed);
                        self.legacy.enqueue(id, priority)
                    } else {
                        Err(e)
                    }
                }
            }
        } else {
            self.counters.routed_to_legacy.fetch_add(1, Ordering::Relaxed);
            self.legacy.enqueue(id, priority)
        }
    }

    pub fn cancel_queued(&self, id: Uuid) -> crate::Result<()> {
        if self.shadow_mode() {
            let _ = self.new_system.cancel_queued(shadow_id(id));
            return self.legacy.cancel_queued(id);
        }
        if self.routes_to_new(id) {
            self.new_system.cancel_queued(id)
        } else {
            self.legacy.cancel_queued(id)
        }
    }

    pub fn position(&self, id: Uuid) -> Option<(usize, usize, QueueState)> {
        if self.shadow_mode() {
            return self.legacy.position(id);
        }
        if self.routes_to_new(id) {
            self.new_system.position(id)
        } else {
            self.legacy.position(id)
        }
    }

    /// Combined depth across both sides, useful for operator dashboards
    /// during a partial rollout where either side may hold queued work.
    pub fn total_queue_depth(&self) -> usize {
        self.legacy.queue_depth() + self.new_system.queue_depth()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.new_system
    }

    pub fn legacy_queue(&self) -> &Arc<QueueManager> {
        &self.legacy
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFacadeConfigUpdate {
    pub use_new_queue_system: Option<bool>,
    pub shadow_mode: Option<bool>,
    pub rollout_percent: Option<u8>,
}

/// Snapshot of the facade's routing counters (§4.5): `total_routed ==
/// routed_to_legacy + routed_to_new` always holds (§8 invariant #2).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct FacadeCounters {
    pub total_routed: u64,
    pub routed_to_legacy: u64,
    pub routed_to_new: u64,
    pub shadow_mismatches: u64,
    pub fallbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource_monitor::ResourceMonitor;
    use crate::config::ResourceMonitorConfig;
    use async_trait::async_trait;
    use crate::core::scheduler::WorkOrderExecutor;

    struct NoopExecutor;

    #[async_trait]
    impl WorkOrderExecutor for NoopExecutor {
        async fn execute(&self, _id: Uuid) {}
    }

    fn facade(config: QueueFacadeConfig) -> QueueFacade {
        let legacy = Arc::new(QueueManager::new(100));
        let monitor = Arc::new(ResourceMonitor::new(
            ResourceMonitorConfig {
                warning_threshold: 0.75,
                critical_threshold: 1.0,
                memory_per_slot_mb: 512,
                poll_interval_ms: 1000,
            },
            4,
        ));
        let scheduler = Scheduler::new(
            crate::config::SchedulerConfig {
                max_slots: 4,
                max_queue_size: 100,
                priority_mode: false,
                poll_interval_ms: 10,
                stagger_delay_ms: 0,
            },
            monitor,
            Arc::new(NoopExecutor),
            Arc::new(crate::core::broadcaster::EventBroadcaster::new()),
        );
        QueueFacade::new(config, legacy, scheduler)
    }

    #[test]
    fn disabled_phase_routes_everything_to_legacy() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: false,
            shadow_mode: false,
            rollout_percent: 0,
        });
        let id = Uuid::new_v4();
        facade.enqueue(id, 0).unwrap();
        assert_eq!(facade.legacy.queue_depth(), 1);
        assert_eq!(facade.new_system.queue_depth(), 0);
        assert_eq!(facade.phase(), RolloutPhase::Disabled);
    }

    #[test]
    fn disabled_phase_ignores_a_stray_rollout_percent() {
        // use_new_queue_system=false is a master switch: a nonzero
        // rollout_percent left over from a prior rollout must not leak
        // traffic to the new system while the feature is off.
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: false,
            shadow_mode: false,
            rollout_percent: 80,
        });
        let id = Uuid::new_v4();
        facade.enqueue(id, 0).unwrap();
        assert_eq!(facade.legacy.queue_depth(), 1);
        assert_eq!(facade.new_system.queue_depth(), 0);
    }

    #[test]
    fn full_phase_routes_everything_to_scheduler() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: true,
            shadow_mode: false,
            rollout_percent: 100,
        });
        let id = Uuid::new_v4();
        facade.enqueue(id, 0).unwrap();
        assert_eq!(facade.new_system.queue_depth(), 1);
        assert_eq!(facade.legacy.queue_depth(), 0);
        assert_eq!(facade.phase(), RolloutPhase::Full);
    }

    #[test]
    fn routing_decision_is_stable_for_the_same_id() {
        let id = Uuid::new_v4();
        let first = routing_bucket(id);
        let second = routing_bucket(id);
        assert_eq!(first, second);
    }

    /// S4 (§8): replaying routing for a fixed (use_new, rollout_percent)
    /// tuple across a fresh facade yields identical per-id routing.
    #[test]
    fn routing_replays_identically_across_a_fresh_facade() {
        let config = QueueFacadeConfig {
            use_new_queue_system: true,
            shadow_mode: false,
            rollout_percent: 50,
        };
        let ids: Vec<Uuid> = (0..100).map(|_| Uuid::new_v4()).collect();

        let first_run: Vec<bool> = {
            let facade = facade(config.clone());
            ids.iter().map(|id| facade.routes_to_new(*id)).collect()
        };
        let second_run: Vec<bool> = {
            let facade = facade(config.clone());
            ids.iter().map(|id| facade.routes_to_new(*id)).collect()
        };

        assert_eq!(first_run, second_run);
    }

    #[test]
    fn shadow_mode_mirrors_onto_the_other_side_under_a_derived_id() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: false,
            shadow_mode: true,
            rollout_percent: 0,
        });
        let id = Uuid::new_v4();
        facade.enqueue(id, 0).unwrap();
        assert_eq!(facade.legacy.queue_depth(), 1);
        assert_eq!(facade.new_system.queue_depth(), 1);
        assert!(facade.new_system.position(id).is_none());
        assert!(facade.new_system.position(shadow_id(id)).is_some());
        assert_eq!(facade.phase(), RolloutPhase::Shadow);
    }

    #[test]
    fn shadow_mode_never_changes_the_caller_visible_result() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: true,
            shadow_mode: true,
            rollout_percent: 100,
        });
        let id = Uuid::new_v4();
        // Routing would send this to `new` outside shadow mode; in shadow
        // mode the primary must still be legacy.
        facade.enqueue(id, 0).unwrap();
        assert_eq!(facade.legacy.queue_depth(), 1);
    }

    #[test]
    fn counters_total_equals_legacy_plus_new() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: true,
            shadow_mode: false,
            rollout_percent: 50,
        });
        for _ in 0..20 {
            facade.enqueue(Uuid::new_v4(), 0).unwrap();
        }
        let counters = facade.counters();
        assert_eq!(counters.total_routed, 20);
        assert_eq!(
            counters.routed_to_legacy + counters.routed_to_new,
            counters.total_routed
        );
    }

    #[test]
    fn reset_counters_zeroes_everything() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: false,
            shadow_mode: false,
            rollout_percent: 0,
        });
        facade.enqueue(Uuid::new_v4(), 0).unwrap();
        facade.reset_counters();
        let counters = facade.counters();
        assert_eq!(counters.total_routed, 0);
        assert_eq!(counters.routed_to_legacy, 0);
    }

    #[test]
    fn set_rollout_percent_clamps_to_100() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: true,
            shadow_mode: false,
            rollout_percent: 0,
        });
        facade.set_rollout_percent(250);
        assert_eq!(facade.phase(), RolloutPhase::Full);
    }

    #[test]
    fn update_config_only_touches_provided_fields() {
        let facade = facade(QueueFacadeConfig {
            use_new_queue_system: false,
            shadow_mode: false,
            rollout_percent: 0,
        });
        facade.update_config(QueueFacadeConfigUpdate {
            rollout_percent: Some(40),
            ..Default::default()
        });
        let config = facade.config();
        assert_eq!(config.rollout_percent, 40);
        assert!(!config.use_new_queue_system);
    }
}
