//! Admission-controlled queue (§4.4). Holds [`QueuedWorkOrder`]s until a
//! concurrency slot and (optionally) priority ordering say it's their turn,
//! then hands them to a [`WorkOrderExecutor`] — the orchestrator, in
//! production, a test double in unit tests.

use crate::config::SchedulerConfig;
use crate::core::broadcaster::{Event, EventBroadcaster};
use crate::core::resource_monitor::ResourceMonitor;
use crate::models::{EventType, QueueState, QueuedWorkOrder};
use crate::CoreError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// What the scheduler does with a work order once it's admitted. The
/// orchestrator is the only production implementor; kept as a trait so the
/// scheduler's admission logic can be unit tested without running real
/// iterations.
#[async_trait]
pub trait WorkOrderExecutor: Send + Sync {
    async fn execute(&self, id: Uuid);
}

struct Queue {
    entries: Vec<QueuedWorkOrder>,
}

impl Queue {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    fn push(&mut self, entry: QueuedWorkOrder) {
        self.entries.push(entry);
    }

    fn remove(&mut self, id: Uuid) -> Option<QueuedWorkOrder> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    /// Index of the next entry to admit: highest priority first (ties by
    /// earliest submission) in priority mode, otherwise strict FIFO.
    fn next_index(&self, priority_mode: bool) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        if !priority_mode {
            return Some(0);
        }
        self.entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.submitted_at.cmp(&a.submitted_at))
            })
            .map(|(idx, _)| idx)
    }

    fn position_of(&self, id: Uuid, priority_mode: bool) -> Option<(usize, usize)> {
        let mut ordered: Vec<&QueuedWorkOrder> = self.entries.iter().collect();
        if priority_mode {
            ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.submitted_at.cmp(&b.submitted_at)));
        } else {
            ordered.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        }
        ordered
            .iter()
            .position(|e| e.id == id)
            .map(|idx| (idx, idx))
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    resource_monitor: Arc<ResourceMonitor>,
    queue: Mutex<Queue>,
    running: Mutex<std::collections::HashSet<Uuid>>,
    executor: Arc<dyn WorkOrderExecutor>,
    broadcaster: Arc<EventBroadcaster>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        resource_monitor: Arc<ResourceMonitor>,
        executor: Arc<dyn WorkOrderExecutor>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            resource_monitor,
            queue: Mutex::new(Queue::new()),
            running: Mutex::new(std::collections::HashSet::new()),
            executor,
            broadcaster,
        })
    }

    /// Adds `id` to the back of the queue (or priority position, handled at
    /// dispatch time). Rejects a work order already queued or running, and
    /// rejects admission past `max_queue_size`, publishing a `backpressure`
    /// event so operators watching the stream can see admission pressure
    /// without polling `/api/v1/queue/health` (§4.4, §9).
    pub fn enqueue(&self, id: Uuid, priority: i32) -> crate::Result<QueuedWorkOrder> {
        let mut queue = self.queue.lock().unwrap();
        if queue.contains(id) || self.running.lock().unwrap().contains(&id) {
            return Err(CoreError::AlreadyEnqueued { id: id.to_string() });
        }
        if queue.entries.len() >= self.config.max_queue_size {
            let depth = queue.entries.len();
            drop(queue);
            self.broadcaster.publish(Event::new(
                EventType::Backpressure,
                Some(id),
                serde_json::json!({
                    "depth": depth,
                    "max_queue_size": self.config.max_queue_size,
                }),
            ));
            return Err(CoreError::QueueFull { depth });
        }
        let entry = QueuedWorkOrder::new(id, priority);
        queue.push(entry.clone());
        Ok(entry)
    }

    /// Removes a not-yet-admitted work order from the queue. A work order
    /// that has already been dispatched (no longer in the queue) returns
    /// `NotFound`; cancelling a running run is the orchestrator's job.
    pub fn cancel_queued(&self, id: Uuid) -> crate::Result<()> {
        let mut queue = self.queue.lock().unwrap();
        queue
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::NotFound(format!("queued work order {id}")))
    }

    pub fn position(&self, id: Uuid) -> Option<(usize, usize, QueueState)> {
        if self.running.lock().unwrap().contains(&id) {
            return Some((0, 0, QueueState::Running));
        }
        let queue = self.queue.lock().unwrap();
        queue
            .position_of(id, self.config.priority_mode)
            .map(|(pos, ahead)| (pos, ahead, QueueState::Waiting))
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap().entries.len()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    /// Admits as many queued work orders as available slots allow, in one
    /// pass, staggering dispatch so newly-admitted runs don't all hit the
    /// agent runner / workspace store at the same instant.
    pub async fn poll_once(self: &Arc<Self>) {
        loop {
            if !self.resource_monitor.can_start() {
                return;
            }

            let next = {
                let mut queue = self.queue.lock().unwrap();
                let idx = match queue.next_index(self.config.priority_mode) {
                    Some(idx) => idx,
                    None => return,
                };
                queue.entries.remove(idx)
            };

            let slot = self.resource_monitor.acquire_slot(next.id);
            let Some(slot) = slot else {
                // Lost the race for a slot between the check above and here;
                // put it back at the front and stop this pass.
                self.queue.lock().unwrap().entries.insert(0, next);
                return;
            };

            self.running.lock().unwrap().insert(next.id);
            info!(work_order_id = %next.id, "admitted work order");

            let scheduler = Arc::clone(self);
            let executor = Arc::clone(&self.executor);
            let id = next.id;
            tokio::spawn(async move {
                executor.execute(id).await;
                scheduler.running.lock().unwrap().remove(&id);
                scheduler.resource_monitor.release_slot(slot);
            });

            if self.config.stagger_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.stagger_delay_ms)).await;
            }
        }
    }

    pub fn start_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                scheduler.poll_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceMonitorConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        executed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkOrderExecutor for CountingExecutor {
        async fn execute(&self, _id: Uuid) {
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            max_slots: 2,
            max_queue_size: 3,
            priority_mode: false,
            poll_interval_ms: 10,
            stagger_delay_ms: 0,
        }
    }

    fn resource_monitor(max_slots: usize) -> Arc<ResourceMonitor> {
        Arc::new(ResourceMonitor::new(
            ResourceMonitorConfig {
                warning_threshold: 0.75,
                critical_threshold: 1.0,
                memory_per_slot_mb: 512,
                poll_interval_ms: 1000,
            },
            max_slots,
        ))
    }

    #[test]
    fn enqueue_rejects_duplicates() {
        let executor = Arc::new(CountingExecutor {
            executed: Arc::new(AtomicUsize::new(0)),
        });
        let scheduler = Scheduler::new(
            scheduler_config(),
            resource_monitor(2),
            executor,
            Arc::new(EventBroadcaster::new()),
        );
        let id = Uuid::new_v4();
        assert!(scheduler.enqueue(id, 0).is_ok());
        assert!(scheduler.enqueue(id, 0).is_err());
    }

    #[test]
    fn enqueue_rejects_past_max_queue_size() {
        let executor = Arc::new(CountingExecutor {
            executed: Arc::new(AtomicUsize::new(0)),
        });
        let scheduler = Scheduler::new(
            scheduler_config(),
            resource_monitor(2),
            executor,
            Arc::new(EventBroadcaster::new()),
        );
        for _ in 0..3 {
            scheduler.enqueue(Uuid::new_v4(), 0).unwrap();
        }
        assert!(scheduler.enqueue(Uuid::new_v4(), 0).is_err());
    }

    #[tokio::test]
    async fn enqueue_past_max_queue_size_publishes_backpressure_event() {
        let executor = Arc::new(CountingExecutor {
            executed: Arc::new(AtomicUsize::new(0)),
        });
        let broadcaster = Arc::new(EventBroadcaster::new());
        let scheduler = Scheduler::new(
            scheduler_config(),
            resource_monitor(2),
            executor,
            Arc::clone(&broadcaster),
        );
        let mut rx = broadcaster.subscribe("watcher", std::collections::HashSet::new(), None);
        let _ = rx.recv().await; // subscription confirmation

        for _ in 0..3 {
            scheduler.enqueue(Uuid::new_v4(), 0).unwrap();
        }
        assert!(scheduler.enqueue(Uuid::new_v4(), 0).is_err());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Backpressure);
    }

    #[tokio::test]
    async fn poll_once_admits_up_to_available_slots() {
        let executed = Arc::new(AtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor {
            executed: Arc::clone(&executed),
        });
        let scheduler = Scheduler::new(
            scheduler_config(),
            resource_monitor(2),
            executor,
            Arc::new(EventBroadcaster::new()),
        );
        for _ in 0..3 {
            scheduler.enqueue(Uuid::new_v4(), 0).unwrap();
        }

        scheduler.poll_once().await;
        assert_eq!(scheduler.queue_depth(), 1, "one should remain queued at max_slots=2");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn priority_mode_dispatches_highest_priority_first() {
        let mut queue = Queue::new();
        let low = QueuedWorkOrder::new(Uuid::new_v4(), 1);
        let high = QueuedWorkOrder::new(Uuid::new_v4(), 10);
        queue.push(low.clone());
        queue.push(high.clone());

        let idx = queue.next_index(true).unwrap();
        assert_eq!(queue.entries[idx].id, high.id);
    }

    #[test]
    fn fifo_mode_ignores_priority() {
        let mut queue = Queue::new();
        let first = QueuedWorkOrder::new(Uuid::new_v4(), 1);
        let second = QueuedWorkOrder::new(Uuid::new_v4(), 100);
        queue.push(first.clone());
        queue.push(second.clone());

        let idx = queue.next_index(false).unwrap();
        assert_eq!(queue.entries[idx].id, first.id);
    }
}
