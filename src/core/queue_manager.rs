//! The first-generation admission queue (§4.5, "legacy"): plain FIFO,
//! no resource-aware gating, no priority. Kept alive so the queue facade
//! can run it in shadow mode alongside [`crate::core::scheduler::Scheduler`]
//! during the cutover, not because it's still the preferred path.

use crate::models::{QueueState, QueuedWorkOrder};
use crate::CoreError;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

/// The common surface the queue facade needs from either generation of
/// admission queue. `Scheduler` implements the same shape directly (see
/// `core::scheduler`); this trait lets the facade treat both uniformly.
pub trait QueueBackend: Send + Sync {
    fn enqueue(&self, id: Uuid, priority: i32) -> crate::Result<QueuedWorkOrder>;
    fn cancel_queued(&self, id: Uuid) -> crate::Result<()>;
    fn position(&self, id: Uuid) -> Option<(usize, usize, QueueState)>;
    fn queue_depth(&self) -> usize;
}

pub struct QueueManager {
    max_queue_size: usize,
    entries: Mutex<Vec<QueuedWorkOrder>>,
    running: Mutex<HashSet<Uuid>>,
}

impl QueueManager {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            max_queue_size,
            entries: Mutex::new(Vec::new()),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// FIFO dequeue, used by tests/shadow bookkeeping; the legacy system
    /// never actually drives work (see module docs).
    pub fn mark_running(&self, id: Uuid) -> crate::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("queued work order {id}")))?;
        entries.remove(idx);
        self.running.lock().unwrap().insert(id);
        Ok(())
    }

    pub fn mark_complete(&self, id: Uuid) {
        self.running.lock().unwrap().remove(&id);
    }
}

impl QueueBackend for QueueManager {
    fn enqueue(&self, id: Uuid, priority: i32) -> crate::Result<QueuedWorkOrder> {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.id == id) || self.running.lock().unwrap().contains(&id) {
            return Err(CoreError::AlreadyEnqueued { id: id.to_string() });
        }
        if entries.len() >= self.max_queue_size {
            return Err(CoreError::QueueFull {
                depth: entries.len(),
            });
        }
        let entry = QueuedWorkOrder::new(id, priority);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn cancel_queued(&self, id: Uuid) -> crate::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let idx = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("queued work order {id}")))?;
        entries.remove(idx);
        Ok(())
    }

    fn position(&self, id: Uuid) -> Option<(usize, usize, QueueState)> {
        if self.running.lock().unwrap().contains(&id) {
            return Some((0, 0, QueueState::Running));
        }
        let entries = self.entries.lock().unwrap();
        let mut ordered: Vec<&QueuedWorkOrder> = entries.iter().collect();
        ordered.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        ordered
            .iter()
            .position(|e| e.id == id)
            .map(|idx| (idx, idx, QueueState::Waiting))
    }

    fn queue_depth(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
