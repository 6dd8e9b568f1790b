//! Bridges persisted work orders into the live admission queue (§4.9).
//! On a cold start, any work order left in `Queued` status by a prior
//! process (crash, deploy) has no corresponding entry in the in-memory
//! [`QueueFacade`] — this poller finds those and re-enqueues them, and
//! backs off while the host is under memory pressure rather than piling
//! on top of it.

use crate::adapters::persistence::Persistence;
use crate::config::AutoProcessorConfig;
use crate::core::queue_facade::QueueFacade;
use crate::core::resource_monitor::ResourceMonitor;
use crate::models::{WorkOrder, WorkOrderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct AutoProcessor {
    config: AutoProcessorConfig,
    persistence: Arc<dyn Persistence>,
    queue_facade: Arc<QueueFacade>,
    resource_monitor: Arc<ResourceMonitor>,
}

impl AutoProcessor {
    pub fn new(
        config: AutoProcessorConfig,
        persistence: Arc<dyn Persistence>,
        queue_facade: Arc<QueueFacade>,
        resource_monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            config,
            persistence,
            queue_facade,
            resource_monitor,
        }
    }

    fn available_memory(&self) -> f64 {
        1.0 - self.resource_monitor.memory_fraction()
    }

    /// One sweep: lists every persisted work order, re-enqueues those still
    /// `Queued` but not already tracked by the facade. Already-queued or
    /// already-running work orders are left alone — `enqueue` rejects
    /// duplicates, so a double-admit attempt is just a harmless no-op.
    pub async fn sweep_once(&self) -> crate::Result<usize> {
        if !self.config.enabled {
            return Ok(0);
        }

        if self.available_memory() < self.config.min_available_memory {
            warn!(
                available_memory = self.available_memory(),
                min_required = self.config.min_available_memory,
                "auto-processor skipping sweep: insufficient available memory"
            );
            return Ok(0);
        }

        let ids = self.persistence.list_ids("work_order").await?;
        let mut recovered = 0;
        for id in ids {
            let value = self.persistence.load_value("work_order", id).await?;
            let Some(value) = value else { continue };
            let work_order: WorkOrder = match serde_json::from_value(value) {
                Ok(wo) => wo,
                Err(err) => {
                    warn!(work_order_id = %id, error = %err, "auto-processor skipping unparseable work order");
                    continue;
                }
            };
            if work_order.status != WorkOrderStatus::Queued {
                continue;
            }
            if self.queue_facade.position(id).is_some() {
                continue;
            }
            match self.queue_facade.enqueue(id, work_order.priority) {
                Ok(_) => {
                    recovered += 1;
                    info!(work_order_id = %id, "auto-processor recovered orphaned queued work order");
                }
                Err(err) => {
                    warn!(work_order_id = %id, error = %err, "auto-processor failed to recover work order");
                }
            }
        }
        Ok(recovered)
    }

    pub fn start_polling(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_once().await {
                    warn!(error = %err, "auto-processor sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::{JsonFilePersistence, PersistenceExt};
    use crate::config::{QueueFacadeConfig, ResourceMonitorConfig, SchedulerConfig};
    use crate::core::queue_manager::QueueManager;
    use crate::core::scheduler::{Scheduler, WorkOrderExecutor};
    use crate::models::WorkspaceSource;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoopExecutor;

    #[async_trait]
    impl WorkOrderExecutor for NoopExecutor {
        async fn execute(&self, _id: Uuid) {}
    }

    async fn harness() -> (AutoProcessor, Arc<JsonFilePersistence>, Arc<QueueFacade>) {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(JsonFilePersistence::new(dir.path().to_path_buf()));
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
            SchedulerConfig {
                max_slots: 4,
                max_queue_size: 100,
                priority_mode: false,
                poll_interval_ms: 10,
                stagger_delay_ms: 0,
            },
            Arc::clone(&monitor),
            Arc::new(NoopExecutor),
            Arc::new(crate::core::broadcaster::EventBroadcaster::new()),
        );
        let facade = Arc::new(QueueFacade::new(
            QueueFacadeConfig {
                use_new_queue_system: true,
                shadow_mode: false,
                rollout_percent: 0,
            },
            Arc::new(QueueManager::new(100)),
            scheduler,
        ));
        let processor = AutoProcessor::new(
            AutoProcessorConfig {
                enabled: true,
                poll_interval_ms: 10,
                min_available_memory: 0.1,
            },
            persistence.clone() as Arc<dyn Persistence>,
            Arc::clone(&facade),
            monitor,
        );
        (processor, persistence, facade)
    }

    #[tokio::test]
    async fn recovers_orphaned_queued_work_orders() {
        let (processor, persistence, facade) = harness().await;
        let work_order = WorkOrder::new(
            "do something",
            WorkspaceSource::Local {
                path: "/tmp/workspace".to_string(),
            },
            "default",
            5,
            3600,
        );
        let id = work_order.id;
        persistence.save("work_order", id, &work_order).await.unwrap();

        let recovered = processor.sweep_once().await.unwrap();
        assert_eq!(recovered, 1);
        assert!(facade.position(id).is_some());
    }

    #[tokio::test]
    async fn skips_work_orders_already_queued_in_the_facade() {
        let (processor, persistence, facade) = harness().await;
        let work_order = WorkOrder::new(
            "do something",
            WorkspaceSource::Local {
                path: "/tmp/workspace".to_string(),
            },
            "default",
            5,
            3600,
        );
        let id = work_order.id;
        persistence.save("work_order", id, &work_order).await.unwrap();
        facade.enqueue(id, 0).unwrap();

        let recovered = processor.sweep_once().await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn ignores_non_queued_work_orders() {
        let (processor, persistence, _facade) = harness().await;
        let mut work_order = WorkOrder::new(
            "do something",
            WorkspaceSource::Local {
                path: "/tmp/workspace".to_string(),
            },
            "default",
            5,
            3600,
        );
        work_order.status = WorkOrderStatus::Succeeded;
        persistence.save("work_order", work_order.id, &work_order).await.unwrap();

        let recovered = processor.sweep_once().await.unwrap();
        assert_eq!(recovered, 0);
    }

    #[tokio::test]
    async fn disabled_processor_never_recovers() {
        let (mut processor, persistence, _facade) = harness().await;
        processor.config.enabled = false;
        let work_order = WorkOrder::new(
            "do something",
            WorkspaceSource::Local {
                path: "/tmp/workspace".to_string(),
            },
            "default",
            5,
            3600,
        );
        persistence.save("work_order", work_order.id, &work_order).await.unwrap();

        let recovered = processor.sweep_once().await.unwrap();
        assert_eq!(recovered, 0);
    }
}
