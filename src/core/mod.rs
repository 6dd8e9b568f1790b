//! Scheduling, orchestration and the work-order lifecycle. This module is
//! the control plane proper; `adapters` supplies the I/O it drives.

pub mod auto_processor;
pub mod broadcaster;
pub mod loop_strategy;
pub mod orchestrator;
pub mod queue_facade;
pub mod queue_manager;
pub mod resource_monitor;
pub mod retry_manager;
pub mod scheduler;
pub mod state_machine;

use crate::adapters::{
    AgentRunner, CliAgentRunner, FsWorkspaceStore, HarnessProfileRegistry,
    InMemoryHarnessProfileRegistry, JsonFilePersistence, Persistence, ShellVerificationRunner,
    VerificationRunner, WorkspaceStore,
};
use crate::config::Config;
use auto_processor::AutoProcessor;
use broadcaster::EventBroadcaster;
use loop_strategy::custom::CustomStrategyLoader;
use loop_strategy::registry::StrategyRegistry;
use orchestrator::Orchestrator;
use queue_facade::QueueFacade;
use queue_manager::QueueManager;
use resource_monitor::ResourceMonitor;
use retry_manager::RetryManager;
use scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything `main` needs to start serving: the fully wired control plane.
/// Exists mainly to keep the construction order (resource monitor before
/// scheduler, scheduler before orchestrator's `set_scheduler`, both before
/// the queue facade) in one place instead of scattered across `main.rs`.
pub struct Services {
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<Scheduler>,
    pub queue_facade: Arc<QueueFacade>,
    pub auto_processor: Arc<AutoProcessor>,
    pub resource_monitor: Arc<ResourceMonitor>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub persistence: Arc<dyn Persistence>,
    pub harness_profiles: Arc<dyn HarnessProfileRegistry>,
}

impl Services {
    /// Wires every collaborator from `config`, using the production
    /// adapters (CLI agent runner, shell verification, git workspace
    /// store, JSON-file persistence). `data_dir` roots both persistence
    /// and workspace checkouts.
    pub fn bootstrap(config: &Config, data_dir: PathBuf) -> Self {
        let persistence: Arc<dyn Persistence> =
            Arc::new(JsonFilePersistence::new(data_dir.join("state")));
        let workspace_store: Arc<dyn WorkspaceStore> =
            Arc::new(FsWorkspaceStore::new(data_dir.join("workspaces")));
        let agent_runner: Arc<dyn AgentRunner> = Arc::new(CliAgentRunner::new(300));
        let verification_runner: Arc<dyn VerificationRunner> =
            Arc::new(ShellVerificationRunner::new());
        let harness_profiles: Arc<dyn HarnessProfileRegistry> =
            Arc::new(InMemoryHarnessProfileRegistry::new());

        let strategy_registry = Arc::new(StrategyRegistry::new(CustomStrategyLoader::new()));
        let retry_manager = RetryManager::new(config.retry.clone());
        let broadcaster = Arc::new(EventBroadcaster::new());

        let resource_monitor = Arc::new(ResourceMonitor::new(
            config.resource_monitor.clone(),
            config.scheduler.max_slots,
        ));

        let orchestrator = Orchestrator::new(
            Arc::clone(&persistence),
            workspace_store,
            agent_runner,
            verification_runner,
            Arc::clone(&harness_profiles),
            strategy_registry,
            retry_manager,
            Arc::clone(&broadcaster),
            config.loop_strategy.clone(),
        );

        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&resource_monitor),
            Arc::clone(&orchestrator) as Arc<dyn scheduler::WorkOrderExecutor>,
            Arc::clone(&broadcaster),
        );
        orchestrator.set_scheduler(Arc::downgrade(&scheduler));

        let legacy_queue = Arc::new(QueueManager::new(config.scheduler.max_queue_size));
        let queue_facade = Arc::new(QueueFacade::new(
            config.queue_facade.clone(),
            legacy_queue,
            Arc::clone(&scheduler),
        ));
        orchestrator.set_queue_facade(Arc::downgrade(&queue_facade));

        let auto_processor = Arc::new(AutoProcessor::new(
            config.auto_processor.clone(),
            Arc::clone(&persistence),
            Arc::clone(&queue_facade),
            Arc::clone(&resource_monitor),
        ));

        Self {
            orchestrator,
            scheduler,
            queue_facade,
            auto_processor,
            resource_monitor,
            broadcaster,
            persistence,
            harness_profiles,
        }
    }

    /// Spawns the background loops: resource sampling, scheduler polling,
    /// auto-processor sweeps. Returns their join handles so the caller can
    /// decide whether to await or detach them.
    pub fn start_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.resource_monitor.start_polling(),
            self.scheduler.start_polling(),
            Arc::clone(&self.auto_processor).start_polling(),
        ]
    }
}
