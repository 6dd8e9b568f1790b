//! Drives a single work order's run through the iteration loop (§4.7):
//! build, snapshot, verify, ask the configured loop strategy whether to
//! keep going, repeat. The literal pseudocode order differs slightly —
//! snapshotting happens before verifying here rather than after, since
//! verification needs to run against the committed state a loop-detection
//! fingerprint can actually reference (documented as a deliberate
//! deviation, not an oversight).

use crate::adapters::agent_runner::{AgentRunOutcome, AgentRunner};
use crate::adapters::harness_profile::HarnessProfileRegistry;
use crate::adapters::persistence::{Persistence, PersistenceExt};
use crate::adapters::verification_runner::VerificationRunner;
use crate::adapters::workspace_store::WorkspaceStore;
use crate::cancel::CancelToken;
use crate::config::LoopStrategyConfig;
use crate::core::broadcaster::EventBroadcaster;
use crate::core::loop_strategy::registry::StrategyRegistry;
use crate::core::loop_strategy::{Decision, DecisionAction};
use crate::core::queue_facade::QueueFacade;
use crate::core::retry_manager::RetryManager;
use crate::core::scheduler::{Scheduler, WorkOrderExecutor};
use crate::core::state_machine::StateMachine;
use crate::models::{
    AgentIterationFields, AuditRecord, ErrorType, EventType, HarnessProfile, IterationContext,
    IterationData, IterationSummary, QueuedWorkOrder, Run, RunResult, RunState,
    VerificationIterationFields, VerificationReport, WorkOrder, WorkOrderStatus,
};
use crate::CoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Time left until `deadline`, floored at zero. Feeds `tokio::time::timeout`
/// around each in-flight iteration stage so a single long agent/verify call
/// can't run past `maxWallClockSeconds` unbounded (§4.7).
fn time_remaining(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Everything the orchestrator needs to drive work orders. Constructed once
/// at startup and wired bidirectionally with the [`Scheduler`]: the
/// scheduler needs an executor to dispatch admitted work orders to, and the
/// orchestrator needs the scheduler to enqueue/re-enqueue, so the link
/// is completed after both exist via [`Orchestrator::set_scheduler`].
pub struct Orchestrator {
    persistence: Arc<dyn Persistence>,
    workspace_store: Arc<dyn WorkspaceStore>,
    agent_runner: Arc<dyn AgentRunner>,
    verification_runner: Arc<dyn VerificationRunner>,
    harness_profiles: Arc<dyn HarnessProfileRegistry>,
    strategy_registry: Arc<StrategyRegistry>,
    retry_manager: Arc<RetryManager>,
    broadcaster: Arc<EventBroadcaster>,
    loop_strategy_config: LoopStrategyConfig,
    scheduler: Mutex<Option<Weak<Scheduler>>>,
    queue_facade: Mutex<Option<Weak<QueueFacade>>>,
    cancel_tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Arc<dyn Persistence>,
        workspace_store: Arc<dyn WorkspaceStore>,
        agent_runner: Arc<dyn AgentRunner>,
        verification_runner: Arc<dyn VerificationRunner>,
        harness_profiles: Arc<dyn HarnessProfileRegistry>,
        strategy_registry: Arc<StrategyRegistry>,
        retry_manager: Arc<RetryManager>,
        broadcaster: Arc<EventBroadcaster>,
        loop_strategy_config: LoopStrategyConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            persistence,
            workspace_store,
            agent_runner,
            verification_runner,
            harness_profiles,
            strategy_registry,
            retry_manager,
            broadcaster,
            loop_strategy_config,
            scheduler: Mutex::new(None),
            queue_facade: Mutex::new(None),
            cancel_tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_scheduler(&self, scheduler: Weak<Scheduler>) {
        *self.scheduler.lock().unwrap() = Some(scheduler);
    }

    /// Completes the wiring the same way [`Self::set_scheduler`] does: the
    /// facade is built after the orchestrator (it wraps the scheduler it
    /// feeds into), so submission is routed through it once it exists
    /// rather than threading it through the constructor (§4.5).
    pub fn set_queue_facade(&self, queue_facade: Weak<QueueFacade>) {
        *self.queue_facade.lock().unwrap() = Some(queue_facade);
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn harness_profiles(&self) -> &Arc<dyn HarnessProfileRegistry> {
        &self.harness_profiles
    }

    fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn queue_facade(&self) -> Option<Arc<QueueFacade>> {
        self.queue_facade.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn cancel_token_for(&self, id: Uuid) -> CancelToken {
        self.cancel_tokens
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(CancelToken::new)
            .clone()
    }

    /// Persists a new work order and hands it to the scheduler's admission
    /// queue. Requires [`set_scheduler`](Self::set_scheduler) to have run.
    pub async fn submit(&self, work_order: WorkOrder) -> crate::Result<QueuedWorkOrder> {
        self.persistence
            .save("work_order", work_order.id, &work_order)
            .await?;
        self.broadcaster.publish_work_order(
            work_order.id,
            EventType::WorkOrderCreated,
            serde_json::json!({"prompt_length": work_order.prompt.len()}),
        );

        let queue_facade = self
            .queue_facade()
            .ok_or_else(|| CoreError::ServiceUnavailable("queue facade not wired".to_string()))?;
        queue_facade.enqueue(work_order.id, work_order.priority)
    }

    /// Cancels a work order whether it is still queued or actively
    /// running. Idempotent against a work order already in a terminal
    /// state.
    pub async fn cancel(&self, id: Uuid) -> crate::Result<()> {
        if let Some(token) = self.cancel_tokens.lock().unwrap().get(&id) {
            token.cancel();
        }
        self.retry_manager.cancel(id);

        if let Some(queue_facade) = self.queue_facade() {
            let _ = queue_facade.cancel_queued(id);
        }

        if let Some(mut work_order) = self.persistence.load::<WorkOrder>("work_order", id).await? {
            if !work_order.status.is_terminal() {
                let mut sm = StateMachine::new(work_order.status);
                work_order.status = sm.transition(WorkOrderStatus::Canceled)?;
                work_order.completed_at = Some(Utc::now());
                self.persistence.save("work_order", id, &work_order).await?;
                self.broadcaster.publish_work_order(
                    id,
                    EventType::WorkOrderUpdated,
                    serde_json::json!({"status": "canceled"}),
                );
            }
        }
        Ok(())
    }

    /// Starts a fresh run on a work order that is either freshly queued or
    /// has a prior run on file (`POST /api/v1/work-orders/{id}/runs`, §6).
    /// Rejects any other status with a conflict: a work order already
    /// running has nothing to start, and `succeeded`/`canceled` are
    /// permanently terminal (§3's one exception is `failed`, handled by
    /// [`StateMachine::can_transition`]).
    pub async fn start_run(&self, id: Uuid) -> crate::Result<QueuedWorkOrder> {
        let mut work_order: WorkOrder = self
            .persistence
            .load("work_order", id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("work order {id}")))?;

        if work_order.status != WorkOrderStatus::Queued {
            let mut sm = StateMachine::new(work_order.status);
            work_order.status = sm.transition(WorkOrderStatus::Queued).map_err(|_| {
                CoreError::Conflict(format!(
                    "work order {id} is {:?}, cannot start a new run",
                    work_order.status
                ))
            })?;
            work_order.completed_at = None;
            self.persistence.save("work_order", id, &work_order).await?;
        }

        let queue_facade = self
            .queue_facade()
            .ok_or_else(|| CoreError::ServiceUnavailable("queue facade not wired".to_string()))?;
        queue_facade.enqueue(id, work_order.priority)
    }

    fn build_strategy_config(&self, mode: &str, work_order: &WorkOrder) -> serde_json::Value {
        match mode {
            "fixed" => serde_json::json!({
                "max_iterations": work_order.max_iterations,
                "completion_criteria": ["verification_pass", "loop_detection"],
            }),
            "hybrid" => serde_json::json!({
                "base_iterations": self.loop_strategy_config.hybrid_base_iterations,
                "max_bonus_iterations": self.loop_strategy_config.hybrid_max_bonus_iterations,
            }),
            "ralph" => serde_json::json!({
                "max_iterations": work_order.max_iterations,
                "window_size": self.loop_strategy_config.ralph_window_size,
                "convergence_threshold": self.loop_strategy_config.ralph_convergence_threshold,
                "min_iterations": self.loop_strategy_config.ralph_min_iterations,
            }),
            // Custom strategies configure themselves from whatever the
            // registered factory closure captured; no per-work-order
            // override is modeled.
            _ => serde_json::Value::Null,
        }
    }

    /// Persists `data` under a deterministic id derived from its run and
    /// iteration number (§6: "one JSON file ... per iteration"), the same
    /// derivation pattern [`queue_facade::shadow_id`] uses for a stable
    /// secondary id. A write failure here is logged, not propagated — it
    /// must never abort a run that otherwise completed successfully.
    async fn persist_iteration(&self, data: &IterationData) {
        let iteration_id = Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("iteration-{}-{}", data.run_id, data.iteration).as_bytes(),
        );
        if let Err(e) = self.persistence.save("iteration", iteration_id, data).await {
            warn!(
                run_id = %data.run_id,
                iteration = data.iteration,
                error = %e,
                "failed to persist iteration record"
            );
        }
    }

    /// Retries a single agent invocation on infrastructure failure (process
    /// spawn failure, crash, open circuit breaker) with the shared
    /// exponential backoff, distinct from the loop strategy's decision
    /// about whether to run *another iteration* once the agent did run.
    async fn run_agent_with_retry(
        &self,
        id: Uuid,
        profile: &HarnessProfile,
        workspace_path: &Path,
        prompt: &str,
        session_id: Option<&str>,
        cancel: &CancelToken,
    ) -> crate::Result<AgentRunOutcome> {
        let mut attempt = 1u32;
        loop {
            match self
                .agent_runner
                .run_iteration(profile, workspace_path, prompt, session_id, cancel)
                .await
            {
                Ok(outcome) => {
                    self.retry_manager.record_success(id);
                    return Ok(outcome);
                }
                Err(e) if cancel.is_cancelled() => return Err(e),
                Err(e) if self.retry_manager.attempts_exhausted(attempt) => return Err(e),
                Err(e) => {
                    warn!(work_order_id = %id, attempt, error = %e, "agent invocation failed, retrying");
                    let delay = self.retry_manager.compute_delay(attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn run_work_order(&self, id: Uuid) -> crate::Result<()> {
        let mut work_order: WorkOrder = self
            .persistence
            .load("work_order", id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("work order {id}")))?;
        let initial_config = serde_json::to_value(&work_order)?;

        let mut wo_sm = StateMachine::new(work_order.status);
        work_order.status = wo_sm.transition(WorkOrderStatus::Running)?;
        self.persistence.save("work_order", id, &work_order).await?;
        self.broadcaster.publish_work_order(
            id,
            EventType::WorkOrderUpdated,
            serde_json::json!({"status": "running"}),
        );

        let cancel = self.cancel_token_for(id);
        let profile_name = work_order.harness_profile_ref.as_deref().unwrap_or("default");

        // Setup failures (unknown profile, workspace checkout failure, bad
        // strategy config) happen before any `Run` exists to record an
        // iteration against, so there's nothing to retry into — fail the
        // work order outright rather than let the error escape this
        // function and leave it stuck in `running` forever (`execute` only
        // logs an `Err`, it doesn't inspect it).
        let setup = async {
            let profile = self.harness_profiles.get(profile_name).await?;
            let workspace_path = self
                .workspace_store
                .prepare(&work_order.workspace_source, id)
                .await?;
            let mode = self.loop_strategy_config.default_mode.clone();
            let mut strategy = self.strategy_registry.create(&mode)?;
            strategy.initialize(self.build_strategy_config(&mode, &work_order))?;
            crate::Result::Ok((profile, workspace_path, strategy))
        }
        .await;

        let (profile, workspace_path, mut strategy) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                warn!(work_order_id = %id, error = %e, "work order setup failed");
                work_order.status = wo_sm.transition(WorkOrderStatus::Failed)?;
                work_order.completed_at = Some(Utc::now());
                self.persistence.save("work_order", id, &work_order).await?;
                self.cancel_tokens.lock().unwrap().remove(&id);
                self.broadcaster.publish_work_order(
                    id,
                    EventType::RunFailed,
                    serde_json::json!({"reason": e.to_string()}),
                );
                return Ok(());
            }
        };

        let mut run = Run::new(id);
        run.started_at = Some(Utc::now());
        self.broadcaster.publish_work_order(
            id,
            EventType::RunStarted,
            serde_json::json!({"run_id": run.id}),
        );

        strategy.on_loop_start();

        let mut history: Vec<IterationData> = Vec::new();
        let mut session_id: Option<String> = None;
        let mut final_result = RunResult::Error;
        let deadline = run.started_at.unwrap()
            + chrono::Duration::seconds(work_order.max_wall_clock_seconds as i64);
        let mut last_decision = Decision::continue_();

        loop {
            if cancel.is_cancelled() {
                final_result = RunResult::Cancelled;
                break;
            }
            if Utc::now() >= deadline {
                warn!(work_order_id = %id, "run exceeded max wall clock");
                final_result = RunResult::Failed;
                break;
            }

            let iteration = run.iteration + 1;
            strategy.on_iteration_start(iteration);
            run.iteration = iteration;
            run.state = RunState::Building;
            let mut data = IterationData::start(run.id, iteration, RunState::Building);

            // Each stage is individually bounded by the time left until
            // `deadline` (recomputed per stage, not just once per
            // iteration), so a single slow agent or verification call can't
            // run past `maxWallClockSeconds` — only the loop's between-
            // iteration check isn't enough for that (§4.7).
            let outcome = match tokio::time::timeout(
                time_remaining(deadline),
                self.run_agent_with_retry(
                    id,
                    &profile,
                    &workspace_path,
                    &work_order.prompt,
                    session_id.as_deref(),
                    &cancel,
                ),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    data.error_type = ErrorType::AgentCrash;
                    data.error_message = Some(e.to_string());
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Error;
                    break;
                }
                Err(_elapsed) => {
                    cancel.cancel();
                    data.error_type = ErrorType::Timeout;
                    data.error_message = Some(format!(
                        "agent iteration exceeded max wall clock of {}s",
                        work_order.max_wall_clock_seconds
                    ));
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Failed;
                    break;
                }
            };
            session_id = outcome.session_id.clone().or(session_id);
            data.agent = AgentIterationFields {
                session_id: outcome.session_id.clone(),
                model: outcome.model.clone(),
                tokens_in: outcome.tokens_in,
                tokens_out: outcome.tokens_out,
                cost_usd: outcome.cost_usd,
                success: outcome.success,
            };

            run.state = RunState::Snapshotting;
            let snapshot = match tokio::time::timeout(
                time_remaining(deadline),
                self.workspace_store.snapshot(
                    &workspace_path,
                    iteration,
                    "main",
                    &format!("iteration {iteration}"),
                ),
            )
            .await
            {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => {
                    data.error_type = ErrorType::SystemError;
                    data.error_message = Some(e.to_string());
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Error;
                    break;
                }
                Err(_elapsed) => {
                    cancel.cancel();
                    data.error_type = ErrorType::Timeout;
                    data.error_message = Some(format!(
                        "snapshot exceeded max wall clock of {}s",
                        work_order.max_wall_clock_seconds
                    ));
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Failed;
                    break;
                }
            };
            data.snapshot_id = Some(snapshot.after_sha.clone());

            run.state = RunState::Verifying;
            let report: VerificationReport = match tokio::time::timeout(
                time_remaining(deadline),
                self.verification_runner
                    .verify(&workspace_path, &profile.verification_levels),
            )
            .await
            {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    data.error_type = ErrorType::SystemError;
                    data.error_message = Some(e.to_string());
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Error;
                    break;
                }
                Err(_elapsed) => {
                    cancel.cancel();
                    data.error_type = ErrorType::Timeout;
                    data.error_message = Some(format!(
                        "verification exceeded max wall clock of {}s",
                        work_order.max_wall_clock_seconds
                    ));
                    data.completed_at = Some(Utc::now());
                    self.persist_iteration(&data).await;
                    history.push(data);
                    final_result = RunResult::Failed;
                    break;
                }
            };
            data.verification = VerificationIterationFields::from(&report);

            data.error_type = if !outcome.success {
                ErrorType::AgentFailure
            } else if !report.passed {
                ErrorType::VerificationFailed
            } else {
                ErrorType::None
            };

            data.completed_at = Some(Utc::now());
            data.duration_ms = (data.completed_at.unwrap() - data.started_at)
                .num_milliseconds()
                .max(0) as u64;

            self.broadcaster.publish_work_order(
                id,
                EventType::ProgressUpdate,
                serde_json::json!({"iteration": iteration, "verification_passed": report.passed}),
            );

            let ctx = IterationContext {
                iteration,
                state: run.state,
                snapshot,
                verification: report.clone(),
                agent_output: outcome.output,
                history: history.clone(),
            };
            let decision = strategy.should_continue(&ctx);
            strategy.on_iteration_end(&decision);
            self.persist_iteration(&data).await;
            history.push(data);
            last_decision = decision.clone();

            match decision.action {
                DecisionAction::Continue => {
                    run.state = RunState::Feedback;
                    continue;
                }
                DecisionAction::Stop => {
                    final_result = if report.passed || decision.is_partial_accept() {
                        RunResult::Passed
                    } else {
                        RunResult::Failed
                    };
                    break;
                }
                DecisionAction::Abort => {
                    final_result = RunResult::Error;
                    break;
                }
            }
        }

        strategy.on_loop_end(&last_decision);

        run.completed_at = Some(Utc::now());
        run.result = Some(final_result);
        run.state = match final_result {
            RunResult::Passed => RunState::Succeeded,
            RunResult::Failed | RunResult::Error => RunState::Failed,
            RunResult::Cancelled => RunState::Canceled,
        };

        let new_status = match final_result {
            RunResult::Passed => WorkOrderStatus::Succeeded,
            RunResult::Failed | RunResult::Error => WorkOrderStatus::Failed,
            RunResult::Cancelled => WorkOrderStatus::Canceled,
        };
        work_order.status = wo_sm.transition(new_status)?;
        work_order.completed_at = Some(Utc::now());

        self.persistence.save("work_order", id, &work_order).await?;
        self.persistence.save("run", run.id, &run).await?;

        let audit = AuditRecord {
            work_order_id: id,
            run_id: run.id,
            initial_config,
            final_config: serde_json::to_value(&work_order)?,
            iteration_snapshots: history
                .iter()
                .map(|d| IterationSummary {
                    iteration: d.iteration,
                    snapshot_id: d.snapshot_id.clone(),
                    verification_passed: d.verification.passed,
                })
                .collect(),
            diffs: Vec::new(),
        };
        self.persistence.save("audit", run.id, &audit).await?;

        self.cancel_tokens.lock().unwrap().remove(&id);
        self.retry_manager.record_success(id);

        let event_type = match final_result {
            RunResult::Passed | RunResult::Cancelled => EventType::RunCompleted,
            RunResult::Failed | RunResult::Error => EventType::RunFailed,
        };
        self.broadcaster.publish_work_order(
            id,
            event_type,
            serde_json::json!({"result": format!("{final_result:?}"), "iterations": history.len()}),
        );

        if let Err(e) = self.workspace_store.cleanup(&workspace_path).await {
            warn!(work_order_id = %id, error = %e, "workspace cleanup failed");
        }

        Ok(())
    }
}

#[async_trait]
impl WorkOrderExecutor for Orchestrator {
    async fn execute(&self, id: Uuid) {
        info!(work_order_id = %id, "starting work order execution");
        if let Err(e) = self.run_work_order(id).await {
            error!(work_order_id = %id, error = %e, "work order execution failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::harness_profile::InMemoryHarnessProfileRegistry;
    use crate::adapters::persistence::JsonFilePersistence;
    use crate::config::{RetryConfig, LoopStrategyConfig as LoopCfg};
    use crate::core::loop_strategy::custom::CustomStrategyLoader;
    use crate::models::{LevelResult, Snapshot, VerificationLevel, WorkspaceSource};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysPassAgent;

    #[async_trait]
    impl AgentRunner for AlwaysPassAgent {
        async fn run_iteration(
            &self,
            _profile: &HarnessProfile,
            _workspace_path: &Path,
            _prompt: &str,
            _session_id: Option<&str>,
            _cancel: &CancelToken,
        ) -> crate::Result<AgentRunOutcome> {
            Ok(AgentRunOutcome {
                success: true,
                output: "TASK_COMPLETE".to_string(),
                session_id: Some("sess-1".to_string()),
                model: Some("test-model".to_string()),
                tokens_in: 10,
                tokens_out: 20,
                cost_usd: 0.01,
            })
        }
    }

    struct AlwaysPassVerifier;

    #[async_trait]
    impl VerificationRunner for AlwaysPassVerifier {
        async fn verify(
            &self,
            _workspace_path: &Path,
            levels: &[VerificationLevel],
        ) -> crate::Result<VerificationReport> {
            Ok(VerificationReport {
                levels: levels
                    .iter()
                    .map(|l| LevelResult {
                        level: *l,
                        passed: true,
                        checks: vec![],
                        duration_ms: 1,
                    })
                    .collect(),
                passed: true,
                diagnostics: vec![],
                duration_ms: 1,
            })
        }
    }

    struct StubWorkspaceStore {
        counter: AtomicU32,
    }

    #[async_trait]
    impl WorkspaceStore for StubWorkspaceStore {
        async fn prepare(&self, _source: &WorkspaceSource, _work_order_id: Uuid) -> crate::Result<PathBuf> {
            Ok(PathBuf::from("/tmp/stub-workspace"))
        }

        async fn snapshot(
            &self,
            _workspace_path: &Path,
            iteration: u32,
            branch: &str,
            commit_message: &str,
        ) -> crate::Result<Snapshot> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(Snapshot {
                after_sha: format!("sha-{n}"),
                files_changed: 1,
                insertions: 1,
                deletions: 0,
                iteration,
                branch: branch.to_string(),
                commit_message: commit_message.to_string(),
            })
        }

        async fn cleanup(&self, _workspace_path: &Path) -> crate::Result<()> {
            Ok(())
        }
    }

    /// Returns the orchestrator together with the scheduler and queue
    /// facade it's wired to; callers must keep both alive for as long as
    /// they expect `enqueue` to work, since the orchestrator only holds
    /// `Weak` refs to them (mirrors the production wiring in
    /// `core::Services::bootstrap`). The facade is configured to route
    /// everything to the new scheduler so these tests exercise the same
    /// `submit`/`start_run` path the API uses in production.
    fn make_orchestrator_with_scheduler(
        dir: &std::path::Path,
    ) -> (Arc<Orchestrator>, Arc<Scheduler>, Arc<QueueFacade>) {
        use crate::core::queue_manager::QueueManager;
        use crate::core::resource_monitor::ResourceMonitor;
        use crate::config::{QueueFacadeConfig, ResourceMonitorConfig};

        let orchestrator = make_orchestrator(dir);
        let resource_monitor = Arc::new(ResourceMonitor::new(
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
            resource_monitor,
            Arc::clone(&orchestrator) as Arc<dyn WorkOrderExecutor>,
            Arc::new(EventBroadcaster::new()),
        );
        orchestrator.set_scheduler(Arc::downgrade(&scheduler));

        let legacy_queue = Arc::new(QueueManager::new(100));
        let queue_facade = Arc::new(QueueFacade::new(
            QueueFacadeConfig {
                use_new_queue_system: true,
                shadow_mode: false,
                rollout_percent: 100,
            },
            legacy_queue,
            Arc::clone(&scheduler),
        ));
        orchestrator.set_queue_facade(Arc::downgrade(&queue_facade));

        (orchestrator, scheduler, queue_facade)
    }

    fn make_orchestrator(dir: &std::path::Path) -> Arc<Orchestrator> {
        let persistence = Arc::new(JsonFilePersistence::new(dir));
        let workspace_store = Arc::new(StubWorkspaceStore {
            counter: AtomicU32::new(0),
        });
        let agent_runner = Arc::new(AlwaysPassAgent);
        let verification_runner = Arc::new(AlwaysPassVerifier);
        let harness_profiles = Arc::new(InMemoryHarnessProfileRegistry::new());
        let strategy_registry = Arc::new(StrategyRegistry::new(CustomStrategyLoader::new()));
        let retry_manager = RetryManager::new(RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 2,
            multiplier: 2.0,
            jitter_factor: 0.0,
        });
        let broadcaster = Arc::new(EventBroadcaster::new());
        let loop_strategy_config = LoopCfg {
            default_mode: "fixed".to_string(),
            custom_strategy_dir: None,
            ralph_window_size: 5,
            ralph_convergence_threshold: 0.15,
            ralph_min_iterations: 1,
            hybrid_base_iterations: 5,
            hybrid_max_bonus_iterations: 3,
        };

        Orchestrator::new(
            persistence,
            workspace_store,
            agent_runner,
            verification_runner,
            harness_profiles,
            strategy_registry,
            retry_manager,
            broadcaster,
            loop_strategy_config,
        )
    }

    #[tokio::test]
    async fn successful_run_marks_work_order_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = make_orchestrator(dir.path());

        let work_order = WorkOrder::new(
            "do the thing",
            WorkspaceSource::Local {
                path: "/tmp/source".to_string(),
            },
            "default",
            5,
            3600,
        );
        let id = work_order.id;
        orchestrator
            .persistence
            .save("work_order", id, &work_order)
            .await
            .unwrap();

        orchestrator.run_work_order(id).await.unwrap();

        let saved: WorkOrder = orchestrator
            .persistence
            .load("work_order", id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, WorkOrderStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancel_before_run_marks_work_order_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = make_orchestrator(dir.path());

        let work_order = WorkOrder::new(
            "do the thing",
            WorkspaceSource::Local {
                path: "/tmp/source".to_string(),
            },
            "default",
            5,
            3600,
        );
        let id = work_order.id;
        orchestrator
            .persistence
            .save("work_order", id, &work_order)
            .await
            .unwrap();

        orchestrator.cancel(id).await.unwrap();

        let saved: WorkOrder = orchestrator
            .persistence
            .load("work_order", id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, WorkOrderStatus::Canceled);
    }

    #[tokio::test]
    async fn start_run_requeues_a_failed_work_order() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _scheduler, _queue_facade) = make_orchestrator_with_scheduler(dir.path());

        let mut work_order = WorkOrder::new(
            "do the thing",
            WorkspaceSource::Local {
                path: "/tmp/source".to_string(),
            },
            "default",
            5,
            3600,
        );
        work_order.status = WorkOrderStatus::Failed;
        let id = work_order.id;
        orchestrator
            .persistence
            .save("work_order", id, &work_order)
            .await
            .unwrap();

        orchestrator.start_run(id).await.unwrap();

        let saved: WorkOrder = orchestrator
            .persistence
            .load("work_order", id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, WorkOrderStatus::Queued);
    }

    #[tokio::test]
    async fn start_run_rejects_a_work_order_already_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _scheduler, _queue_facade) = make_orchestrator_with_scheduler(dir.path());

        let mut work_order = WorkOrder::new(
            "do the thing",
            WorkspaceSource::Local {
                path: "/tmp/source".to_string(),
            },
            "default",
            5,
            3600,
        );
        work_order.status = WorkOrderStatus::Succeeded;
        let id = work_order.id;
        orchestrator
            .persistence
            .save("work_order", id, &work_order)
            .await
            .unwrap();

        assert!(orchestrator.start_run(id).await.is_err());
    }

    struct FailingWorkspaceStore;

    #[async_trait]
    impl WorkspaceStore for FailingWorkspaceStore {
        async fn prepare(&self, _source: &WorkspaceSource, _work_order_id: Uuid) -> crate::Result<PathBuf> {
            Err(CoreError::Workspace("checkout failed".to_string()))
        }

        async fn snapshot(
            &self,
            _workspace_path: &Path,
            _iteration: u32,
            _branch: &str,
            _commit_message: &str,
        ) -> crate::Result<Snapshot> {
            unreachable!("prepare always fails first")
        }

        async fn cleanup(&self, _workspace_path: &Path) -> crate::Result<()> {
            Ok(())
        }
    }

    /// A workspace checkout failure happens before any `Run` exists, so
    /// there's no iteration to record it against — the work order must
    /// still end up `failed` rather than stuck in `running` forever.
    #[tokio::test]
    async fn workspace_setup_failure_fails_the_work_order_not_hangs_it() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = Arc::new(JsonFilePersistence::new(dir.path()));
        let harness_profiles = Arc::new(InMemoryHarnessProfileRegistry::new());
        let strategy_registry = Arc::new(StrategyRegistry::new(CustomStrategyLoader::new()));
        let retry_manager = RetryManager::new(RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
            max_attempts: 2,
            multiplier: 2.0,
            jitter_factor: 0.0,
        });
        let broadcaster = Arc::new(EventBroadcaster::new());
        let loop_strategy_config = LoopCfg {
            default_mode: "fixed".to_string(),
            custom_strategy_dir: None,
            ralph_window_size: 5,
            ralph_convergence_threshold: 0.15,
            ralph_min_iterations: 1,
            hybrid_base_iterations: 5,
            hybrid_max_bonus_iterations: 3,
        };
        let orchestrator = Orchestrator::new(
            Arc::clone(&persistence) as Arc<dyn Persistence>,
            Arc::new(FailingWorkspaceStore),
            Arc::new(AlwaysPassAgent),
            Arc::new(AlwaysPassVerifier),
            harness_profiles,
            strategy_registry,
            retry_manager,
            broadcaster,
            loop_strategy_config,
        );

        let work_order = WorkOrder::new(
            "do the thing",
            WorkspaceSource::Local {
                path: "/tmp/source".to_string(),
            },
            "default",
            5,
            3600,
        );
        let id = work_order.id;
        persistence.save("work_order", id, &work_order).await.unwrap();

        orchestrator.run_work_order(id).await.unwrap();

        let saved: WorkOrder = persistence.load("work_order", id).await.unwrap().unwrap();
        assert_eq!(saved.status, WorkOrderStatus::Failed);
    }
}
