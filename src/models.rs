//! Core data model: work orders, runs, iterations, snapshots and the
//! handful of value types the HTTP edge and persistence layer serialize
//! directly.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use chrono::{DateTime, Utc};

/// Where a work order's workspace comes from. Resolving this into an
/// actual checkout is the job of the external `WorkspaceStore` collaborator;
/// the core only carries the tagged value around.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkspaceSource {
    Local {
        path: String,
    },
    GitHub {
        owner: String,
        repo: String,
        branch: String,
    },
    GitHubNew {
        owner: String,
        name: String,
        template: String,
    },
}

/// Canonical work-order lifecycle. See [`crate::core::state_machine`] for
/// the transition table that governs movement between these states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Queued,
    Running,
    WaitingForChildren,
    Integrating,
    Succeeded,
    Failed,
    Canceled,
}

impl WorkOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkOrderStatus::Succeeded | WorkOrderStatus::Failed | WorkOrderStatus::Canceled
        )
    }
}

/// Canonical run lifecycle, one notch finer-grained than [`WorkOrderStatus`]
/// since a single work order's run passes through build/snapshot/verify
/// sub-states on every iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Leased,
    Building,
    Snapshotting,
    Verifying,
    Feedback,
    PrCreated,
    CiPolling,
    Succeeded,
    Failed,
    Canceled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Passed,
    Failed,
    Cancelled,
    Error,
}

/// A user request to perform a task on a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub prompt: String,
    pub workspace_source: WorkspaceSource,
    pub agent_type: String,
    pub max_iterations: u32,
    pub max_wall_clock_seconds: u64,
    pub harness_profile_ref: Option<String>,
    pub status: WorkOrderStatus,
    pub parent_id: Option<Uuid>,
    pub depth: u32,
    /// Submission priority, consumed by the scheduler/queue manager when
    /// building a [`QueuedWorkOrder`]. Higher dispatches first in priority mode.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkOrder {
    pub fn new(
        prompt: impl Into<String>,
        workspace_source: WorkspaceSource,
        agent_type: impl Into<String>,
        max_iterations: u32,
        max_wall_clock_seconds: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            workspace_source,
            agent_type: agent_type.into(),
            max_iterations,
            max_wall_clock_seconds,
            harness_profile_ref: None,
            status: WorkOrderStatus::Queued,
            parent_id: None,
            depth: 0,
            priority: 0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// One end-to-end attempt to satisfy a work order. A work order can have
/// several runs (retry/resume); a run exclusively owns its iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub iteration: u32,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub result: Option<RunResult>,
}

impl Run {
    pub fn new(work_order_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_order_id,
            iteration: 0,
            state: RunState::Queued,
            started_at: None,
            completed_at: None,
            session_id: None,
            result: None,
        }
    }
}

/// Verification tiers. Each passes or fails independently; overall passes
/// iff every non-skipped level passes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    L0,
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelResult {
    pub level: VerificationLevel,
    pub passed: bool,
    pub checks: Vec<String>,
    pub duration_ms: u64,
}

/// Result of running the verification levels against a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub levels: Vec<LevelResult>,
    pub passed: bool,
    pub diagnostics: Vec<String>,
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Highest level that was run and passed, used by the Hybrid strategy's
    /// "progress" check (§4.6).
    pub fn highest_passed_level(&self) -> Option<VerificationLevel> {
        self.levels
            .iter()
            .filter(|l| l.passed)
            .map(|l| l.level)
            .max()
    }

    pub fn empty() -> Self {
        Self {
            levels: Vec::new(),
            passed: false,
            diagnostics: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// A captured, content-addressed state of the workspace after an iteration.
/// Used as the fingerprint for loop detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub after_sha: String,
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
    pub iteration: u32,
    pub branch: String,
    pub commit_message: String,
}

/// iteration-level error taxonomy (§7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    None,
    AgentCrash,
    AgentFailure,
    VerificationFailed,
    Timeout,
    SystemError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIterationFields {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub success: bool,
}

impl Default for AgentIterationFields {
    fn default() -> Self {
        Self {
            session_id: None,
            model: None,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationIterationFields {
    pub levels_run: Vec<VerificationLevel>,
    pub passed: bool,
    pub duration_ms: u64,
    /// Highest level that passed this iteration, carried forward from
    /// [`VerificationReport::highest_passed_level`] so the Hybrid strategy
    /// can tell progress apart from a stalled run without re-deriving it
    /// from the full report on every `shouldContinue` call (§4.6).
    pub highest_passed_level: Option<VerificationLevel>,
    /// Diagnostic messages from this iteration's report, used by Hybrid's
    /// composite loop fingerprint (sha + sorted diagnostics, §4.6).
    pub diagnostics: Vec<String>,
}

impl Default for VerificationIterationFields {
    fn default() -> Self {
        Self {
            levels_run: Vec::new(),
            passed: false,
            duration_ms: 0,
            highest_passed_level: None,
            diagnostics: Vec::new(),
        }
    }
}

impl From<&VerificationReport> for VerificationIterationFields {
    fn from(report: &VerificationReport) -> Self {
        Self {
            levels_run: report.levels.iter().map(|l| l.level).collect(),
            passed: report.passed,
            duration_ms: report.duration_ms,
            highest_passed_level: report.highest_passed_level(),
            diagnostics: report.diagnostics.clone(),
        }
    }
}

/// One agent+verify cycle inside a run. Persisted even when the iteration
/// crashes (error fields populated, agent/verification fields left at
/// their defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationData {
    pub run_id: Uuid,
    pub iteration: u32,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub snapshot_id: Option<String>,
    pub agent: AgentIterationFields,
    pub verification: VerificationIterationFields,
    pub error_type: ErrorType,
    pub error_message: Option<String>,
}

impl IterationData {
    pub fn start(run_id: Uuid, iteration: u32, state: RunState) -> Self {
        Self {
            run_id,
            iteration,
            state,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            snapshot_id: None,
            agent: AgentIterationFields::default(),
            verification: VerificationIterationFields::default(),
            error_type: ErrorType::None,
            error_message: None,
        }
    }

    /// Invariant (§3): `agentSuccess=true ∧ verificationPassed=true ⇒ errorType=none`.
    pub fn invariant_holds(&self) -> bool {
        if self.agent.success && self.verification.passed {
            self.error_type == ErrorType::None
        } else {
            true
        }
    }
}

/// enqueued id + priority + submission time + current status, as tracked
/// by the scheduler/queue manager while a work order waits for a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedWorkOrder {
    pub id: Uuid,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    pub status: WorkOrderStatus,
}

impl QueuedWorkOrder {
    pub fn new(id: Uuid, priority: i32) -> Self {
        Self {
            id,
            priority,
            submitted_at: Utc::now(),
            status: WorkOrderStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    Running,
}

/// Position information exposed to clients polling `/queue/position/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePosition {
    pub position: usize,
    pub ahead: usize,
    pub state: QueueState,
    pub enqueued_at: DateTime<Utc>,
    pub estimated_wait_ms: Option<u64>,
}

/// A pending or completed retry, tracked one-per-work-order by the retry manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub work_order_id: Uuid,
    pub attempt_number: u32,
    pub scheduled_delay_ms: u64,
}

/// Event types published through the broadcaster (§4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkOrderCreated,
    WorkOrderUpdated,
    RunStarted,
    RunCompleted,
    RunFailed,
    AgentToolCall,
    AgentToolResult,
    AgentOutput,
    FileChanged,
    ProgressUpdate,
    SubscriptionConfirmed,
    UnsubscriptionConfirmed,
    Backpressure,
    Pong,
    Error,
}

/// Per-subscription interest filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub types: Option<HashSet<EventType>>,
    pub verbosity: Option<String>,
}

impl EventFilter {
    pub fn accepts(&self, event_type: EventType) -> bool {
        match &self.types {
            Some(types) => types.contains(&event_type),
            None => true,
        }
    }
}

/// clientId, workOrderId set, optional event filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub client_id: String,
    pub work_order_ids: HashSet<Uuid>,
    pub filter: Option<EventFilter>,
}

/// A named bundle of agent binary/args/verification-level configuration —
/// the minimal in-process stand-in for the external YAML harness-profile
/// system (§3.1, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessProfile {
    pub name: String,
    pub agent_binary: String,
    pub agent_args: Vec<String>,
    pub verification_levels: Vec<VerificationLevel>,
    pub default_max_iterations: u32,
}

/// Per-run audit record: initial + final config, per-iteration snapshots, diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub work_order_id: Uuid,
    pub run_id: Uuid,
    pub initial_config: serde_json::Value,
    pub final_config: serde_json::Value,
    pub iteration_snapshots: Vec<IterationSummary>,
    pub diffs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSummary {
    pub iteration: u32,
    pub snapshot_id: Option<String>,
    pub verification_passed: bool,
}

/// Result of the optional startup persistence-corruption scan (§9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorruptionScanResult {
    pub total_files: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub corrupted_files: Vec<String>,
    pub duration_ms: u64,
}

/// Context handed to a loop strategy's `shouldContinue`.
#[derive(Debug, Clone)]
pub struct IterationContext {
    pub iteration: u32,
    pub state: RunState,
    pub snapshot: Snapshot,
    pub verification: VerificationReport,
    pub agent_output: String,
    pub history: Vec<IterationData>,
}

pub type ContextMetadata = HashMap<String, serde_json::Value>;
