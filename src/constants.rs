//! System-wide configuration values.
//! Each constant includes the reasoning for its specific value so defaults
//! can be revisited deliberately rather than by guesswork.

// SCHEDULING
/// SCHEDULER POLL INTERVAL: balance between responsiveness and CPU usage.
/// Why: 100ms gives a near-real-time feel without busy-polling the queue.
/// Alternative: 25ms (rejected: unnecessary wakeups under low load), 1s (rejected: sluggish admission).
pub const SCHEDULER_POLL_INTERVAL_MS: u64 = 100;

/// DEFAULT EXECUTION SLOTS: concurrent work-order cap when not overridden.
/// Why: 4 keeps a modest host responsive while still allowing real parallelism.
/// Alternative: 1 (rejected: no concurrency benefit), 16 (rejected: default too aggressive for small hosts).
pub const DEFAULT_MAX_SLOTS: usize = 4;

/// DEFAULT QUEUE DEPTH: memory protection against unbounded backlog.
/// Why: 1000 pending work orders is generous for interactive use while bounding memory.
/// Alternative: 10_000 (rejected: risks slow memory growth under abuse), 100 (rejected: too restrictive).
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// STAGGER DELAY: spacing between two slot acquisitions admitted in the same tick.
/// Why: avoids every newly-admitted work order hitting the agent binary/workspace
/// store at the exact same instant.
pub const SCHEDULER_STAGGER_DELAY_MS: u64 = 50;

// RESOURCE MONITOR
/// MEMORY POLL INTERVAL: how often the resource monitor re-samples memory pressure.
pub const RESOURCE_POLL_INTERVAL_MS: u64 = 1000;

/// WARNING THRESHOLD: fraction of total memory in use before new admissions log a warning.
pub const DEFAULT_MEMORY_WARNING_THRESHOLD: f64 = 0.75;

/// CRITICAL THRESHOLD: fraction of total memory in use before admission is paused.
/// A threshold of 1.0 or greater disables the check entirely (§4.2).
pub const DEFAULT_MEMORY_CRITICAL_THRESHOLD: f64 = 0.90;

/// MEMORY PER SLOT: informational sizing hint attached to each acquired slot;
/// not itself enforced (enforcement is via the critical-threshold poll).
pub const DEFAULT_MEMORY_PER_SLOT_MB: u64 = 512;

// AUTO-PROCESSOR
/// AUTO-PROCESSOR POLL INTERVAL: how often queued work orders are swept
/// from persistence into the live queue.
pub const AUTO_PROCESSOR_POLL_INTERVAL_MS: u64 = 2000;

/// AUTO-PROCESSOR MIN AVAILABLE MEMORY: fraction of memory that must remain
/// free before a newly-queued work order is admitted.
pub const AUTO_PROCESSOR_MIN_AVAILABLE_MEMORY: f64 = 0.15;

// LOOP STRATEGIES
/// RALPH WINDOW SIZE: number of recent agent outputs kept for Jaccard
/// similarity loop detection.
pub const DEFAULT_RALPH_WINDOW_SIZE: usize = 5;

/// RALPH CONVERGENCE THRESHOLD: similarity band: any pairwise similarity
/// ≥ `1 - convergenceThreshold` trips loop detection.
pub const DEFAULT_RALPH_CONVERGENCE_THRESHOLD: f64 = 0.15;

/// RALPH MIN ITERATIONS: floor below which a completion signal is ignored.
pub const DEFAULT_RALPH_MIN_ITERATIONS: u32 = 1;

/// HYBRID BASE/BONUS ITERATIONS: `maxIterations = base + bonus`.
pub const DEFAULT_HYBRID_BASE_ITERATIONS: u32 = 5;
pub const DEFAULT_HYBRID_MAX_BONUS_ITERATIONS: u32 = 3;

// RETRY MANAGER
/// BASE RETRY DELAY: first backoff step before jitter is applied.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// MAX RETRY DELAY: backoff ceiling so a flaky work order never waits longer than this.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;

/// MAX RETRY ATTEMPTS: after this many failed attempts the work order is marked Failed.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// RETRY BACKOFF MULTIPLIER: growth factor applied per attempt before jitter.
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;

/// RETRY JITTER FACTOR: fraction of the capped delay randomized ± to avoid
/// synchronized retry storms across work orders (§8 property 6, full jitter).
pub const DEFAULT_RETRY_JITTER_FACTOR: f64 = 0.2;

// EVENT BROADCASTER
/// PER-SUBSCRIBER BUFFER: bounded so one slow consumer can't grow memory unbounded.
/// Why: 500 events covers several seconds of chatty iterations at typical rates.
/// Alternative: 32 (rejected: drops too eagerly under bursts), 4096 (rejected: wastes memory per idle subscriber).
pub const EVENT_BUFFER_SIZE: usize = 500;

// QUEUE FACADE
/// DEFAULT ROLLOUT PERCENTAGE when the facade is in `partial` phase and no
/// override is configured.
pub const DEFAULT_QUEUE_FACADE_ROLLOUT_PERCENT: u8 = 0;

// API / HTTP
/// DEFAULT API PORT.
pub const DEFAULT_API_PORT: u16 = 8080;

/// MAX WORK ORDER PROMPT LENGTH: prevents pathologically large request bodies
/// from reaching the agent runner.
pub const MAX_PROMPT_LENGTH: usize = 50_000;

/// MAX WORK ORDER DEPTH: bounds recursive child work-order creation.
pub const MAX_WORK_ORDER_DEPTH: u32 = 5;

/// DEFAULT MAX ITERATIONS: applied when a work order omits the field.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// DEFAULT MAX WALL CLOCK: applied when a work order omits the field.
pub const DEFAULT_MAX_WALL_CLOCK_SECONDS: u64 = 3600;
