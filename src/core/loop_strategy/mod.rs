//! Pluggable termination policies (§4.6). A strategy decides, after every
//! iteration, whether the orchestrator should keep going. The trait is
//! deliberately synchronous: deciding is pure reasoning over the iteration
//! context, never I/O.

pub mod custom;
pub mod fixed;
pub mod hybrid;
pub mod ralph;
pub mod registry;

use crate::models::{ContextMetadata, IterationContext};
use serde_json::Value;

/// What the orchestrator should do after the iteration that produced this
/// decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Continue,
    Stop,
    Abort,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub should_continue: bool,
    pub action: DecisionAction,
    pub reason: String,
    pub metadata: ContextMetadata,
}

impl Decision {
    pub fn continue_() -> Self {
        Self {
            should_continue: true,
            action: DecisionAction::Continue,
            reason: String::new(),
            metadata: ContextMetadata::new(),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            action: DecisionAction::Stop,
            reason: reason.into(),
            metadata: ContextMetadata::new(),
        }
    }

    pub fn stop_with_partial_accept(reason: impl Into<String>) -> Self {
        let mut metadata = ContextMetadata::new();
        metadata.insert("partial_accept".to_string(), Value::Bool(true));
        Self {
            should_continue: false,
            action: DecisionAction::Stop,
            reason: reason.into(),
            metadata,
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self {
            should_continue: false,
            action: DecisionAction::Abort,
            reason: reason.into(),
            metadata: ContextMetadata::new(),
        }
    }

    pub fn is_partial_accept(&self) -> bool {
        matches!(self.metadata.get("partial_accept"), Some(Value::Bool(true)))
    }
}

/// One detected repeating pattern, returned by `detect_loop`.
#[derive(Debug, Clone)]
pub struct RepeatPattern {
    pub pattern_type: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LoopDetectionResult {
    pub repeat_patterns: Vec<RepeatPattern>,
}

impl LoopDetectionResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_loop(&self) -> bool {
        !self.repeat_patterns.is_empty()
    }
}

/// Capability set every termination policy implements. A registry (see
/// [`registry::StrategyRegistry`]) maps a mode name to a factory producing
/// one of these, replacing the class-hierarchy dispatch of the original
/// system with a tagged-variant config plus trait objects (§9).
pub trait LoopStrategy: Send + Sync {
    fn initialize(&mut self, config: Value) -> crate::Result<()>;
    fn should_continue(&mut self, ctx: &IterationContext) -> Decision;

    fn on_loop_start(&mut self) {}
    fn on_iteration_start(&mut self, _iteration: u32) {}
    fn on_iteration_end(&mut self, _decision: &Decision) {}
    fn on_loop_end(&mut self, _decision: &Decision) {}

    /// A `0.0..=1.0` estimate of how far through the budgeted iterations
    /// this run is; used for progress reporting, not decision-making.
    fn get_progress(&self, ctx: &IterationContext) -> f64;

    fn detect_loop(&self, ctx: &IterationContext) -> LoopDetectionResult;

    fn reset(&mut self);
}

/// Case-insensitive match of any of the four completion markers (§4.6,
/// shared between Fixed's `agent_signal` criterion and Ralph's primary
/// signal check).
pub fn detect_completion_signal(agent_output: &str, commit_message: &str) -> bool {
    const MARKERS: [&str; 4] = ["TASK_COMPLETE", "TASK_COMPLETED", "DONE", "[COMPLETE]"];
    let haystack = format!("{agent_output} {commit_message}").to_uppercase();
    MARKERS.iter().any(|m| haystack.contains(m))
}

/// Counts how many of the most recent `window` iterations (plus the
/// current one) share `ctx.snapshot.after_sha`, for Fixed's exact-repeat
/// detection.
pub fn count_matching_shas(ctx: &IterationContext, window: usize) -> usize {
    let mut count = 1; // the current iteration's snapshot counts itself
    for entry in ctx.history.iter().rev().take(window) {
        if entry.snapshot_id.as_deref() == Some(ctx.snapshot.after_sha.as_str()) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_signal_is_case_insensitive() {
        assert!(detect_completion_signal("all good, task_complete", ""));
        assert!(detect_completion_signal("", "fix: done"));
        assert!(detect_completion_signal("see [complete] marker", ""));
        assert!(!detect_completion_signal("still working", "wip"));
    }

    #[test]
    fn decision_partial_accept_round_trips_through_metadata() {
        let decision = Decision::stop_with_partial_accept("Max iterations reached with progress");
        assert!(decision.is_partial_accept());
        assert!(!Decision::stop("Max iterations reached").is_partial_accept());
    }
}
