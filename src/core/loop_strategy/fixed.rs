//! Stops on `maxIterations` or on any configured completion-detection
//! criterion (§4.6, Fixed).

use super::{count_matching_shas, detect_completion_signal, Decision, LoopDetectionResult, LoopStrategy, RepeatPattern};
use crate::constants::DEFAULT_MAX_ITERATIONS;
use crate::models::IterationContext;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCriterion {
    VerificationPass,
    NoChanges,
    LoopDetection,
    AgentSignal,
    CiPass,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct FixedConfig {
    max_iterations: u32,
    completion_criteria: Vec<CompletionCriterion>,
    /// How many recent iterations to scan for an exact snapshot repeat.
    loop_window: usize,
}

impl Default for FixedConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            completion_criteria: vec![CompletionCriterion::VerificationPass],
            loop_window: 10,
        }
    }
}

pub struct FixedStrategy {
    config: FixedConfig,
}

impl FixedStrategy {
    pub fn new() -> Self {
        Self {
            config: FixedConfig::default(),
        }
    }

    fn criterion_fires(&self, criterion: CompletionCriterion, ctx: &IterationContext) -> bool {
        match criterion {
            CompletionCriterion::VerificationPass => ctx.verification.passed,
            CompletionCriterion::NoChanges => {
                ctx.snapshot.files_changed == 0
                    && ctx.snapshot.insertions == 0
                    && ctx.snapshot.deletions == 0
            }
            CompletionCriterion::LoopDetection => self.detect_loop(ctx).is_loop(),
            CompletionCriterion::AgentSignal => {
                detect_completion_signal(&ctx.agent_output, &ctx.snapshot.commit_message)
            }
            // CI integration is an external collaborator out of this core's
            // scope (§1); this criterion never fires on its own.
            CompletionCriterion::CiPass => false,
        }
    }
}

impl Default for FixedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStrategy for FixedStrategy {
    fn initialize(&mut self, config: Value) -> crate::Result<()> {
        if config.is_null() {
            return Ok(());
        }
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn should_continue(&mut self, ctx: &IterationContext) -> Decision {
        if ctx.iteration >= self.config.max_iterations {
            return Decision::stop("Max iterations reached");
        }

        for criterion in &self.config.completion_criteria {
            if self.criterion_fires(*criterion, ctx) {
                return Decision::stop(format!("Completion criterion met: {criterion:?}"));
            }
        }

        Decision::continue_()
    }

    fn get_progress(&self, ctx: &IterationContext) -> f64 {
        if self.config.max_iterations == 0 {
            return 1.0;
        }
        (ctx.iteration as f64 / self.config.max_iterations as f64).min(1.0)
    }

    fn detect_loop(&self, ctx: &IterationContext) -> LoopDetectionResult {
        let count = count_matching_shas(ctx, self.config.loop_window);
        if count >= 3 {
            LoopDetectionResult {
                repeat_patterns: vec![RepeatPattern {
                    pattern_type: "exact".to_string(),
                    occurrences: count,
                }],
            }
        } else {
            LoopDetectionResult::none()
        }
    }

    fn reset(&mut self) {
        self.config = FixedConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgentIterationFields, IterationData, RunState, Snapshot, VerificationIterationFields,
        VerificationReport,
    };
    use uuid::Uuid;

    fn base_snapshot(sha: &str) -> Snapshot {
        Snapshot {
            after_sha: sha.to_string(),
            files_changed: 1,
            insertions: 1,
            deletions: 0,
            iteration: 1,
            branch: "main".to_string(),
            commit_message: "wip".to_string(),
        }
    }

    fn ctx(iteration: u32, sha: &str, history: Vec<IterationData>) -> IterationContext {
        IterationContext {
            iteration,
            state: RunState::Verifying,
            snapshot: base_snapshot(sha),
            verification: VerificationReport::empty(),
            agent_output: String::new(),
            history,
        }
    }

    fn iteration_data(n: u32, sha: &str) -> IterationData {
        let mut data = IterationData::start(Uuid::new_v4(), n, RunState::Verifying);
        data.snapshot_id = Some(sha.to_string());
        data
    }

    #[test]
    fn stops_at_max_iterations() {
        let mut strategy = FixedStrategy::new();
        strategy
            .initialize(serde_json::json!({"max_iterations": 3, "completion_criteria": []}))
            .unwrap();

        let decision = strategy.should_continue(&ctx(3, "shaC", vec![]));
        assert!(!decision.should_continue);
        assert_eq!(decision.reason, "Max iterations reached");
    }

    #[test]
    fn continues_below_max_with_no_criteria_met() {
        let mut strategy = FixedStrategy::new();
        strategy
            .initialize(serde_json::json!({"max_iterations": 5, "completion_criteria": []}))
            .unwrap();
        let decision = strategy.should_continue(&ctx(1, "sha1", vec![]));
        assert!(decision.should_continue);
    }

    #[test]
    fn exact_repeat_trips_loop_detection_at_three_occurrences() {
        let mut strategy = FixedStrategy::new();
        strategy
            .initialize(serde_json::json!({
                "max_iterations": 20,
                "completion_criteria": ["loop_detection"]
            }))
            .unwrap();

        let history = vec![iteration_data(1, "same"), iteration_data(2, "same")];
        let decision = strategy.should_continue(&ctx(3, "same", history));
        assert!(!decision.should_continue);
        assert!(decision.reason.contains("LoopDetection"));
    }

    #[test]
    fn two_repeats_do_not_trip_loop_detection() {
        let strategy = FixedStrategy::new();
        let history = vec![iteration_data(1, "same")];
        let result = strategy.detect_loop(&ctx(2, "same", history));
        assert!(!result.is_loop());
    }
}
