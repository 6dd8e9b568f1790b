//! Convergence-by-similarity strategy (§4.6, Ralph): keeps going until the
//! agent's recent outputs stop changing, as measured by pairwise Jaccard
//! similarity over a sliding window.

use super::{detect_completion_signal, Decision, LoopDetectionResult, LoopStrategy, RepeatPattern};
use crate::constants::{
    DEFAULT_RALPH_CONVERGENCE_THRESHOLD, DEFAULT_RALPH_MIN_ITERATIONS, DEFAULT_RALPH_WINDOW_SIZE,
};
use crate::models::IterationContext;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RalphConfig {
    max_iterations: u32,
    window_size: usize,
    convergence_threshold: f64,
    min_iterations: u32,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: crate::constants::DEFAULT_MAX_ITERATIONS,
            window_size: DEFAULT_RALPH_WINDOW_SIZE,
            convergence_threshold: DEFAULT_RALPH_CONVERGENCE_THRESHOLD,
            min_iterations: DEFAULT_RALPH_MIN_ITERATIONS,
        }
    }
}

fn tokenize(text: &str) -> HashSet<&str> {
    text.split_whitespace().collect()
}

fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = tokenize(a);
    let set_b = tokenize(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Sliding window of recent agent outputs plus the similarity bookkeeping
/// Ralph needs across calls to `shouldContinue`. Strategies are
/// single-run-owned, so this interior state never crosses runs.
pub struct RalphStrategy {
    config: RalphConfig,
    window: VecDeque<String>,
}

impl RalphStrategy {
    pub fn new() -> Self {
        Self {
            config: RalphConfig::default(),
            window: VecDeque::new(),
        }
    }

    fn push_output(&mut self, output: &str) {
        self.window.push_back(output.to_string());
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }

    /// True if any pair in the window has similarity at or above
    /// `1 - convergenceThreshold`.
    fn window_converged(&self) -> bool {
        if self.window.len() < 2 {
            return false;
        }
        let floor = 1.0 - self.config.convergence_threshold;
        let items: Vec<&String> = self.window.iter().collect();
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if jaccard_similarity(items[i], items[j]) >= floor {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for RalphStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStrategy for RalphStrategy {
    fn initialize(&mut self, config: Value) -> crate::Result<()> {
        if config.is_null() {
            return Ok(());
        }
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn should_continue(&mut self, ctx: &IterationContext) -> Decision {
        self.push_output(&ctx.agent_output);

        if ctx.iteration >= self.config.max_iterations {
            return Decision::stop("Max iterations reached");
        }

        if ctx.iteration < self.config.min_iterations {
            return Decision::continue_();
        }

        if ctx.verification.passed {
            return Decision::stop("Verification passed");
        }

        if detect_completion_signal(&ctx.agent_output, &ctx.snapshot.commit_message) {
            return Decision::stop("Agent signaled completion");
        }

        if self.window_converged() {
            return Decision::stop("Loop detected via output similarity");
        }

        Decision::continue_()
    }

    fn get_progress(&self, ctx: &IterationContext) -> f64 {
        if self.config.max_iterations == 0 {
            return 1.0;
        }
        (ctx.iteration as f64 / self.config.max_iterations as f64).min(1.0)
    }

    fn detect_loop(&self, _ctx: &IterationContext) -> LoopDetectionResult {
        if self.window_converged() {
            LoopDetectionResult {
                repeat_patterns: vec![RepeatPattern {
                    pattern_type: "convergence".to_string(),
                    occurrences: self.window.len(),
                }],
            }
        } else {
            LoopDetectionResult::none()
        }
    }

    fn reset(&mut self) {
        self.config = RalphConfig::default();
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunState, Snapshot, VerificationReport};

    fn ctx(iteration: u32, agent_output: &str, passed: bool) -> IterationContext {
        IterationContext {
            iteration,
            state: RunState::Verifying,
            snapshot: Snapshot {
                after_sha: "sha".to_string(),
                files_changed: 1,
                insertions: 1,
                deletions: 0,
                iteration,
                branch: "main".to_string(),
                commit_message: String::new(),
            },
            verification: VerificationReport {
                levels: vec![],
                passed,
                diagnostics: vec![],
                duration_ms: 0,
            },
            agent_output: agent_output.to_string(),
            history: vec![],
        }
    }

    #[test]
    fn jaccard_identical_strings_is_one() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
    }

    #[test]
    fn jaccard_disjoint_strings_is_zero() {
        assert_eq!(jaccard_similarity("a b c", "d e f"), 0.0);
    }

    #[test]
    fn min_iterations_gate_forces_continue_even_on_signal() {
        let mut strategy = RalphStrategy::new();
        strategy
            .initialize(serde_json::json!({"min_iterations": 3, "max_iterations": 10}))
            .unwrap();
        let decision = strategy.should_continue(&ctx(1, "TASK_COMPLETE", false));
        assert!(decision.should_continue);
    }

    #[test]
    fn converged_window_stops_the_loop() {
        let mut strategy = RalphStrategy::new();
        strategy
            .initialize(serde_json::json!({
                "min_iterations": 1,
                "max_iterations": 10,
                "window_size": 3,
                "convergence_threshold": 0.1
            }))
            .unwrap();

        strategy.should_continue(&ctx(1, "refactor module a into smaller pieces", false));
        let decision = strategy.should_continue(&ctx(2, "refactor module a into smaller pieces", false));
        assert!(!decision.should_continue);
        assert_eq!(decision.reason, "Loop detected via output similarity");
    }

    #[test]
    fn stops_at_max_iterations_regardless_of_convergence() {
        let mut strategy = RalphStrategy::new();
        strategy
            .initialize(serde_json::json!({"max_iterations": 2, "min_iterations": 1}))
            .unwrap();
        let decision = strategy.should_continue(&ctx(2, "anything new and different", false));
        assert!(!decision.should_continue);
        assert_eq!(decision.reason, "Max iterations reached");
    }
}
