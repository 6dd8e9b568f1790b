//! Base iterations plus a bonus budget that only pays out while verification
//! keeps climbing levels (§4.6, Hybrid). The default strategy (§9).

use super::{Decision, LoopDetectionResult, LoopStrategy, RepeatPattern};
use crate::constants::{DEFAULT_HYBRID_BASE_ITERATIONS, DEFAULT_HYBRID_MAX_BONUS_ITERATIONS};
use crate::models::{IterationContext, VerificationLevel};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HybridConfig {
    base_iterations: u32,
    max_bonus_iterations: u32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            base_iterations: DEFAULT_HYBRID_BASE_ITERATIONS,
            max_bonus_iterations: DEFAULT_HYBRID_MAX_BONUS_ITERATIONS,
        }
    }
}

/// A fingerprint built from the snapshot sha plus sorted diagnostics, so two
/// iterations that land on the same commit but emit different verification
/// complaints aren't mistaken for a stalled loop.
fn fingerprint(ctx: &IterationContext) -> String {
    let mut diagnostics: Vec<&str> = ctx
        .verification
        .diagnostics
        .iter()
        .map(String::as_str)
        .collect();
    diagnostics.sort_unstable();
    format!("{}|{}", ctx.snapshot.after_sha, diagnostics.join(","))
}

pub struct HybridStrategy {
    config: HybridConfig,
}

impl HybridStrategy {
    pub fn new() -> Self {
        Self {
            config: HybridConfig::default(),
        }
    }

    fn max_iterations(&self) -> u32 {
        self.config.base_iterations + self.config.max_bonus_iterations
    }

    /// True if this iteration's highest passed verification level exceeds
    /// the best level any prior iteration in this run reached.
    fn made_progress(&self, ctx: &IterationContext) -> bool {
        let best_in_history: Option<VerificationLevel> = ctx
            .history
            .iter()
            .filter_map(|entry| entry.verification.highest_passed_level)
            .max();

        match (ctx.verification.highest_passed_level(), best_in_history) {
            (Some(current), Some(prior)) => current > prior,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopStrategy for HybridStrategy {
    fn initialize(&mut self, config: Value) -> crate::Result<()> {
        if config.is_null() {
            return Ok(());
        }
        self.config = serde_json::from_value(config)?;
        Ok(())
    }

    fn should_continue(&mut self, ctx: &IterationContext) -> Decision {
        if ctx.verification.passed {
            return Decision::stop("Verification passed");
        }

        let loop_detected = self.detect_loop(ctx).is_loop();
        if loop_detected {
            return Decision::stop("Loop detected");
        }

        if ctx.iteration >= self.max_iterations() {
            if self.made_progress(ctx) {
                return Decision::stop_with_partial_accept(
                    "Max iterations reached with progress",
                );
            }
            return Decision::stop("Max iterations reached");
        }

        if ctx.iteration >= self.config.base_iterations && !self.made_progress(ctx) {
            return Decision::stop("Base iterations exhausted with no progress");
        }

        Decision::continue_()
    }

    fn get_progress(&self, ctx: &IterationContext) -> f64 {
        let max = self.max_iterations();
        if max == 0 {
            return 1.0;
        }
        (ctx.iteration as f64 / max as f64).min(1.0)
    }

    fn detect_loop(&self, ctx: &IterationContext) -> LoopDetectionResult {
        let current = fingerprint(ctx);
        let count = 1 + ctx
            .history
            .iter()
            .rev()
            .take(5)
            .filter(|entry| {
                entry.snapshot_id.as_deref() == Some(ctx.snapshot.after_sha.as_str())
                    && {
                        let mut diags: Vec<&str> =
                            entry.verification.diagnostics.iter().map(String::as_str).collect();
                        diags.sort_unstable();
                        let entry_fp = format!(
                            "{}|{}",
                            entry.snapshot_id.as_deref().unwrap_or_default(),
                            diags.join(",")
                        );
                        entry_fp == current
                    }
            })
            .count();

        if count >= 3 {
            LoopDetectionResult {
                repeat_patterns: vec![RepeatPattern {
                    pattern_type: "composite".to_string(),
                    occurrences: count,
                }],
            }
        } else {
            LoopDetectionResult::none()
        }
    }

    fn reset(&mut self) {
        self.config = HybridConfig::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IterationData, RunState, Snapshot, VerificationReport};
    use uuid::Uuid;

    fn snapshot(sha: &str) -> Snapshot {
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

    fn ctx(iteration: u32, sha: &str, passed: bool, history: Vec<IterationData>) -> IterationContext {
        IterationContext {
            iteration,
            state: RunState::Verifying,
            snapshot: snapshot(sha),
            verification: VerificationReport {
                levels: vec![],
                passed,
                diagnostics: vec![],
                duration_ms: 0,
            },
            agent_output: String::new(),
            history,
        }
    }

    #[test]
    fn stops_when_verification_passes() {
        let mut strategy = HybridStrategy::new();
        let decision = strategy.should_continue(&ctx(1, "sha1", true, vec![]));
        assert!(!decision.should_continue);
    }

    #[test]
    fn continues_within_base_budget() {
        let mut strategy = HybridStrategy::new();
        strategy
            .initialize(serde_json::json!({"base_iterations": 5, "max_bonus_iterations": 3}))
            .unwrap();
        let decision = strategy.should_continue(&ctx(2, "sha2", false, vec![]));
        assert!(decision.should_continue);
    }

    #[test]
    fn stops_at_base_without_progress() {
        let mut strategy = HybridStrategy::new();
        strategy
            .initialize(serde_json::json!({"base_iterations": 2, "max_bonus_iterations": 3}))
            .unwrap();
        let decision = strategy.should_continue(&ctx(2, "sha2", false, vec![]));
        assert!(!decision.should_continue);
        assert!(!decision.is_partial_accept());
    }

    #[test]
    fn grants_partial_accept_at_max_with_progress() {
        let mut strategy = HybridStrategy::new();
        strategy
            .initialize(serde_json::json!({"base_iterations": 1, "max_bonus_iterations": 1}))
            .unwrap();

        let mut prior = IterationData::start(Uuid::new_v4(), 1, RunState::Verifying);
        prior.verification.highest_passed_level = Some(VerificationLevel::L0);

        let mut current = ctx(2, "sha2", false, vec![prior]);
        current.verification.levels = vec![crate::models::LevelResult {
            level: VerificationLevel::L1,
            passed: true,
            checks: vec![],
            duration_ms: 0,
        }];

        let decision = strategy.should_continue(&current);
        assert!(!decision.should_continue);
        assert!(decision.is_partial_accept());
    }
}
