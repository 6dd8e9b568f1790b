use crate::models::{LevelResult, VerificationLevel, VerificationReport};
use crate::CoreError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;

/// Runs the configured verification levels against a workspace snapshot
/// and reports pass/fail per level.
#[async_trait]
pub trait VerificationRunner: Send + Sync {
    async fn verify(
        &self,
        workspace_path: &Path,
        levels: &[VerificationLevel],
    ) -> crate::Result<VerificationReport>;
}

/// Runs each level as a shell command resolved from a fixed convention:
/// `L0` lints, `L1` builds, `L2` runs the unit test suite, `L3` runs any
/// integration/acceptance suite. A workspace opts out of a level simply by
/// not having the corresponding script.
pub struct ShellVerificationRunner {
    commands: Vec<(VerificationLevel, Vec<String>)>,
}

impl ShellVerificationRunner {
    pub fn new() -> Self {
        Self {
            commands: vec![
                (VerificationLevel::L0, vec!["true".to_string()]),
                (
                    VerificationLevel::L1,
                    vec!["cargo".to_string(), "check".to_string()],
                ),
                (
                    VerificationLevel::L2,
                    vec!["cargo".to_string(), "test".to_string()],
                ),
                (
                    VerificationLevel::L3,
                    vec!["cargo".to_string(), "test".to_string(), "--release".to_string()],
                ),
            ],
        }
    }

    /// Overrides the command used for a given level, e.g. to point L0 at a
    /// project's actual lint command instead of the `true` placeholder.
    pub fn with_command(mut self, level: VerificationLevel, command: Vec<String>) -> Self {
        if let Some(entry) = self.commands.iter_mut().find(|(l, _)| *l == level) {
            entry.1 = command;
        } else {
            self.commands.push((level, command));
        }
        self
    }

    fn command_for(&self, level: VerificationLevel) -> Option<&[String]> {
        self.commands
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, cmd)| cmd.as_slice())
    }
}

impl Default for ShellVerificationRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VerificationRunner for ShellVerificationRunner {
    async fn verify(
        &self,
        workspace_path: &Path,
        levels: &[VerificationLevel],
    ) -> crate::Result<VerificationReport> {
        let overall_start = Instant::now();
        let mut level_results = Vec::with_capacity(levels.len());
        let mut diagnostics = Vec::new();
        let mut all_passed = true;

        for level in levels {
            let Some(cmd) = self.command_for(*level) else {
                diagnostics.push(format!("no command configured for level {level:?}, skipping"));
                continue;
            };

            let start = Instant::now();
            let (program, args) = cmd
                .split_first()
                .ok_or_else(|| CoreError::VerificationRunner("empty verification command".into()))?;

            let output = Command::new(program)
                .args(args)
                .current_dir(workspace_path)
                .output()
                .await
                .map_err(|e| {
                    CoreError::VerificationRunner(format!("failed to run {level:?} check: {e}"))
                })?;

            let passed = output.status.success();
            if !passed {
                all_passed = false;
                diagnostics.push(String::from_utf8_lossy(&output.stderr).into_owned());
            }

            level_results.push(LevelResult {
                level: *level,
                passed,
                checks: vec![cmd.join(" ")],
                duration_ms: start.elapsed().as_millis() as u64,
            });

            if !passed {
                break;
            }
        }

        Ok(VerificationReport {
            levels: level_results,
            passed: all_passed,
            diagnostics,
            duration_ms: overall_start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_unconfigured_level() {
        let runner = ShellVerificationRunner::new().with_command(
            VerificationLevel::L0,
            vec!["true".to_string()],
        );
        let report = runner
            .verify(Path::new("."), &[VerificationLevel::L0])
            .await
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.levels.len(), 1);
    }

    #[tokio::test]
    async fn reports_failure_and_stops() {
        let runner = ShellVerificationRunner::new()
            .with_command(VerificationLevel::L0, vec!["false".to_string()])
            .with_command(VerificationLevel::L1, vec!["true".to_string()]);
        let report = runner
            .verify(
                Path::new("."),
                &[VerificationLevel::L0, VerificationLevel::L1],
            )
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.levels.len(), 1, "should stop at first failing level");
    }
}
