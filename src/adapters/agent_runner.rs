pub mod circuit_breaker;
pub mod command_builder;

use crate::cancel::CancelToken;
use crate::models::HarnessProfile;
use crate::CoreError;
use async_trait::async_trait;
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use command_builder::AgentCommandBuilder;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, warn};

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

/// The `--output-format json` contract [`AgentCommandBuilder::with_json_output`]
/// requests from the agent binary. Every field is optional so a binary that
/// emits partial or malformed JSON on stdout still degrades to the process
/// exit code and raw output rather than failing the iteration outright.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentCliResponse {
    success: Option<bool>,
    #[serde(alias = "sessionId")]
    session_id: Option<String>,
    model: Option<String>,
    #[serde(alias = "tokensIn")]
    tokens_in: Option<u64>,
    #[serde(alias = "tokensOut")]
    tokens_out: Option<u64>,
    #[serde(alias = "costUsd")]
    cost_usd: Option<f64>,
    output: Option<String>,
}

/// Runs a single agent iteration against a workspace. Implementations own
/// the concrete agent binary and its invocation protocol; the orchestrator
/// only ever sees [`AgentRunOutcome`].
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_iteration(
        &self,
        profile: &HarnessProfile,
        workspace_path: &Path,
        prompt: &str,
        session_id: Option<&str>,
        cancel: &CancelToken,
    ) -> crate::Result<AgentRunOutcome>;
}

/// Invokes the harness's agent binary as a subprocess, guarded by a
/// circuit breaker so a binary that is reliably crashing stops being
/// retried on every admitted work order.
pub struct CliAgentRunner {
    circuit_breaker: Arc<CircuitBreaker>,
    default_timeout_seconds: u32,
}

impl CliAgentRunner {
    pub fn new(default_timeout_seconds: u32) -> Self {
        Self {
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
            default_timeout_seconds,
        }
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.circuit_breaker)
    }

    async fn run_child(&self, mut child: Child, prompt: &str) -> crate::Result<(bool, String, String)> {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| CoreError::AgentRunner(format!("failed writing prompt: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CoreError::AgentRunner(format!("agent process failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        Ok((output.status.success(), stdout, stderr))
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn run_iteration(
        &self,
        profile: &HarnessProfile,
        workspace_path: &Path,
        prompt: &str,
        session_id: Option<&str>,
        cancel: &CancelToken,
    ) -> crate::Result<AgentRunOutcome> {
        if !self.circuit_breaker.should_allow_request().await {
            return Err(CoreError::AgentRunner(
                "agent circuit breaker is open".to_string(),
            ));
        }

        let mut builder = AgentCommandBuilder::new(&profile.agent_binary)
            .with_extra_args(profile.agent_args.clone())
            .with_json_output()
            .with_workspace(workspace_path)
            .with_timeout(self.default_timeout_seconds);

        builder = match session_id {
            Some(id) => builder.with_session_id(id),
            None => builder.with_new_session(),
        };

        if let Err(e) = builder.validate() {
            self.circuit_breaker.record_failure().await;
            return Err(CoreError::AgentRunner(format!("invalid command: {e}")));
        }

        let mut command = builder.build();
        let child = command
            .spawn()
            .map_err(|e| CoreError::AgentRunner(format!("failed to spawn agent binary: {e}")))?;

        let timeout = Duration::from_secs(self.default_timeout_seconds as u64);
        let run = self.run_child(child, prompt);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("agent iteration cancelled before completion");
                self.circuit_breaker.record_failure().await;
                return Err(CoreError::AgentRunner("cancelled".to_string()));
            }
            res = tokio::time::timeout(timeout, run) => res,
        };

        let (exit_success, stdout, stderr) = match result {
            Ok(Ok(triple)) => triple,
            Ok(Err(e)) => {
                self.circuit_breaker.record_failure().await;
                return Err(e);
            }
            Err(_) => {
                warn!("agent iteration timed out after {}s", self.default_timeout_seconds);
                self.circuit_breaker.record_failure().await;
                return Err(CoreError::AgentRunner("agent invocation timed out".to_string()));
            }
        };

        // The binary was asked for `--output-format json`; a conformant
        // agent emits the AgentResult contract on stdout. A binary that
        // doesn't (or emits malformed JSON) degrades to the exit code and
        // raw combined output rather than failing the iteration.
        let parsed: Option<AgentCliResponse> = serde_json::from_str(stdout.trim()).ok();

        let success = parsed.as_ref().and_then(|r| r.success).unwrap_or(exit_success);
        if success {
            self.circuit_breaker.record_success().await;
        } else {
            self.circuit_breaker.record_failure().await;
        }

        let output = parsed
            .as_ref()
            .and_then(|r| r.output.clone())
            .unwrap_or_else(|| if exit_success { stdout } else { format!("{stdout}{stderr}") });

        Ok(AgentRunOutcome {
            success,
            output,
            session_id: parsed
                .as_ref()
                .and_then(|r| r.session_id.clone())
                .or_else(|| session_id.map(|s| s.to_string())),
            model: parsed.as_ref().and_then(|r| r.model.clone()),
            tokens_in: parsed.as_ref().and_then(|r| r.tokens_in).unwrap_or(0),
            tokens_out: parsed.as_ref().and_then(|r| r.tokens_out).unwrap_or(0),
            cost_usd: parsed.as_ref().and_then(|r| r.cost_usd).unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runner_rejects_when_circuit_open() {
        let runner = CliAgentRunner::new(1);
        for _ in 0..5 {
            runner.circuit_breaker.record_failure().await;
        }
        let profile = HarnessProfile {
            name: "test".to_string(),
            agent_binary: "/bin/false".to_string(),
            agent_args: vec![],
            verification_levels: vec![],
            default_max_iterations: 1,
        };
        let cancel = CancelToken::new();
        let result = runner
            .run_iteration(&profile, Path::new("/tmp"), "hi", None, &cancel)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn cli_response_accepts_camel_case_field_names() {
        let raw = r#"{"success":true,"sessionId":"sess-9","model":"claude","tokensIn":100,"tokensOut":50,"costUsd":0.02,"output":"done"}"#;
        let parsed: AgentCliResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.session_id.as_deref(), Some("sess-9"));
        assert_eq!(parsed.tokens_in, Some(100));
        assert_eq!(parsed.tokens_out, Some(50));
        assert_eq!(parsed.cost_usd, Some(0.02));
        assert_eq!(parsed.output.as_deref(), Some("done"));
    }

    #[test]
    fn cli_response_tolerates_missing_fields() {
        let parsed: AgentCliResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(parsed.success, Some(true));
        assert!(parsed.session_id.is_none());
        assert!(parsed.tokens_in.is_none());
    }
}
