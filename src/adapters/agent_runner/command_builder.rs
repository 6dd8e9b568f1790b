use std::path::PathBuf;
use tokio::process::Command;

/// Fluent interface for constructing the subprocess invocation of an
/// external agent binary. The flag set here is the lowest common
/// denominator across the CLI coding-agent binaries a [`HarnessProfile`]
/// can point at (json/text/markdown output, a permission mode, session
/// resume/continue, a tool allowlist, workspace/timeout/env).
///
/// [`HarnessProfile`]: crate::models::HarnessProfile
///
/// # Example
/// ```rust
/// use agentgate_core::adapters::agent_runner::command_builder::AgentCommandBuilder;
/// let command = AgentCommandBuilder::new("/usr/local/bin/agent-cli")
///     .with_json_output()
///     .with_permission_mode("bypassPermissions")
///     .with_session_id("abc123")
///     .with_allowed_tools(vec!["Read", "Write", "Edit"])
///     .with_workspace("/tmp/workspace")
///     .with_timeout(300)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct AgentCommandBuilder {
    binary_path: String,
    extra_args: Vec<String>,
    output_format: OutputFormat,
    permission_mode: PermissionMode,
    session_mode: SessionMode,
    allowed_tools: Vec<String>,
    workspace: Option<PathBuf>,
    additional_dirs: Vec<PathBuf>,
    timeout_seconds: Option<u32>,
    environment_vars: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Json,
    Text,
    Markdown,
}

/// Security level requested of the agent process.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionMode {
    Standard,
    BypassPermissions,
    Restricted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMode {
    NewSession,
    Resume(String),
    Continue,
}

impl AgentCommandBuilder {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            extra_args: Vec::new(),
            output_format: OutputFormat::Json,
            permission_mode: PermissionMode::Standard,
            session_mode: SessionMode::NewSession,
            allowed_tools: Vec::new(),
            workspace: None,
            additional_dirs: Vec::new(),
            timeout_seconds: None,
            environment_vars: Vec::new(),
        }
    }

    /// Static args carried by the harness profile, passed through verbatim
    /// ahead of everything this builder adds.
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.output_format = OutputFormat::Json;
        self
    }

    pub fn with_text_output(mut self) -> Self {
        self.output_format = OutputFormat::Text;
        self
    }

    pub fn with_markdown_output(mut self) -> Self {
        self.output_format = OutputFormat::Markdown;
        self
    }

    pub fn with_permission_mode(mut self, mode: impl Into<PermissionMode>) -> Self {
        self.permission_mode = mode.into();
        self
    }

    pub fn with_standard_permissions(mut self) -> Self {
        self.permission_mode = PermissionMode::Standard;
        self
    }

    pub fn with_bypass_permissions(mut self) -> Self {
        // Crosses a real security boundary - log with enough context to audit later.
        tracing::warn!(
            "bypassPermissions mode activated in command builder, workspace: {:?}",
            self.workspace
        );
        self.permission_mode = PermissionMode::BypassPermissions;
        self
    }

    pub fn with_session_mode(mut self, mode: SessionMode) -> Self {
        self.session_mode = mode;
        self
    }

    pub fn with_new_session(mut self) -> Self {
        self.session_mode = SessionMode::NewSession;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_mode = SessionMode::Resume(session_id.into());
        self
    }

    pub fn with_continue_session(mut self) -> Self {
        self.session_mode = SessionMode::Continue;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<impl Into<String>>) -> Self {
        self.allowed_tools = tools.into_iter().map(|t| t.into()).collect();
        self
    }

    pub fn add_allowed_tool(mut self, tool: impl Into<String>) -> Self {
        self.allowed_tools.push(tool.into());
        self
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    pub fn add_allowed_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.additional_dirs.push(path.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_vars.push((key.into(), value.into()));
        self
    }

    /// Builds the subprocess command. Returns `tokio::process::Command` so
    /// the caller can spawn and wire stdin/stdout directly into the async
    /// runtime without an intermediate representation.
    pub fn build(self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.args(&self.extra_args);

        command.arg("--print");

        command.args([
            "--output-format",
            match self.output_format {
                OutputFormat::Json => "json",
                OutputFormat::Text => "text",
                OutputFormat::Markdown => "markdown",
            },
        ]);

        command.args([
            "--permission-mode",
            match self.permission_mode {
                PermissionMode::Standard => "default",
                PermissionMode::BypassPermissions => "bypassPermissions",
                PermissionMode::Restricted => "restricted",
            },
        ]);

        match self.session_mode {
            SessionMode::NewSession => {}
            SessionMode::Resume(ref session_id) => {
                command.args(["--resume", session_id]);
            }
            SessionMode::Continue => {
                command.arg("--continue");
            }
        }

        if !self.allowed_tools.is_empty() {
            command.args(["--allowed-tools", &self.allowed_tools.join(",")]);
        }

        if let Some(ref workspace) = self.workspace {
            command.current_dir(workspace);
            command.args(["--add-dir", &workspace.to_string_lossy()]);
        }

        for dir in &self.additional_dirs {
            command.args(["--add-dir", &dir.to_string_lossy()]);
        }

        if let Some(timeout) = self.timeout_seconds {
            command.args(["--timeout", &timeout.to_string()]);
        }

        for (key, value) in &self.environment_vars {
            command.env(key, value);
        }

        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        command
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.binary_path.is_empty() {
            return Err("Binary path cannot be empty".to_string());
        }

        if matches!(self.session_mode, SessionMode::Resume(ref id) if id.is_empty()) {
            return Err("Session ID cannot be empty when resuming".to_string());
        }

        for tool in &self.allowed_tools {
            if tool.is_empty() {
                return Err("Tool name cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

impl From<&str> for PermissionMode {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "standard" | "default" => PermissionMode::Standard,
            "bypasspermissions" | "bypass" => PermissionMode::BypassPermissions,
            "restricted" => PermissionMode::Restricted,
            _ => PermissionMode::Standard,
        }
    }
}

impl From<String> for PermissionMode {
    fn from(s: String) -> Self {
        PermissionMode::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_command_building() {
        let builder = AgentCommandBuilder::new("/usr/local/bin/agent-cli")
            .with_json_output()
            .with_standard_permissions();

        let output_format = builder.output_format.clone();
        let permission_mode = builder.permission_mode.clone();
        let _command = builder.build();

        assert_eq!(output_format, OutputFormat::Json);
        assert_eq!(permission_mode, PermissionMode::Standard);
    }

    #[test]
    fn test_session_configuration() {
        let builder =
            AgentCommandBuilder::new("/usr/local/bin/agent-cli").with_session_id("test-123");

        assert_eq!(
            builder.session_mode,
            SessionMode::Resume("test-123".to_string())
        );
    }

    #[test]
    fn test_tool_configuration() {
        let builder = AgentCommandBuilder::new("/usr/local/bin/agent-cli")
            .with_allowed_tools(vec!["Read", "Write"])
            .add_allowed_tool("Edit");

        assert_eq!(builder.allowed_tools, vec!["Read", "Write", "Edit"]);
    }

    #[test]
    fn test_validation() {
        let valid = AgentCommandBuilder::new("/usr/local/bin/agent-cli");
        assert!(valid.validate().is_ok());

        let invalid = AgentCommandBuilder::new("");
        assert!(invalid.validate().is_err());

        let invalid = AgentCommandBuilder::new("/usr/local/bin/agent-cli").with_session_id("");
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_permission_mode_conversion() {
        assert_eq!(PermissionMode::from("standard"), PermissionMode::Standard);
        assert_eq!(
            PermissionMode::from("bypass"),
            PermissionMode::BypassPermissions
        );
        assert_eq!(
            PermissionMode::from("RESTRICTED"),
            PermissionMode::Restricted
        );
        assert_eq!(PermissionMode::from("unknown"), PermissionMode::Standard);
    }
}
