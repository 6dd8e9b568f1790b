/// Input validation: the boundary between untrusted client input and the
/// rest of the system. Every rule below exists to stop a specific attack
/// class (XSS, shell/SQL injection, path traversal, DoS via oversized input).
use crate::constants::MAX_PROMPT_LENGTH;
use crate::CoreError;
use html_escape::encode_text;
use regex::Regex;
use std::collections::HashSet;

/// MAX CONTEXT KEY LENGTH: prevent malformed or malicious key names.
pub const MAX_CONTEXT_KEY_LENGTH: usize = 100;

/// MAX CONTEXT VALUE LENGTH: balance utility with resource protection.
pub const MAX_CONTEXT_VALUE_LENGTH: usize = 1000;

/// SAFE CHARACTER REGEX: allowlist approach, since a blocklist can never
/// anticipate every encoding trick.
static SAFE_PROMPT_REGEX: &str = r"^[a-zA-Z0-9\s\.,!?:;()\[\]{}\-_+=@#$%^&*|\\/<>'`~\n\r\t]+$";

/// DANGEROUS PATTERNS: known attack vectors, checked case-insensitively
/// ahead of the allowlist so obviously hostile input fails fast with a
/// clearer reason.
static DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "data:text/html",
    "vbscript:",
    "&&",
    "||",
    ";rm",
    ";del",
    "`rm",
    "`del",
    "$(rm",
    "$(del",
    "';",
    "\";",
    "union select",
    "drop table",
    "delete from",
    "../",
    "..\\",
    "file://",
    "/etc/passwd",
    "/etc/shadow",
    "C:\\Windows\\System32",
];

#[derive(Debug, Clone)]
pub struct PromptContentValidator {
    safe_content_regex: Regex,
    dangerous_patterns: HashSet<String>,
}

impl PromptContentValidator {
    pub fn new() -> crate::Result<Self> {
        let safe_content_regex = Regex::new(SAFE_PROMPT_REGEX)
            .map_err(|e| CoreError::ConfigurationError(format!("Invalid regex pattern: {e}")))?;

        let dangerous_patterns: HashSet<String> = DANGEROUS_PATTERNS
            .iter()
            .map(|s| s.to_lowercase())
            .collect();

        Ok(Self {
            safe_content_regex,
            dangerous_patterns,
        })
    }

    pub fn validate_and_sanitize_prompt(&self, content: &str) -> crate::Result<String> {
        if content.len() > MAX_PROMPT_LENGTH {
            return Err(CoreError::Validation(format!(
                "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters"
            )));
        }

        if content.trim().is_empty() {
            return Err(CoreError::Validation("Prompt cannot be empty".to_string()));
        }

        let content_lower = content.to_lowercase();
        for pattern in &self.dangerous_patterns {
            if content_lower.contains(pattern) {
                return Err(CoreError::Validation(
                    "Prompt contains potentially dangerous patterns".to_string(),
                ));
            }
        }

        if !self.safe_content_regex.is_match(content) {
            return Err(CoreError::Validation(
                "Prompt contains invalid characters".to_string(),
            ));
        }

        Ok(encode_text(content).to_string())
    }

    pub fn validate_context_key(&self, key: &str) -> crate::Result<()> {
        if key.is_empty() || key.len() > MAX_CONTEXT_KEY_LENGTH {
            return Err(CoreError::Validation(format!(
                "Context key must be non-empty and under {MAX_CONTEXT_KEY_LENGTH} characters"
            )));
        }

        if !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(CoreError::Validation(
                "Context keys can only contain alphanumeric characters and underscores"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_and_sanitize_context_value(&self, value: &str) -> crate::Result<String> {
        if value.len() > MAX_CONTEXT_VALUE_LENGTH {
            return Err(CoreError::Validation(format!(
                "Context value exceeds maximum length of {MAX_CONTEXT_VALUE_LENGTH} characters"
            )));
        }

        let value_lower = value.to_lowercase();
        for pattern in &self.dangerous_patterns {
            if value_lower.contains(pattern) {
                return Err(CoreError::Validation(
                    "Context value contains potentially dangerous patterns".to_string(),
                ));
            }
        }

        Ok(encode_text(value).to_string())
    }
}

impl Default for PromptContentValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create PromptContentValidator")
    }
}
