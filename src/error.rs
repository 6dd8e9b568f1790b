use thiserror::Error;

/// Convenience alias for Results using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Crate-wide error type.
///
/// Groups the structured error taxonomy from the error-handling design
/// (illegal transitions, strategy registry failures, queue admission
/// failures) alongside the usual `#[from]` conversions for the ambient
/// stack (config loading, serialization, anything routed through `anyhow`).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Strategy not found: {mode}. Available: {available:?}")]
    StrategyNotFound { mode: String, available: Vec<String> },

    #[error("Strategy already registered: {mode}")]
    DuplicateStrategy { mode: String },

    #[error("Failed to load custom strategy from {path}: {message}")]
    CustomStrategyLoad { path: String, message: String },

    #[error("Custom strategy not found: {path}")]
    CustomStrategyNotFound { path: String },

    #[error("Custom strategy invalid: {path}: {message}")]
    CustomStrategyInvalid { path: String, message: String },

    #[error("Queue is full (depth={depth})")]
    QueueFull { depth: usize },

    #[error("Work order already enqueued: {id}")]
    AlreadyEnqueued { id: String },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent runner error: {0}")]
    AgentRunner(String),

    #[error("Verification runner error: {0}")]
    VerificationRunner(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Maps to the `code` field of the HTTP error envelope (see §6/§7).
    pub fn api_code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) | CoreError::ConfigurationError(_) => "BAD_REQUEST",
            CoreError::Unauthorized => "UNAUTHORIZED",
            CoreError::NotFound(_) | CoreError::CustomStrategyNotFound { .. } => "NOT_FOUND",
            CoreError::Conflict(_)
            | CoreError::IllegalTransition { .. }
            | CoreError::QueueFull { .. }
            | CoreError::AlreadyEnqueued { .. } => "CONFLICT",
            CoreError::ServiceUnavailable(_) | CoreError::ResourceExhausted { .. } => {
                "SERVICE_UNAVAILABLE"
            }
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.api_code() {
            "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "SERVICE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
