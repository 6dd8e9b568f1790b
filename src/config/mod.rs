use crate::constants::{
    AUTO_PROCESSOR_MIN_AVAILABLE_MEMORY, AUTO_PROCESSOR_POLL_INTERVAL_MS, DEFAULT_API_PORT,
    DEFAULT_HYBRID_BASE_ITERATIONS, DEFAULT_HYBRID_MAX_BONUS_ITERATIONS, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_MAX_SLOTS, DEFAULT_MEMORY_CRITICAL_THRESHOLD,
    DEFAULT_MEMORY_PER_SLOT_MB, DEFAULT_MEMORY_WARNING_THRESHOLD,
    DEFAULT_QUEUE_FACADE_ROLLOUT_PERCENT, DEFAULT_RALPH_CONVERGENCE_THRESHOLD,
    DEFAULT_RALPH_MIN_ITERATIONS, DEFAULT_RALPH_WINDOW_SIZE, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_RETRY_JITTER_FACTOR, DEFAULT_RETRY_MAX_DELAY_MS, DEFAULT_RETRY_MULTIPLIER,
    RESOURCE_POLL_INTERVAL_MS, SCHEDULER_POLL_INTERVAL_MS, SCHEDULER_STAGGER_DELAY_MS,
};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub resource_monitor: ResourceMonitorConfig,
    pub retry: RetryConfig,
    pub queue_facade: QueueFacadeConfig,
    pub loop_strategy: LoopStrategyConfig,
    pub auto_processor: AutoProcessorConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_slots: usize,
    pub max_queue_size: usize,
    pub priority_mode: bool,
    pub poll_interval_ms: u64,
    pub stagger_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMonitorConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub memory_per_slot_mb: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFacadeConfig {
    pub use_new_queue_system: bool,
    pub shadow_mode: bool,
    pub rollout_percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStrategyConfig {
    /// `fixed`, `hybrid`, `ralph`, or the name of a registered custom strategy.
    pub default_mode: String,
    pub custom_strategy_dir: Option<String>,
    pub ralph_window_size: usize,
    pub ralph_convergence_threshold: f64,
    pub ralph_min_iterations: u32,
    pub hybrid_base_iterations: u32,
    pub hybrid_max_bonus_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoProcessorConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub min_available_memory: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub enable_auth: bool,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::warn!("Could not load .env file: {}", e),
        }

        let scheduler = SchedulerConfig {
            max_slots: env::var("MAX_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_SLOTS),
            max_queue_size: env::var("MAX_QUEUE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
            priority_mode: env::var("SCHEDULER_PRIORITY_MODE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            poll_interval_ms: env::var("SCHEDULER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(SCHEDULER_POLL_INTERVAL_MS),
            stagger_delay_ms: env::var("SCHEDULER_STAGGER_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(SCHEDULER_STAGGER_DELAY_MS),
        };

        let resource_monitor = ResourceMonitorConfig {
            warning_threshold: env::var("MEMORY_WARNING_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MEMORY_WARNING_THRESHOLD),
            critical_threshold: env::var("MEMORY_CRITICAL_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MEMORY_CRITICAL_THRESHOLD),
            memory_per_slot_mb: env::var("MEMORY_PER_SLOT_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MEMORY_PER_SLOT_MB),
            poll_interval_ms: env::var("RESOURCE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(RESOURCE_POLL_INTERVAL_MS),
        };

        let retry = RetryConfig {
            base_delay_ms: env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay_ms: env::var("RETRY_MAX_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
            max_attempts: env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS),
            multiplier: env::var("RETRY_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_MULTIPLIER),
            jitter_factor: env::var("RETRY_JITTER_FACTOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_JITTER_FACTOR),
        };

        let queue_facade = QueueFacadeConfig {
            use_new_queue_system: env::var("QUEUE_FACADE_USE_NEW")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            shadow_mode: env::var("QUEUE_FACADE_SHADOW_MODE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            rollout_percent: env::var("QUEUE_FACADE_ROLLOUT_PERCENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_QUEUE_FACADE_ROLLOUT_PERCENT),
        };

        let loop_strategy = LoopStrategyConfig {
            default_mode: env::var("LOOP_STRATEGY_MODE").unwrap_or_else(|_| "hybrid".to_string()),
            custom_strategy_dir: env::var("LOOP_STRATEGY_CUSTOM_DIR").ok(),
            ralph_window_size: env::var("RALPH_WINDOW_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RALPH_WINDOW_SIZE),
            ralph_convergence_threshold: env::var("RALPH_CONVERGENCE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RALPH_CONVERGENCE_THRESHOLD),
            ralph_min_iterations: env::var("RALPH_MIN_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RALPH_MIN_ITERATIONS),
            hybrid_base_iterations: env::var("HYBRID_BASE_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HYBRID_BASE_ITERATIONS),
            hybrid_max_bonus_iterations: env::var("HYBRID_MAX_BONUS_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HYBRID_MAX_BONUS_ITERATIONS),
        };

        let auto_processor = AutoProcessorConfig {
            enabled: env::var("AUTO_PROCESSOR_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            poll_interval_ms: env::var("AUTO_PROCESSOR_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(AUTO_PROCESSOR_POLL_INTERVAL_MS),
            min_available_memory: env::var("AUTO_PROCESSOR_MIN_AVAILABLE_MEMORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(AUTO_PROCESSOR_MIN_AVAILABLE_MEMORY),
        };

        // SECURITY: authentication is always enforced when an API key is configured.
        let api_key = env::var("API_KEY").ok();

        match &api_key {
            Some(key) if key.trim().is_empty() => {
                tracing::error!("SECURITY ERROR: API_KEY is blank");
                tracing::error!("Set API_KEY to a secure value: openssl rand -hex 32");
                return Err(CoreError::ConfigurationError(
                    "API key is required and cannot be blank".to_string(),
                ));
            }
            None => {
                tracing::error!("SECURITY ERROR: API_KEY environment variable not set");
                tracing::error!("Generate and set API_KEY: openssl rand -hex 32");
                return Err(CoreError::ConfigurationError(
                    "API key is required for security".to_string(),
                ));
            }
            Some(key) if key.len() < 32 => {
                tracing::error!("SECURITY ERROR: API key is too short (minimum 32 characters)");
                tracing::error!("Generate a secure key with: openssl rand -hex 32");
                return Err(CoreError::ConfigurationError(
                    "API key must be at least 32 characters for security".to_string(),
                ));
            }
            Some(_) => {
                tracing::info!("API authentication configured with secure key");
            }
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_API_PORT),
            api_key,
            enable_auth: true,
            allowed_origins,
        };

        Ok(Config {
            scheduler,
            resource_monitor,
            retry,
            queue_facade,
            loop_strategy,
            auto_processor,
            api,
        })
    }
}

#[cfg(test)]
mod tests;
