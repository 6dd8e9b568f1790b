//! # Agentgate Core
//!
//! Agentgate Core is the execution control plane for bounded-concurrency AI
//! agent work orders. A work order describes a prompt and a workspace; the
//! orchestrator drives it through repeated agent/verify iterations under a
//! scheduler that caps concurrent execution by available slots and system
//! memory pressure.
//!
//! ## Architecture
//!
//! - **Scheduler + Resource Monitor**: admits queued work orders onto a
//!   bounded pool of execution slots, backing off under memory pressure
//! - **Orchestrator**: drives the snapshot -> agent -> verify -> decide loop
//!   for a single work order's run
//! - **Loop strategies**: pluggable continue/stop policies (fixed-iteration,
//!   hybrid progress-based, ralph-style, custom)
//! - **Event broadcaster**: fans out run/iteration events to HTTP SSE and
//!   WebSocket subscribers
//! - **External collaborators**: agent execution, verification, workspace
//!   snapshotting and persistence are all behind small traits so the
//!   concrete backends are swappable without touching control-plane logic
//!
//! ## Usage
//!
//! The system is run as a standalone HTTP service; clients submit work
//! orders and follow their progress through polling, SSE or WebSocket.

/// External collaborator traits and their default implementations
/// (agent runner, verification runner, workspace store, persistence).
pub mod adapters;
/// HTTP API server and endpoints.
pub mod api;
/// Authentication and authorization.
pub mod auth;
/// Cooperative cancellation shared across runners and the orchestrator.
pub mod cancel;
/// System configuration.
pub mod config;
/// System-wide constants.
pub mod constants;
/// Scheduling, orchestration and the work-order lifecycle.
pub mod core;
/// Error types and handling.
pub mod error;
/// Core data models.
pub mod models;
/// Host resource sampling (memory pressure) used by the resource monitor.
pub mod monitoring;
/// Rate limiting functionality.
pub mod rate_limit;
/// Security utilities and API key management.
pub mod security;
/// Input validation and sanitization.
pub mod validation;

#[cfg(test)]
mod tests;

pub use error::{CoreError, Result};
