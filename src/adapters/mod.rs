//! External collaborators the orchestrator depends on through narrow
//! traits: running an agent, verifying its output, snapshotting a
//! workspace, and persisting state. Each trait has one production
//! implementation here; tests substitute in-memory fakes.

pub mod agent_runner;
pub mod harness_profile;
pub mod persistence;
pub mod verification_runner;
pub mod workspace_store;

pub use agent_runner::{AgentRunner, AgentRunOutcome, CliAgentRunner};
pub use harness_profile::{HarnessProfileRegistry, InMemoryHarnessProfileRegistry};
pub use persistence::{JsonFilePersistence, Persistence, PersistenceExt};
pub use verification_runner::{ShellVerificationRunner, VerificationRunner};
pub use workspace_store::{FsWorkspaceStore, WorkspaceStore};
