use crate::models::{HarnessProfile, VerificationLevel};
use crate::CoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Resolves a work order's `harness_profile_ref` into the concrete agent
/// binary/args/verification-level bundle that drives its runs. The real
/// system configures these from YAML files on disk; this is the
/// in-process stand-in named in the Open Questions.
#[async_trait]
pub trait HarnessProfileRegistry: Send + Sync {
    async fn get(&self, name: &str) -> crate::Result<HarnessProfile>;
    async fn register(&self, profile: HarnessProfile) -> crate::Result<()>;
    async fn list(&self) -> Vec<String>;
}

pub struct InMemoryHarnessProfileRegistry {
    profiles: RwLock<HashMap<String, HarnessProfile>>,
}

impl InMemoryHarnessProfileRegistry {
    pub fn new() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            HarnessProfile {
                name: "default".to_string(),
                agent_binary: "/usr/local/bin/agent-cli".to_string(),
                agent_args: Vec::new(),
                verification_levels: vec![
                    VerificationLevel::L0,
                    VerificationLevel::L1,
                    VerificationLevel::L2,
                ],
                default_max_iterations: 10,
            },
        );

        Self {
            profiles: RwLock::new(profiles),
        }
    }
}

impl Default for InMemoryHarnessProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HarnessProfileRegistry for InMemoryHarnessProfileRegistry {
    async fn get(&self, name: &str) -> crate::Result<HarnessProfile> {
        self.profiles
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("harness profile '{name}'")))
    }

    async fn register(&self, profile: HarnessProfile) -> crate::Result<()> {
        self.profiles.write().await.insert(profile.name.clone(), profile);
        Ok(())
    }

    async fn list(&self) -> Vec<String> {
        self.profiles.read().await.keys().cloned().collect()
    }
}
