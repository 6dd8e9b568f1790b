//! Custom strategies (§4.6, §9). The original system loads strategy code
//! from disk at a configured path; nothing in this workspace's dependency
//! stack does dynamic code loading, so a custom strategy here is instead a
//! named factory registered in-process ahead of time and looked up by the
//! same path string a work order would have pointed at a file.

use super::{Decision, LoopDetectionResult, LoopStrategy};
use crate::CoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn LoopStrategy> + Send + Sync>;

/// Maps a registered path to the factory that builds a fresh strategy
/// instance for it. Shared across runs; each run gets its own boxed
/// instance so interior state (e.g. Ralph's output window) never leaks
/// across work orders.
#[derive(Clone)]
pub struct CustomStrategyLoader {
    factories: Arc<Mutex<HashMap<String, StrategyFactory>>>,
}

impl CustomStrategyLoader {
    pub fn new() -> Self {
        Self {
            factories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn register(&self, path: impl Into<String>, factory: StrategyFactory) {
        self.factories.lock().unwrap().insert(path.into(), factory);
    }

    pub fn load(&self, path: &str) -> crate::Result<Box<dyn LoopStrategy>> {
        let factories = self.factories.lock().unwrap();
        match factories.get(path) {
            Some(factory) => Ok(factory()),
            None => Err(CoreError::CustomStrategyNotFound {
                path: path.to_string(),
            }),
        }
    }
}

impl Default for CustomStrategyLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Delegates every [`LoopStrategy`] call to a strategy resolved from a
/// [`CustomStrategyLoader`] on `initialize`. The `path` field of the config
/// value selects which registered factory to use; the remainder (`config`)
/// is forwarded to the loaded strategy's own `initialize`.
pub struct CustomStrategy {
    loader: CustomStrategyLoader,
    inner: Option<Box<dyn LoopStrategy>>,
}

impl CustomStrategy {
    pub fn new(loader: CustomStrategyLoader) -> Self {
        Self {
            loader,
            inner: None,
        }
    }

    fn inner_mut(&mut self) -> crate::Result<&mut Box<dyn LoopStrategy>> {
        self.inner.as_mut().ok_or_else(|| CoreError::CustomStrategyInvalid {
            path: "<unset>".to_string(),
            message: "custom strategy used before initialize()".to_string(),
        })
    }
}

impl LoopStrategy for CustomStrategy {
    fn initialize(&mut self, config: Value) -> crate::Result<()> {
        let path = config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::CustomStrategyInvalid {
                path: "<missing>".to_string(),
                message: "custom strategy config requires a \"path\" string".to_string(),
            })?
            .to_string();

        let mut strategy = self.loader.load(&path)?;
        let inner_config = config.get("config").cloned().unwrap_or(Value::Null);
        strategy
            .initialize(inner_config)
            .map_err(|e| CoreError::CustomStrategyInvalid {
                path: path.clone(),
                message: e.to_string(),
            })?;
        self.inner = Some(strategy);
        Ok(())
    }

    fn should_continue(&mut self, ctx: &crate::models::IterationContext) -> Decision {
        match self.inner_mut() {
            Ok(strategy) => strategy.should_continue(ctx),
            Err(e) => Decision::abort(e.to_string()),
        }
    }

    fn on_loop_start(&mut self) {
        if let Ok(strategy) = self.inner_mut() {
            strategy.on_loop_start();
        }
    }

    fn on_iteration_start(&mut self, iteration: u32) {
        if let Ok(strategy) = self.inner_mut() {
            strategy.on_iteration_start(iteration);
        }
    }

    fn on_iteration_end(&mut self, decision: &Decision) {
        if let Ok(strategy) = self.inner_mut() {
            strategy.on_iteration_end(decision);
        }
    }

    fn on_loop_end(&mut self, decision: &Decision) {
        if let Ok(strategy) = self.inner_mut() {
            strategy.on_loop_end(decision);
        }
    }

    fn get_progress(&self, ctx: &crate::models::IterationContext) -> f64 {
        self.inner.as_ref().map_or(0.0, |s| s.get_progress(ctx))
    }

    fn detect_loop(&self, ctx: &crate::models::IterationContext) -> LoopDetectionResult {
        self.inner
            .as_ref()
            .map_or_else(LoopDetectionResult::none, |s| s.detect_loop(ctx))
    }

    fn reset(&mut self) {
        if let Some(strategy) = self.inner.as_mut() {
            strategy.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loop_strategy::fixed::FixedStrategy;

    #[test]
    fn unregistered_path_is_rejected() {
        let loader = CustomStrategyLoader::new();
        let mut strategy = CustomStrategy::new(loader);
        let result = strategy.initialize(serde_json::json!({"path": "team/acme-strategy"}));
        assert!(result.is_err());
    }

    #[test]
    fn registered_path_delegates_to_the_loaded_strategy() {
        let loader = CustomStrategyLoader::new();
        loader.register(
            "team/acme-strategy",
            Arc::new(|| Box::new(FixedStrategy::new()) as Box<dyn LoopStrategy>),
        );

        let mut strategy = CustomStrategy::new(loader);
        strategy
            .initialize(serde_json::json!({
                "path": "team/acme-strategy",
                "config": {"max_iterations": 1, "completion_criteria": []}
            }))
            .unwrap();

        assert!(strategy.inner.is_some());
    }
}
