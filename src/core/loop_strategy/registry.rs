//! Maps a mode name (`fixed`, `hybrid`, `ralph`, or a registered custom
//! name) to the factory that builds it, replacing the original system's
//! class-per-strategy dispatch (§9).

use super::custom::{CustomStrategy, CustomStrategyLoader};
use super::fixed::FixedStrategy;
use super::hybrid::HybridStrategy;
use super::ralph::RalphStrategy;
use super::LoopStrategy;
use crate::CoreError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type StrategyBuilder = Arc<dyn Fn() -> Box<dyn LoopStrategy> + Send + Sync>;

pub struct StrategyRegistry {
    factories: Mutex<HashMap<String, StrategyBuilder>>,
    custom_loader: CustomStrategyLoader,
}

impl StrategyRegistry {
    /// Pre-populated with the three built-in strategies plus a `custom`
    /// entry that delegates to `custom_loader`.
    pub fn new(custom_loader: CustomStrategyLoader) -> Self {
        let mut factories: HashMap<String, StrategyBuilder> = HashMap::new();
        factories.insert(
            "fixed".to_string(),
            Arc::new(|| Box::new(FixedStrategy::new()) as Box<dyn LoopStrategy>),
        );
        factories.insert(
            "hybrid".to_string(),
            Arc::new(|| Box::new(HybridStrategy::new()) as Box<dyn LoopStrategy>),
        );
        factories.insert(
            "ralph".to_string(),
            Arc::new(|| Box::new(RalphStrategy::new()) as Box<dyn LoopStrategy>),
        );

        let loader_for_custom = custom_loader.clone();
        factories.insert(
            "custom".to_string(),
            Arc::new(move || {
                Box::new(CustomStrategy::new(loader_for_custom.clone())) as Box<dyn LoopStrategy>
            }),
        );

        Self {
            factories: Mutex::new(factories),
            custom_loader,
        }
    }

    /// Exposes the loader backing the `custom` entry so callers can register
    /// named strategy implementations ahead of use.
    pub fn custom_loader(&self) -> &CustomStrategyLoader {
        &self.custom_loader
    }

    /// Registers an additional named mode. Rejects overwriting an existing
    /// name unless `allow_overwrite` is set.
    pub fn register(
        &self,
        mode: impl Into<String>,
        factory: StrategyBuilder,
        allow_overwrite: bool,
    ) -> crate::Result<()> {
        let mode = mode.into();
        let mut factories = self.factories.lock().unwrap();
        if !allow_overwrite && factories.contains_key(&mode) {
            return Err(CoreError::DuplicateStrategy { mode });
        }
        factories.insert(mode, factory);
        Ok(())
    }

    pub fn create(&self, mode: &str) -> crate::Result<Box<dyn LoopStrategy>> {
        let factories = self.factories.lock().unwrap();
        match factories.get(mode) {
            Some(factory) => Ok(factory()),
            None => Err(CoreError::StrategyNotFound {
                mode: mode.to_string(),
                available: {
                    let mut names: Vec<String> = factories.keys().cloned().collect();
                    names.sort();
                    names
                },
            }),
        }
    }

    pub fn available_modes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_modes_are_preregistered() {
        let registry = StrategyRegistry::new(CustomStrategyLoader::new());
        let modes = registry.available_modes();
        for expected in ["fixed", "hybrid", "ralph", "custom"] {
            assert!(modes.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn create_unknown_mode_lists_available() {
        let registry = StrategyRegistry::new(CustomStrategyLoader::new());
        let err = registry.create("nonexistent").unwrap_err();
        match err {
            CoreError::StrategyNotFound { mode, available } => {
                assert_eq!(mode, "nonexistent");
                assert!(available.contains(&"fixed".to_string()));
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_rejected_without_overwrite() {
        let registry = StrategyRegistry::new(CustomStrategyLoader::new());
        let result = registry.register(
            "fixed",
            Arc::new(|| Box::new(FixedStrategy::new()) as Box<dyn LoopStrategy>),
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_registration_allowed_with_overwrite() {
        let registry = StrategyRegistry::new(CustomStrategyLoader::new());
        let result = registry.register(
            "fixed",
            Arc::new(|| Box::new(FixedStrategy::new()) as Box<dyn LoopStrategy>),
            true,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn create_produces_a_usable_strategy() {
        let registry = StrategyRegistry::new(CustomStrategyLoader::new());
        let strategy = registry.create("hybrid");
        assert!(strategy.is_ok());
    }
}
