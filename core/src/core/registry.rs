/// Module catalog, built once at startup and read-only afterwards.
///
/// Registration goes through an explicit instance assembled by
/// `modules::built_in_registry()` rather than self-registering globals, so
/// there are no initialization-order surprises. A duplicate or empty name is
/// a configuration error the caller treats as fatal before any scan runs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::debug;

use crate::modules::{Module, ModuleCategory};

pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
    order: Vec<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Inserts a module under its unique name. Fails on an empty or already
    /// registered name; the process entry point aborts startup on error.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<()> {
        let name = module.name().to_string();
        if name.is_empty() {
            bail!("module name cannot be empty");
        }
        if self.modules.contains_key(&name) {
            bail!("module '{}' already registered", name);
        }

        debug!("registered module: {}", name);
        self.order.push(name.clone());
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Modules of one category, in registration order. Callers that need a
    /// specific order (display, scheduling) impose their own.
    pub fn by_category(&self, category: ModuleCategory) -> Vec<Arc<dyn Module>> {
        self.order
            .iter()
            .filter_map(|name| self.modules.get(name))
            .filter(|m| m.category() == category)
            .cloned()
            .collect()
    }

    /// Display order: stable modules first, then bleeding-edge, each group
    /// sorted by name.
    pub fn listing(&self) -> Vec<Arc<dyn Module>> {
        let mut listed = Vec::with_capacity(self.modules.len());
        for category in [ModuleCategory::Stable, ModuleCategory::BleedingEdge] {
            let mut group = self.by_category(category);
            group.sort_by(|a, b| a.name().cmp(b.name()));
            listed.extend(group);
        }
        listed
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelToken;
    use crate::core::state::Scan;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockModule {
        name: &'static str,
        category: ModuleCategory,
    }

    impl MockModule {
        fn stable(name: &'static str) -> Arc<dyn Module> {
            Arc::new(Self {
                name,
                category: ModuleCategory::Stable,
            })
        }

        fn bleeding(name: &'static str) -> Arc<dyn Module> {
            Arc::new(Self {
                name,
                category: ModuleCategory::BleedingEdge,
            })
        }
    }

    #[async_trait]
    impl Module for MockModule {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "mock module"
        }

        fn category(&self) -> ModuleCategory {
            self.category
        }

        async fn run(&self, _cancel: &CancelToken, _scan: &Scan) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::stable("alpha")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_name_fails() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::stable("alpha")).unwrap();

        let err = registry.register(MockModule::stable("alpha")).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_name_fails() {
        let mut registry = ModuleRegistry::new();
        let err = registry.register(MockModule::stable("")).unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_category_filter() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::stable("alpha")).unwrap();
        registry.register(MockModule::bleeding("beta")).unwrap();
        registry.register(MockModule::stable("gamma")).unwrap();

        let stable = registry.by_category(ModuleCategory::Stable);
        assert_eq!(stable.len(), 2);
        assert!(stable.iter().all(|m| m.category() == ModuleCategory::Stable));

        let bleeding = registry.by_category(ModuleCategory::BleedingEdge);
        assert_eq!(bleeding.len(), 1);
        assert_eq!(bleeding[0].name(), "beta");
    }

    #[test]
    fn test_listing_groups_and_sorts() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::bleeding("zeta")).unwrap();
        registry.register(MockModule::stable("omega")).unwrap();
        registry.register(MockModule::stable("alpha")).unwrap();
        registry.register(MockModule::bleeding("eta")).unwrap();

        let listing = registry.listing();
        let names: Vec<_> = listing.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["alpha", "omega", "eta", "zeta"]);
    }

    #[test]
    fn test_concurrent_registration_stays_consistent() {
        let registry = Arc::new(Mutex::new(ModuleRegistry::new()));
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];

        let handles: Vec<_> = names
            .into_iter()
            .map(|name| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .lock()
                        .unwrap()
                        .register(MockModule::stable(name))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let registry = registry.lock().unwrap();
        assert_eq!(registry.len(), names.len());
        for name in names {
            assert!(registry.get(name).is_some(), "{} must be retrievable", name);
        }
    }

    #[test]
    fn test_concurrent_lookups() {
        let mut registry = ModuleRegistry::new();
        registry.register(MockModule::stable("alpha")).unwrap();
        registry.register(MockModule::bleeding("beta")).unwrap();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(registry.get("alpha").is_some());
                        assert_eq!(registry.by_category(ModuleCategory::BleedingEdge).len(), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
