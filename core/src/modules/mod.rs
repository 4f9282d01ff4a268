/// Scan module contract and the built-in module set.
///
/// Every capability the pipeline can run implements [`Module`]. Modules are
/// constructed once at startup by [`built_in_registry`] and looked up by
/// name; nothing self-registers.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::cancel::CancelToken;
use crate::core::registry::ModuleRegistry;
use crate::core::state::Scan;

pub mod bleeding;
pub mod stable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleCategory {
    Stable,
    BleedingEdge,
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleCategory::Stable => write!(f, "stable"),
            ModuleCategory::BleedingEdge => write!(f, "bleeding-edge"),
        }
    }
}

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> ModuleCategory;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn author(&self) -> &str {
        "Harrier Team"
    }

    /// Checks that everything the module needs (external binaries,
    /// configuration) is present. Failing modules are skipped, not fatal.
    fn prerequisites(&self, _scan: &Scan) -> Result<()> {
        Ok(())
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()>;

    /// Releases per-run resources. Invoked once after a run attempt,
    /// whether the run succeeded or not.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds the registry with every built-in module. The CLI treats a failure
/// here as fatal since it means two modules collide on a name.
pub fn built_in_registry() -> Result<ModuleRegistry> {
    let modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(stable::subfinder::SubfinderModule::new()),
        Arc::new(stable::nmap::NmapModule::new()),
        Arc::new(stable::webprobe::WebProbeModule::new()),
        Arc::new(stable::nuclei::NucleiModule::new()),
        Arc::new(bleeding::llm_fuzzer::LlmFuzzerModule::new()),
        Arc::new(bleeding::auto_patch::AutoPatchModule::new()),
        Arc::new(bleeding::shadow_clone::ShadowCloneModule::new()),
        Arc::new(bleeding::dep_drift::DepDriftModule::new()),
        Arc::new(bleeding::timing_map::TimingMapModule::new()),
        Arc::new(bleeding::blue_team::BlueTeamModule::new()),
    ];

    let mut registry = ModuleRegistry::new();
    for module in modules {
        registry.register(module)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_registry_holds_all_modules() {
        let registry = built_in_registry().unwrap();
        assert_eq!(registry.len(), 10);
        for name in [
            "subfinder",
            "nmap",
            "webprobe",
            "nuclei",
            "llm-fuzzer",
            "auto-patch",
            "shadow-clone",
            "dep-drift",
            "timing-map",
            "blue-team",
        ] {
            assert!(registry.get(name).is_some(), "missing module {}", name);
        }
    }

    #[test]
    fn test_categories_split_stable_and_bleeding() {
        let registry = built_in_registry().unwrap();
        assert_eq!(registry.by_category(ModuleCategory::Stable).len(), 4);
        assert_eq!(registry.by_category(ModuleCategory::BleedingEdge).len(), 6);
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(ModuleCategory::Stable.to_string(), "stable");
        assert_eq!(ModuleCategory::BleedingEdge.to_string(), "bleeding-edge");
    }
}
