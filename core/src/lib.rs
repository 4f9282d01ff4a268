pub mod core;
pub mod modules;
pub mod report;
pub mod utils;

use serde::{Deserialize, Serialize};

pub use crate::core::cancel::CancelToken;
pub use crate::core::orchestrator::{Orchestrator, ScanPhase, ScanStatus};
pub use crate::core::registry::ModuleRegistry;
pub use crate::core::sandbox::SandboxManager;
pub use crate::core::scoring::ScoringEngine;
pub use crate::core::state::{Scan, ScanResults, ScanSummary, Vulnerability};
pub use crate::core::Severity;
pub use crate::modules::{built_in_registry, Module, ModuleCategory};
pub use crate::report::ReportFormat;
pub use crate::utils::installer;
pub use crate::utils::load_targets;

/// Flat scan configuration shared by the CLI and the orchestration core.
///
/// The core treats this as an opaque read-only record; the CLI assembles it
/// from flags and target files before a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub targets: Vec<String>,
    pub exclude: Vec<String>,
    pub output: String,
    pub report_dir: String,
    pub format: ReportFormat,
    pub threads: usize,
    pub rate_limit: u64,
    pub timeout: u64,
    pub deep: bool,
    pub bleeding_edge: bool,
    pub stealth: bool,
    pub aggressive: bool,
    pub no_throttle: bool,
    pub isolate: bool,
    pub llm_model: String,
    pub temperature: f64,
    pub generate_patch: bool,
    pub shadow_clone: bool,
    pub dep_drift: bool,
    pub timing_map: bool,
    pub blue_team: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            exclude: Vec::new(),
            output: "harrier_results.json".to_string(),
            report_dir: "reports".to_string(),
            format: ReportFormat::All,
            threads: 50,
            rate_limit: 150,
            timeout: 10,
            deep: false,
            bleeding_edge: false,
            stealth: false,
            aggressive: false,
            no_throttle: false,
            isolate: false,
            llm_model: String::new(),
            temperature: 0.7,
            generate_patch: false,
            shadow_clone: false,
            dep_drift: false,
            timing_map: false,
            blue_team: false,
        }
    }
}

impl ScanConfig {
    pub fn llm_model_ref(&self) -> Option<&str> {
        if self.llm_model.is_empty() { None } else { Some(&self.llm_model) }
    }

    /// True when the given module name is excluded by configuration.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|e| e == name)
    }
}

/// Initializes the env_logger backend for the `log` macros used across the
/// library. Called once by the binary entry point.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}
