/// Fixed-phase scan pipeline.
///
/// Phases run strictly in order: discovery, scanning, vulnerability
/// assessment, the optional bleeding-edge phase, scoring, reporting.
/// Within a module phase an admission pool caps how many modules run at
/// once; a failing module is logged and dropped from the audit trail
/// without stopping the phase. Cancellation is cooperative and observed
/// between phases and at each admission.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

use crate::core::cancel::CancelToken;
use crate::core::registry::ModuleRegistry;
use crate::core::sandbox::SandboxManager;
use crate::core::scoring::ScoringEngine;
use crate::core::state::Scan;
use crate::modules::{Module, ModuleCategory};
use crate::report;

/// Modules running concurrently within a phase. Independent of the
/// configured request concurrency, which modules apply internally.
const MODULE_POOL_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Discovery,
    Scanning,
    VulnerabilityAssessment,
    BleedingEdge,
    Scoring,
    Reporting,
}

impl ScanPhase {
    pub const ALL: [ScanPhase; 6] = [
        ScanPhase::Discovery,
        ScanPhase::Scanning,
        ScanPhase::VulnerabilityAssessment,
        ScanPhase::BleedingEdge,
        ScanPhase::Scoring,
        ScanPhase::Reporting,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ScanPhase::Discovery => "discovery",
            ScanPhase::Scanning => "scanning",
            ScanPhase::VulnerabilityAssessment => "vulnerability-assessment",
            ScanPhase::BleedingEdge => "bleeding-edge",
            ScanPhase::Scoring => "scoring",
            ScanPhase::Reporting => "reporting",
        }
    }

    /// Module roster for the phase. Names with no registered module are
    /// skipped without a diagnostic, so rosters can list modules that
    /// ship in other builds.
    pub fn module_names(&self) -> &'static [&'static str] {
        match self {
            ScanPhase::Discovery => &["subfinder", "amass", "dnsx"],
            ScanPhase::Scanning => &["naabu", "nmap", "webprobe"],
            ScanPhase::VulnerabilityAssessment => &["nuclei", "katana", "ffuf"],
            ScanPhase::BleedingEdge => &[
                "llm-fuzzer",
                "auto-patch",
                "shadow-clone",
                "dep-drift",
                "timing-map",
                "blue-team",
            ],
            ScanPhase::Scoring | ScanPhase::Reporting => &[],
        }
    }

    pub fn category(&self) -> Option<ModuleCategory> {
        match self {
            ScanPhase::Discovery | ScanPhase::Scanning | ScanPhase::VulnerabilityAssessment => {
                Some(ModuleCategory::Stable)
            }
            ScanPhase::BleedingEdge => Some(ModuleCategory::BleedingEdge),
            ScanPhase::Scoring | ScanPhase::Reporting => None,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a run ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

pub struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    scan: Arc<Scan>,
    scorer: ScoringEngine,
    sandbox: Arc<SandboxManager>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModuleRegistry>, scan: Arc<Scan>) -> Self {
        Self {
            registry,
            scan,
            scorer: ScoringEngine::new(),
            sandbox: Arc::new(SandboxManager::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Token observed by the pipeline. Hand clones to signal handlers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn scan(&self) -> &Arc<Scan> {
        &self.scan
    }

    /// Drives the pipeline to a terminal state. `Err` means a phase failed;
    /// the error context names the phase.
    pub async fn run(&self) -> Result<ScanStatus> {
        self.validate_targets()?;

        info!(
            "Starting scan {} against {} target(s)",
            self.scan.short_id(),
            self.scan.targets.len()
        );

        if self.scan.config.isolate {
            if let Err(e) = self.sandbox.initialize().await {
                warn!("Isolation setup failed ({}); continuing without it", e);
            }
        }

        for phase in ScanPhase::ALL {
            if self.cancel.is_cancelled() {
                info!(
                    "Scan {} cancelled before {} phase",
                    self.scan.short_id(),
                    phase
                );
                self.sandbox.shutdown().await;
                return Ok(ScanStatus::Cancelled);
            }

            if phase == ScanPhase::BleedingEdge && !self.scan.config.bleeding_edge {
                debug!("Bleeding-edge phase disabled, skipping");
                continue;
            }

            let phase_start = Instant::now();
            debug!("Entering {} phase", phase);

            let outcome = match phase {
                ScanPhase::Scoring => self.run_scoring_phase().await,
                ScanPhase::Reporting => report::generate(&self.scan).await,
                _ => self.execute_modules(phase).await,
            };

            if let Err(e) = outcome {
                self.sandbox.shutdown().await;
                return Err(e).with_context(|| format!("phase {} failed", phase));
            }

            debug!("Phase {} finished in {:.2?}", phase, phase_start.elapsed());
        }

        self.sandbox.shutdown().await;
        info!(
            "Scan {} completed in {:.2?}",
            self.scan.short_id(),
            self.scan.elapsed()
        );
        Ok(ScanStatus::Completed)
    }

    fn validate_targets(&self) -> Result<()> {
        if self.scan.targets.is_empty() {
            bail!("no targets specified");
        }
        Ok(())
    }

    async fn execute_modules(&self, phase: ScanPhase) -> Result<()> {
        let category = match phase.category() {
            Some(c) => c,
            None => return Ok(()),
        };

        let mut admitted: Vec<Arc<dyn Module>> = Vec::new();
        for name in phase.module_names() {
            let module = match self.registry.get(name) {
                Some(m) if m.category() == category => m,
                _ => continue,
            };
            if self.scan.config.is_excluded(name) {
                debug!("Module '{}' excluded by configuration", name);
                continue;
            }
            if let Err(e) = module.prerequisites(&self.scan) {
                warn!("Skipping module '{}': {}", name, e);
                continue;
            }
            admitted.push(module);
        }

        if admitted.is_empty() {
            warn!("No modules available for {} phase", phase);
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(MODULE_POOL_SIZE));
        let mut tasks = Vec::new();

        for module in admitted {
            // Cancellation wins over a free permit, so nothing new is
            // admitted once the token fires.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Cancellation observed, admitting no further modules");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("semaphore closed unexpectedly")
                }
            };

            let scan = Arc::clone(&self.scan);
            let sandbox = Arc::clone(&self.sandbox);
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let name = module.name().to_string();
                let started = Instant::now();

                let result = if sandbox.is_active() {
                    sandbox.execute(&cancel, module.as_ref(), &scan).await
                } else {
                    module.run(&cancel, &scan).await
                };

                match result {
                    Ok(()) => {
                        scan.results.record_module(&name).await;
                        info!("Module '{}' finished in {:.2?}", name, started.elapsed());
                    }
                    Err(e) => {
                        error!("Module '{}' failed: {:#}", name, e);
                    }
                }

                if let Err(e) = module.cleanup().await {
                    warn!("Module '{}' cleanup failed: {}", name, e);
                }
            });

            tasks.push(handle);
        }

        for task in tasks {
            let _ = task.await;
        }

        Ok(())
    }

    async fn run_scoring_phase(&self) -> Result<()> {
        let drift = self.scan.context.supply_chain_drift().await;
        let duration = self.scan.elapsed().as_secs_f64();
        let scorer = &self.scorer;

        self.scan
            .results
            .update(|results| {
                let mut high_risk = 0usize;
                for vuln in &mut results.vulnerabilities {
                    vuln.risk_score = scorer.risk_score(vuln, drift);
                    if vuln.risk_score >= 70.0 {
                        high_risk += 1;
                    }
                }
                results.summary.high_risk_vulns = high_risk;
                results.summary.risk_score = scorer.overall_risk_score(&results.vulnerabilities);
                results.recompute_summary();
                results.summary.duration_secs = duration;
            })
            .await;

        Ok(())
    }
}
