/// Defender-side digest of the completed scan.
///
/// Collapses the exploitable findings into a watch list and drafts one
/// detection rule per finding, giving the blue team a starting point for
/// monitoring the exposed surface.

use std::collections::HashSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;

use crate::core::cancel::CancelToken;
use crate::core::state::{DetectionDigest, Scan, Vulnerability};
use crate::modules::{Module, ModuleCategory};

const RULE_SID_BASE: u32 = 9_000_000;

pub struct BlueTeamModule;

impl BlueTeamModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlueTeamModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BlueTeamModule {
    fn name(&self) -> &str {
        "blue-team"
    }

    fn description(&self) -> &str {
        "Detection rule drafting and watch-list digest"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if !scan.config.blue_team {
            bail!("blue team digest not enabled");
        }
        Ok(())
    }

    async fn run(&self, _cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;
        let digest = build_digest(&snapshot.vulnerabilities);

        info!(
            "blue-team: {} watched host(s), {} rule(s)",
            digest.watched_hosts.len(),
            digest.rules.len()
        );

        scan.results
            .update(|results| {
                results.side_channel.detections = Some(digest);
            })
            .await;

        Ok(())
    }
}

/// Watch list and rules derive from the exploitable findings only; the
/// rest would drown real alerts in noise.
fn build_digest(vulns: &[Vulnerability]) -> DetectionDigest {
    let mut seen = HashSet::new();
    let mut watched_hosts = Vec::new();
    let mut rules = Vec::new();
    let mut exploitable_findings = 0usize;

    for vuln in vulns {
        if !vuln.exploitable {
            continue;
        }
        exploitable_findings += 1;

        if seen.insert(vuln.host.clone()) {
            watched_hosts.push(vuln.host.clone());
        }

        rules.push(format!(
            r#"alert http any any -> any any (msg:"Harrier watch: {} on {}"; sid:{}; rev:1;)"#,
            vuln.name,
            vuln.host,
            RULE_SID_BASE + rules.len() as u32
        ));
    }

    DetectionDigest {
        watched_hosts,
        exploitable_findings,
        rules,
    }
}
