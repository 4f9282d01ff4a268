/// Report generation for finished runs.
///
/// Writes the raw results as JSON and a human-readable Markdown digest.
/// Both use atomic writes (tmp + rename) so a crash mid-flush never leaves
/// a truncated report behind.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::state::{PatchKind, Scan, ScanResults};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Markdown,
    All,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::All
    }
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "all" => Ok(ReportFormat::All),
            other => bail!("unknown report format '{}'", other),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Markdown => write!(f, "markdown"),
            ReportFormat::All => write!(f, "all"),
        }
    }
}

/// Writes the configured report files from a snapshot of the results.
pub async fn generate(scan: &Scan) -> Result<()> {
    let results = scan.results.snapshot().await;
    let format = scan.config.format;

    if matches!(format, ReportFormat::Json | ReportFormat::All) {
        let path = PathBuf::from(&scan.config.output);
        let json = serde_json::to_string_pretty(&results)?;
        write_atomic(&path, &json)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Results written to {}", path.display());
    }

    if matches!(format, ReportFormat::Markdown | ReportFormat::All) {
        let path = Path::new(&scan.config.report_dir)
            .join(format!("harrier_{}.md", scan.short_id()));
        write_atomic(&path, &render_markdown(scan, &results))
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

/// Atomic write: flush to .tmp, then rename over the real file.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn render_markdown(scan: &Scan, results: &ScanResults) -> String {
    let summary = &results.summary;
    let mut out = String::new();

    out.push_str("# Harrier Scan Report\n\n");
    out.push_str(&format!("- Scan ID: `{}`\n", scan.id));
    out.push_str(&format!("- Targets: {}\n", scan.targets.join(", ")));
    out.push_str(&format!("- Duration: {:.1}s\n", summary.duration_secs));
    let modules = if summary.modules_executed.is_empty() {
        "none".to_string()
    } else {
        summary.modules_executed.join(", ")
    };
    out.push_str(&format!("- Modules: {}\n\n", modules));

    out.push_str("## Summary\n\n");
    out.push_str("| Metric | Value |\n|---|---|\n");
    out.push_str(&format!(
        "| Hosts (alive/total) | {}/{} |\n",
        summary.alive_hosts, summary.total_hosts
    ));
    out.push_str(&format!("| Open ports | {} |\n", summary.open_ports));
    out.push_str(&format!("| Findings | {} |\n", summary.total_vulns));
    out.push_str(&format!("| Critical | {} |\n", summary.critical_vulns));
    out.push_str(&format!("| High | {} |\n", summary.high_vulns));
    out.push_str(&format!("| Medium | {} |\n", summary.medium_vulns));
    out.push_str(&format!("| Low | {} |\n", summary.low_vulns));
    out.push_str(&format!("| Exploitable | {} |\n", summary.exploitable_vulns));
    out.push_str(&format!("| High risk (score >= 70) | {} |\n", summary.high_risk_vulns));
    out.push_str(&format!("| Overall risk score | {:.2} |\n\n", summary.risk_score));

    out.push_str("## Hosts\n\n");
    if results.hosts.is_empty() {
        out.push_str("No hosts recorded.\n\n");
    } else {
        out.push_str("| Host | Open Ports | Services |\n|---|---|---|\n");
        for host in &results.hosts {
            let ports = host
                .ports
                .iter()
                .map(|p| p.port.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let services = host
                .services
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                host.hostname, ports, services
            ));
        }
        out.push('\n');
    }

    out.push_str("## Findings\n\n");
    if results.vulnerabilities.is_empty() {
        out.push_str("No findings.\n\n");
    } else {
        let mut vulns: Vec<_> = results.vulnerabilities.iter().collect();
        vulns.sort_by(|a, b| {
            b.risk_score
                .partial_cmp(&a.risk_score)
                .unwrap_or(Ordering::Equal)
        });

        out.push_str("| Risk | Severity | Finding | Host | CVE |\n|---|---|---|---|---|\n");
        for vuln in &vulns {
            out.push_str(&format!(
                "| {:.2} | {} | {} | {} | {} |\n",
                vuln.risk_score,
                vuln.severity,
                vuln.name,
                vuln.host,
                vuln.cve.as_deref().unwrap_or("-")
            ));
        }
        out.push('\n');

        for vuln in &vulns {
            if vuln.evidence.is_none() && vuln.poc.is_none() {
                continue;
            }
            out.push_str(&format!("### {}\n\n", vuln.name));
            if let Some(evidence) = &vuln.evidence {
                out.push_str(&format!("Evidence:\n\n```\n{}\n```\n\n", evidence));
            }
            if let Some(poc) = &vuln.poc {
                out.push_str(&format!("Reproduce:\n\n```\n{}\n```\n\n", poc));
            }
        }
    }

    if !results.patches.is_empty() {
        out.push_str("## Patch Recommendations\n\n");
        for patch in &results.patches {
            out.push_str(&format!(
                "- **{}** for `{}` (confidence {:.2}): {}\n",
                patch_kind_label(patch.kind),
                patch.vuln_id,
                patch.confidence,
                patch.description
            ));
        }
        out.push('\n');
    }

    let side = &results.side_channel;
    if side.timing.is_some()
        || side.drift.is_some()
        || side.clone_parity.is_some()
        || side.detections.is_some()
    {
        out.push_str("## Side Channel Observations\n\n");
        if let Some(timing) = &side.timing {
            out.push_str(&format!(
                "- Timing profile: {} sampled port(s)\n",
                timing.samples.len()
            ));
        }
        if let Some(drift) = &side.drift {
            out.push_str(&format!(
                "- Supply-chain drift: {:.2} ({}/{} services versioned)\n",
                drift.drift, drift.services_versioned, drift.services_total
            ));
        }
        if let Some(parity) = &side.clone_parity {
            out.push_str(&format!(
                "- Shadow clone parity: {} checked, {} mismatched\n",
                parity.checked,
                parity.mismatched.len()
            ));
        }
        if let Some(detections) = &side.detections {
            out.push_str(&format!(
                "- Blue-team digest: {} watched host(s), {} rule(s)\n",
                detections.watched_hosts.len(),
                detections.rules.len()
            ));
        }
        out.push('\n');
    }

    out
}

fn patch_kind_label(kind: PatchKind) -> &'static str {
    match kind {
        PatchKind::Code => "code fix",
        PatchKind::WafRule => "WAF rule",
        PatchKind::Config => "config change",
    }
}
