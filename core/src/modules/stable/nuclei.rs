/// Template-based vulnerability scanning via the nuclei binary.
///
/// Streams JSONL findings from nuclei and turns each one into a shared
/// Vulnerability record, including CVE/CVSS classification data when the
/// template carries it.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::core::state::{Scan, Vulnerability};
use crate::core::Severity;
use crate::modules::{Module, ModuleCategory};
use crate::utils::resolve_tool;

// Template tags that imply a finding is directly exploitable.
const EXPLOITABLE_TAGS: &[&str] = &["rce", "sqli", "default-login", "kev", "oast"];

pub struct NucleiModule;

impl NucleiModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NucleiModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for NucleiModule {
    fn name(&self) -> &str {
        "nuclei"
    }

    fn description(&self) -> &str {
        "Template-based vulnerability scanning (projectdiscovery/nuclei)"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Stable
    }

    fn prerequisites(&self, _scan: &Scan) -> Result<()> {
        resolve_tool("nuclei")
            .map(|_| ())
            .ok_or_else(|| anyhow!("nuclei binary not found"))
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let binary = resolve_tool("nuclei").ok_or_else(|| anyhow!("nuclei binary not found"))?;

        let mut targets = scan.context.web_targets().await;
        if targets.is_empty() {
            targets = scan.targets.clone();
        }

        let severity_filter = if scan.config.deep {
            "low,medium,high,critical"
        } else {
            "medium,high,critical"
        };
        let timeout = scan.config.timeout.to_string();
        let rate_limit = scan.config.rate_limit.to_string();
        let concurrency = scan.config.threads.to_string();

        let mut total = 0usize;
        for target in targets {
            if cancel.is_cancelled() {
                debug!("nuclei: cancellation observed, stopping assessment");
                break;
            }

            let mut child = Command::new(&binary)
                .args([
                    "-u",
                    &target,
                    "-jsonl",
                    "-silent",
                    "-severity",
                    severity_filter,
                    "-timeout",
                    &timeout,
                    "-rate-limit",
                    &rate_limit,
                    "-c",
                    &concurrency,
                ])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("spawning nuclei for {}", target))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("Failed to capture stdout from nuclei"))?;
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(vuln) = parse_finding(&line) {
                    total += 1;
                    info!(
                        "nuclei: {} [{}] @ {}",
                        vuln.name, vuln.severity, vuln.host
                    );
                    scan.results.add_vulnerability(vuln).await;
                }
            }
            let _ = child.wait().await;
        }

        if total > 0 {
            info!("nuclei: {} finding(s)", total);
        } else {
            info!("nuclei: no findings");
        }
        Ok(())
    }
}

/// Parses one JSONL finding. Returns None for blank lines, non-JSON noise,
/// and entries without a template name.
fn parse_finding(line: &str) -> Option<Vulnerability> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let v: serde_json::Value = serde_json::from_str(line).ok()?;

    let info = v.get("info")?;
    let name = info.get("name").and_then(|n| n.as_str())?;

    let severity = Severity::parse(
        info.get("severity")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown"),
    );

    let matched_at = v
        .get("matched-at")
        .or_else(|| v.get("matched_at"))
        .or_else(|| v.get("host"))
        .and_then(|m| m.as_str())
        .unwrap_or("");

    let host = Url::parse(matched_at)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| matched_at.to_string());

    let mut vuln = Vulnerability::new(name, severity, &host);

    if matched_at.starts_with("http") {
        vuln.url = Some(matched_at.to_string());
    }
    vuln.template = v
        .get("template-id")
        .or_else(|| v.get("template_id"))
        .and_then(|t| t.as_str())
        .map(String::from);
    vuln.description = info
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if let Some(classification) = info.get("classification") {
        vuln.cvss = classification
            .get("cvss-score")
            .and_then(|s| s.as_f64());
        vuln.cve = classification
            .get("cve-id")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.as_str())
            .map(|c| c.to_uppercase());
    }

    if let Some(tags) = info.get("tags").and_then(|t| t.as_array()) {
        vuln.exploitable = tags
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| EXPLOITABLE_TAGS.contains(&t));
    }

    if let Some(extracted) = v.get("extracted-results").and_then(|e| e.as_array()) {
        let joined: Vec<&str> = extracted.iter().filter_map(|e| e.as_str()).collect();
        if !joined.is_empty() {
            vuln.evidence = Some(joined.join(", "));
        }
    }
    if let Some(curl) = v.get("curl-command").and_then(|c| c.as_str()) {
        vuln.poc = Some(curl.to_string());
    }
    if let Some(reference) = info.get("reference").and_then(|r| r.as_array()) {
        vuln.references = reference
            .iter()
            .filter_map(|r| r.as_str().map(String::from))
            .collect();
    }

    Some(vuln)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_finding() {
        let line = r#"{
            "template-id": "CVE-2021-44228",
            "matched-at": "https://app.example.com:8443/login",
            "curl-command": "curl -X GET https://app.example.com:8443/login",
            "extracted-results": ["${jndi:ldap}"],
            "info": {
                "name": "Log4j RCE",
                "severity": "critical",
                "description": "Remote code execution in log4j.",
                "tags": ["rce", "log4j"],
                "reference": ["https://nvd.nist.gov/vuln/detail/CVE-2021-44228"],
                "classification": {
                    "cve-id": ["cve-2021-44228"],
                    "cvss-score": 10.0
                }
            }
        }"#;

        let vuln = parse_finding(line).unwrap();
        assert_eq!(vuln.name, "Log4j RCE");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.host, "app.example.com");
        assert_eq!(vuln.url.as_deref(), Some("https://app.example.com:8443/login"));
        assert_eq!(vuln.cve.as_deref(), Some("CVE-2021-44228"));
        assert_eq!(vuln.cvss, Some(10.0));
        assert!(vuln.exploitable);
        assert_eq!(vuln.evidence.as_deref(), Some("${jndi:ldap}"));
        assert!(vuln.poc.is_some());
        assert_eq!(vuln.references.len(), 1);
    }

    #[test]
    fn test_parse_minimal_finding_defaults() {
        let line = r#"{"host":"example.com","info":{"name":"Exposed panel","severity":"medium","tags":["panel"]}}"#;
        let vuln = parse_finding(line).unwrap();
        assert_eq!(vuln.severity, Severity::Medium);
        assert_eq!(vuln.host, "example.com");
        assert!(!vuln.exploitable);
        assert!(vuln.cve.is_none());
        assert!(vuln.url.is_none());
    }

    #[test]
    fn test_parse_rejects_noise() {
        assert!(parse_finding("").is_none());
        assert!(parse_finding("not json").is_none());
        assert!(parse_finding(r#"{"info":{}}"#).is_none());
    }

    #[test]
    fn test_unrecognized_severity_maps_to_unknown() {
        let line = r#"{"host":"h","info":{"name":"x","severity":"catastrophic"}}"#;
        assert_eq!(parse_finding(line).unwrap().severity, Severity::Unknown);
    }
}
