/// Passive subdomain discovery via the subfinder binary.
///
/// Feeds every discovered hostname into the shared host list, seeding the
/// later phases. IP targets skip enumeration and are recorded directly.

use std::collections::HashSet;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::core::cancel::CancelToken;
use crate::core::state::{HostResult, Scan};
use crate::modules::{Module, ModuleCategory};
use crate::utils::{resolve_tool, shell_escape};

pub struct SubfinderModule;

impl SubfinderModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SubfinderModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for SubfinderModule {
    fn name(&self) -> &str {
        "subfinder"
    }

    fn description(&self) -> &str {
        "Passive subdomain enumeration (projectdiscovery/subfinder)"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Stable
    }

    fn prerequisites(&self, _scan: &Scan) -> Result<()> {
        resolve_tool("subfinder")
            .map(|_| ())
            .ok_or_else(|| anyhow!("subfinder binary not found"))
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let binary =
            resolve_tool("subfinder").ok_or_else(|| anyhow!("subfinder binary not found"))?;
        let timeout = scan.config.timeout.to_string();
        let mut seen: HashSet<String> = HashSet::new();

        for target in &scan.targets {
            if cancel.is_cancelled() {
                debug!("subfinder: cancellation observed, stopping enumeration");
                break;
            }

            if seen.insert(target.clone()) {
                scan.results.add_host(HostResult::named(target)).await;
            }

            // subfinder only makes sense for domain names
            if target.parse::<std::net::IpAddr>().is_ok() {
                continue;
            }

            debug!(
                "subfinder: {} -d {} -silent -all -timeout {}",
                binary,
                shell_escape(target),
                timeout
            );
            let mut child = Command::new(&binary)
                .args(["-d", target, "-silent", "-all", "-timeout", &timeout])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("spawning subfinder for {}", target))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("Failed to capture stdout from subfinder"))?;
            let mut lines = BufReader::new(stdout).lines();
            let mut raw = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                raw.push(line);
            }
            let _ = child.wait().await;

            let mut added = 0usize;
            for subdomain in normalize_subdomains(&raw, target) {
                if seen.insert(subdomain.clone()) {
                    scan.results.add_host(HostResult::named(&subdomain)).await;
                    added += 1;
                }
            }
            info!("subfinder: {} new subdomain(s) for {}", added, target);
        }

        Ok(())
    }
}

/// Cleans raw subfinder output: trims, lowercases, keeps hostnames under the
/// apex domain, drops duplicates while preserving order.
fn normalize_subdomains(lines: &[String], apex: &str) -> Vec<String> {
    let apex = apex.to_lowercase();
    let suffix = format!(".{}", apex);
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in lines {
        let name = line.trim().trim_end_matches('.').to_lowercase();
        if name.is_empty() {
            continue;
        }
        if name != apex && !name.ends_with(&suffix) {
            continue;
        }
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_keeps_subdomains_of_apex() {
        let raw = lines(&[
            "www.example.com",
            "api.example.com",
            "evil.example.org",
            "example.com",
        ]);
        assert_eq!(
            normalize_subdomains(&raw, "example.com"),
            vec!["www.example.com", "api.example.com", "example.com"]
        );
    }

    #[test]
    fn test_normalize_trims_and_dedupes() {
        let raw = lines(&["  WWW.Example.com  ", "www.example.com.", "", "www.example.com"]);
        assert_eq!(
            normalize_subdomains(&raw, "example.com"),
            vec!["www.example.com"]
        );
    }

    #[test]
    fn test_normalize_rejects_suffix_lookalikes() {
        let raw = lines(&["notexample.com", "x.notexample.com"]);
        assert!(normalize_subdomains(&raw, "example.com").is_empty());
    }
}
