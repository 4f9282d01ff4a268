/// Port and service scanning via the nmap binary.
///
/// Runs nmap in grepable output mode against every discovered host and
/// merges open ports and detected service versions into the host records.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::core::cancel::CancelToken;
use crate::core::state::{HostResult, PortResult, PortState, Scan, ServiceResult};
use crate::modules::{Module, ModuleCategory};
use crate::utils::{resolve_tool, shell_escape};

pub struct NmapModule;

impl NmapModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NmapModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for NmapModule {
    fn name(&self) -> &str {
        "nmap"
    }

    fn description(&self) -> &str {
        "Port scanning and service version detection (nmap)"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Stable
    }

    fn prerequisites(&self, _scan: &Scan) -> Result<()> {
        resolve_tool("nmap")
            .map(|_| ())
            .ok_or_else(|| anyhow!("nmap binary not found"))
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let binary = resolve_tool("nmap").ok_or_else(|| anyhow!("nmap binary not found"))?;

        let snapshot = scan.results.snapshot().await;
        let mut hosts: Vec<String> = snapshot.hosts.iter().map(|h| h.hostname.clone()).collect();
        if hosts.is_empty() {
            hosts = scan.targets.clone();
        }

        let top_ports = if scan.config.deep { "5000" } else { "1000" };
        let timing = if scan.config.aggressive { "-T5" } else { "-T4" };

        for host in hosts {
            if cancel.is_cancelled() {
                debug!("nmap: cancellation observed, stopping port scan");
                break;
            }

            debug!(
                "nmap: {} -Pn {} --top-ports {} -sV -oG - {}",
                binary,
                timing,
                top_ports,
                shell_escape(&host)
            );
            let mut child = Command::new(&binary)
                .args(["-Pn", timing, "--top-ports", top_ports, "-sV", "-oG", "-", &host])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .with_context(|| format!("spawning nmap for {}", host))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("Failed to capture stdout from nmap"))?;
            let mut lines = BufReader::new(stdout).lines();
            let mut parsed = Vec::new();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.contains("Ports:") {
                    parsed.extend(parse_grepable_ports(&line));
                }
            }
            let _ = child.wait().await;

            if parsed.is_empty() {
                debug!("nmap: no ports reported for {}", host);
                continue;
            }

            let open = parsed
                .iter()
                .filter(|(p, _)| p.state == PortState::Open)
                .count();
            info!("nmap: {} port(s) ({} open) on {}", parsed.len(), open, host);

            scan.results
                .update(|results| {
                    let idx = match results.hosts.iter().position(|h| h.hostname == host) {
                        Some(i) => i,
                        None => {
                            results.hosts.push(HostResult::named(&host));
                            results.hosts.len() - 1
                        }
                    };
                    let entry = &mut results.hosts[idx];
                    for (port, service) in parsed {
                        if entry.ports.iter().any(|p| p.port == port.port) {
                            continue;
                        }
                        entry.ports.push(port);
                        if let Some(service) = service {
                            if !entry.services.iter().any(|s| s.name == service.name) {
                                entry.services.push(service);
                            }
                        }
                    }
                })
                .await;
        }

        Ok(())
    }
}

/// Parses the `Ports:` section of an nmap grepable output line. Each entry
/// is `port/state/proto/owner/service/rpc/version`.
fn parse_grepable_ports(line: &str) -> Vec<(PortResult, Option<ServiceResult>)> {
    let section = match line.split("Ports:").nth(1) {
        Some(s) => s,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    for entry in section.split(',') {
        let fields: Vec<&str> = entry.trim().split('/').collect();
        if fields.len() < 5 {
            continue;
        }
        let port: u16 = match fields[0].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let state = match fields[1] {
            "open" => PortState::Open,
            "filtered" => PortState::Filtered,
            _ => PortState::Closed,
        };
        let protocol = fields[2].to_string();
        let service_name = fields[4].trim();
        let version = fields
            .get(6)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(String::from);

        let service = if service_name.is_empty() {
            None
        } else {
            Some(ServiceResult {
                name: service_name.to_string(),
                version: version.clone(),
                banner: None,
            })
        };

        out.push((
            PortResult {
                port,
                protocol,
                state,
                service: if service_name.is_empty() {
                    None
                } else {
                    Some(service_name.to_string())
                },
                version,
            },
            service,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Host: 10.0.0.5 (app.example.com)\tPorts: \
        22/open/tcp//ssh//OpenSSH 8.9p1/, \
        80/open/tcp//http//nginx 1.18.0/, \
        443/filtered/tcp//https///";

    #[test]
    fn test_parse_grepable_ports_extracts_entries() {
        let parsed = parse_grepable_ports(SAMPLE);
        assert_eq!(parsed.len(), 3);

        let (ssh, ssh_service) = &parsed[0];
        assert_eq!(ssh.port, 22);
        assert_eq!(ssh.state, PortState::Open);
        assert_eq!(ssh.protocol, "tcp");
        assert_eq!(ssh.service.as_deref(), Some("ssh"));
        assert_eq!(ssh.version.as_deref(), Some("OpenSSH 8.9p1"));
        assert_eq!(ssh_service.as_ref().map(|s| s.name.as_str()), Some("ssh"));

        let (https, _) = &parsed[2];
        assert_eq!(https.state, PortState::Filtered);
        assert!(https.version.is_none());
    }

    #[test]
    fn test_parse_line_without_ports_section() {
        assert!(parse_grepable_ports("Host: 10.0.0.5 () Status: Up").is_empty());
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let parsed = parse_grepable_ports("Ports: bogus, 8080/open/tcp//http-proxy///");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0.port, 8080);
    }
}
