/// Shared scan state: the run-scoped accumulator every module writes into.
///
/// All result sequences live behind one mutex scoped to the accumulator; the
/// cross-module context sits behind its own independent lock so context
/// reads never contend with result appends. Guards are RAII, so a panicking
/// or cancelled task can never leave either lock held.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::Severity;
use crate::ScanConfig;

/// A discovered host and everything found on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostResult {
    pub ip: String,
    pub hostname: String,
    pub ports: Vec<PortResult>,
    pub services: Vec<ServiceResult>,
    pub web_apps: Vec<WebAppResult>,
}

impl HostResult {
    pub fn named(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    /// A host counts as alive once anything was observed listening on it.
    pub fn is_alive(&self) -> bool {
        !self.ports.is_empty() || !self.services.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortResult {
    pub port: u16,
    pub protocol: String,
    pub state: PortState,
    pub service: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResult {
    pub name: String,
    pub version: Option<String>,
    pub banner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAppResult {
    pub url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub server: Option<String>,
    pub technologies: Vec<String>,
}

/// A single finding. `risk_score` is written only by the scoring engine
/// after all discovery phases; modules leave it at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub cvss: Option<f64>,
    pub cve: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub url: Option<String>,
    pub evidence: Option<String>,
    pub poc: Option<String>,
    pub references: Vec<String>,
    pub template: Option<String>,
    pub risk_score: f64,
    pub exploitable: bool,
    pub llm_confidence: Option<f64>,
}

impl Vulnerability {
    pub fn new(name: &str, severity: Severity, host: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            severity,
            cvss: None,
            cve: None,
            host: host.to_string(),
            port: None,
            service: None,
            url: None,
            evidence: None,
            poc: None,
            references: Vec::new(),
            template: None,
            risk_score: 0.0,
            exploitable: false,
            llm_confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Code,
    WafRule,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecommendation {
    pub vuln_id: String,
    pub kind: PatchKind,
    pub description: String,
    pub diff: Option<String>,
    pub waf_rule: Option<String>,
    pub confidence: f64,
}

/// Typed per-module side-channel outputs. Each bleeding-edge module owns at
/// most one optional slot here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SideChannel {
    pub timing: Option<TimingProfile>,
    pub drift: Option<DriftReport>,
    pub clone_parity: Option<CloneParity>,
    pub detections: Option<DetectionDigest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingProfile {
    pub samples: Vec<PortTiming>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortTiming {
    pub host: String,
    pub port: u16,
    pub min_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriftReport {
    pub services_total: usize,
    pub services_versioned: usize,
    pub drift: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneParity {
    pub checked: usize,
    pub mismatched: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionDigest {
    pub watched_hosts: Vec<String>,
    pub exploitable_findings: usize,
    pub rules: Vec<String>,
}

/// Aggregate counters derived from the result sequences.
///
/// `recompute_summary` owns every field except `high_risk_vulns` and
/// `risk_score` (written by the scoring phase), `modules_executed` (the
/// audit trail appended as modules succeed), and `duration_secs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSummary {
    pub total_hosts: usize,
    pub alive_hosts: usize,
    pub total_ports: usize,
    pub open_ports: usize,
    pub total_vulns: usize,
    pub critical_vulns: usize,
    pub high_vulns: usize,
    pub medium_vulns: usize,
    pub low_vulns: usize,
    pub exploitable_vulns: usize,
    pub high_risk_vulns: usize,
    pub risk_score: f64,
    pub duration_secs: f64,
    pub modules_executed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanResults {
    pub hosts: Vec<HostResult>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub patches: Vec<PatchRecommendation>,
    pub side_channel: SideChannel,
    pub summary: ScanSummary,
}

impl ScanResults {
    /// Recomputes the derived counters from the result sequences. Idempotent:
    /// running it twice over the same results yields identical summaries.
    pub fn recompute_summary(&mut self) {
        let summary = &mut self.summary;

        summary.total_hosts = self.hosts.len();
        summary.alive_hosts = self.hosts.iter().filter(|h| h.is_alive()).count();

        summary.total_ports = 0;
        summary.open_ports = 0;
        for host in &self.hosts {
            summary.total_ports += host.ports.len();
            summary.open_ports += host
                .ports
                .iter()
                .filter(|p| p.state == PortState::Open)
                .count();
        }

        summary.total_vulns = self.vulnerabilities.len();
        summary.critical_vulns = 0;
        summary.high_vulns = 0;
        summary.medium_vulns = 0;
        summary.low_vulns = 0;
        summary.exploitable_vulns = 0;

        for vuln in &self.vulnerabilities {
            match vuln.severity {
                Severity::Critical => summary.critical_vulns += 1,
                Severity::High => summary.high_vulns += 1,
                Severity::Medium => summary.medium_vulns += 1,
                Severity::Low => summary.low_vulns += 1,
                Severity::Info | Severity::Unknown => {}
            }
            if vuln.exploitable {
                summary.exploitable_vulns += 1;
            }
        }
    }
}

/// The result accumulator behind its mutual-exclusion guard. Appends are
/// short critical sections with no await inside, so entries are never
/// observed half-written and counter updates never race.
pub struct SharedResults {
    inner: Mutex<ScanResults>,
}

impl SharedResults {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ScanResults::default()),
        }
    }

    pub async fn add_host(&self, host: HostResult) {
        self.inner.lock().await.hosts.push(host);
    }

    pub async fn add_vulnerability(&self, vuln: Vulnerability) {
        self.inner.lock().await.vulnerabilities.push(vuln);
    }

    pub async fn add_patch(&self, patch: PatchRecommendation) {
        self.inner.lock().await.patches.push(patch);
    }

    /// Appends a module name to the executed-modules audit trail.
    pub async fn record_module(&self, name: &str) {
        self.inner
            .lock()
            .await
            .summary
            .modules_executed
            .push(name.to_string());
    }

    /// Runs a closure under the guard. The closure must not block; it runs
    /// inside the critical section.
    pub async fn update<R>(&self, f: impl FnOnce(&mut ScanResults) -> R) -> R {
        let mut guard = self.inner.lock().await;
        f(&mut guard)
    }

    pub async fn snapshot(&self) -> ScanResults {
        self.inner.lock().await.clone()
    }
}

/// Cross-module signals, redesigned from a free-form map into a closed set
/// of typed fields. Guarded independently from the results.
#[derive(Debug, Default, Clone)]
pub struct ScanContext {
    pub supply_chain_drift: Option<f64>,
    pub web_targets: Vec<String>,
}

pub struct SharedContext {
    inner: Mutex<ScanContext>,
}

impl SharedContext {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ScanContext::default()),
        }
    }

    pub async fn set_supply_chain_drift(&self, drift: f64) {
        self.inner.lock().await.supply_chain_drift = Some(drift);
    }

    pub async fn supply_chain_drift(&self) -> Option<f64> {
        self.inner.lock().await.supply_chain_drift
    }

    pub async fn add_web_target(&self, url: String) {
        let mut guard = self.inner.lock().await;
        if !guard.web_targets.contains(&url) {
            guard.web_targets.push(url);
        }
    }

    pub async fn web_targets(&self) -> Vec<String> {
        self.inner.lock().await.web_targets.clone()
    }
}

/// One orchestration run. Modules receive a shared reference and may mutate
/// the accumulator and context; the identity and target list stay fixed for
/// the lifetime of the run.
pub struct Scan {
    pub id: String,
    pub targets: Vec<String>,
    pub config: ScanConfig,
    pub results: SharedResults,
    pub context: SharedContext,
    started: Instant,
}

impl Scan {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            targets: config.targets.clone(),
            config,
            results: SharedResults::new(),
            context: SharedContext::new(),
            started: Instant::now(),
        }
    }

    pub fn short_id(&self) -> &str {
        &self.id[..8]
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open_port(port: u16) -> PortResult {
        PortResult {
            port,
            protocol: "tcp".to_string(),
            state: PortState::Open,
            service: Some("http".to_string()),
            version: None,
        }
    }

    fn test_scan() -> Arc<Scan> {
        Arc::new(Scan::new(ScanConfig {
            targets: vec!["example.com".to_string()],
            ..Default::default()
        }))
    }

    async fn run_concurrent_appends(n: usize) {
        let scan = test_scan();
        let mut handles = Vec::new();

        for i in 0..n {
            let scan = Arc::clone(&scan);
            handles.push(tokio::spawn(async move {
                scan.results
                    .add_host(HostResult::named(&format!("h{}.example.com", i)))
                    .await;
                scan.results
                    .add_vulnerability(Vulnerability::new(
                        &format!("vuln-{}", i),
                        Severity::Low,
                        "example.com",
                    ))
                    .await;
                scan.results
                    .add_patch(PatchRecommendation {
                        vuln_id: format!("vuln-{}", i),
                        kind: PatchKind::Config,
                        description: "tighten".to_string(),
                        diff: None,
                        waf_rule: None,
                        confidence: 0.5,
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let results = scan.results.snapshot().await;
        assert_eq!(results.hosts.len(), n);
        assert_eq!(results.vulnerabilities.len(), n);
        assert_eq!(results.patches.len(), n);

        let mut names: Vec<_> = results.vulnerabilities.iter().map(|v| &v.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), n, "no entry may be duplicated or dropped");
    }

    #[tokio::test]
    async fn test_concurrent_appends_1() {
        run_concurrent_appends(1).await;
    }

    #[tokio::test]
    async fn test_concurrent_appends_10() {
        run_concurrent_appends(10).await;
    }

    #[tokio::test]
    async fn test_concurrent_appends_100() {
        run_concurrent_appends(100).await;
    }

    #[test]
    fn test_host_alive_rules() {
        let mut host = HostResult::named("a.example.com");
        assert!(!host.is_alive());

        host.ports.push(open_port(80));
        assert!(host.is_alive());

        let mut host = HostResult::named("b.example.com");
        host.services.push(ServiceResult {
            name: "ssh".to_string(),
            version: None,
            banner: None,
        });
        assert!(host.is_alive());
    }

    #[test]
    fn test_recompute_summary_counts() {
        let mut results = ScanResults::default();

        let mut alive = HostResult::named("a.example.com");
        alive.ports.push(open_port(80));
        alive.ports.push(PortResult {
            port: 23,
            protocol: "tcp".to_string(),
            state: PortState::Filtered,
            service: None,
            version: None,
        });
        results.hosts.push(alive);
        results.hosts.push(HostResult::named("dead.example.com"));

        let mut critical = Vulnerability::new("rce", Severity::Critical, "a.example.com");
        critical.exploitable = true;
        results.vulnerabilities.push(critical);
        results
            .vulnerabilities
            .push(Vulnerability::new("weak-tls", Severity::Medium, "a.example.com"));
        results
            .vulnerabilities
            .push(Vulnerability::new("banner", Severity::Info, "a.example.com"));

        results.recompute_summary();

        assert_eq!(results.summary.total_hosts, 2);
        assert_eq!(results.summary.alive_hosts, 1);
        assert_eq!(results.summary.total_ports, 2);
        assert_eq!(results.summary.open_ports, 1);
        assert_eq!(results.summary.total_vulns, 3);
        assert_eq!(results.summary.critical_vulns, 1);
        assert_eq!(results.summary.medium_vulns, 1);
        assert_eq!(results.summary.high_vulns, 0);
        assert_eq!(results.summary.exploitable_vulns, 1);
    }

    #[test]
    fn test_recompute_summary_is_idempotent() {
        let mut results = ScanResults::default();
        let mut host = HostResult::named("a.example.com");
        host.ports.push(open_port(443));
        results.hosts.push(host);
        results
            .vulnerabilities
            .push(Vulnerability::new("xss", Severity::High, "a.example.com"));

        results.summary.high_risk_vulns = 4;
        results.summary.risk_score = 42.5;

        results.recompute_summary();
        let first = results.summary.clone();
        results.recompute_summary();

        assert_eq!(results.summary, first);
        assert_eq!(results.summary.high_risk_vulns, 4, "scoring-owned counter preserved");
        assert_eq!(results.summary.risk_score, 42.5);
    }

    #[tokio::test]
    async fn test_audit_trail_records_names() {
        let scan = test_scan();
        scan.results.record_module("subfinder").await;
        scan.results.record_module("nmap").await;

        let results = scan.results.snapshot().await;
        assert_eq!(results.summary.modules_executed, vec!["subfinder", "nmap"]);
    }

    #[tokio::test]
    async fn test_context_signals() {
        let scan = test_scan();

        scan.context.set_supply_chain_drift(0.5).await;
        assert_eq!(scan.context.supply_chain_drift().await, Some(0.5));

        // Repeated targets dedup; first-insertion order is kept.
        scan.context.add_web_target("http://a.example.com".to_string()).await;
        scan.context.add_web_target("http://a.example.com".to_string()).await;
        assert_eq!(scan.context.web_targets().await.len(), 1);
    }

    #[test]
    fn test_scan_identity() {
        let scan = Scan::new(ScanConfig::default());
        assert_eq!(scan.id.len(), 36);
        assert_eq!(scan.short_id().len(), 8);
    }
}
