/// Remediation drafting for recorded findings.
///
/// Matches each finding against a small rule table and emits a patch
/// recommendation: a code-level fix, a WAF virtual patch, or a
/// configuration change. One recommendation per finding at most.

use std::collections::HashSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;

use crate::core::cancel::CancelToken;
use crate::core::state::{PatchKind, PatchRecommendation, Scan, Vulnerability};
use crate::modules::{Module, ModuleCategory};

pub struct AutoPatchModule;

impl AutoPatchModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AutoPatchModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for AutoPatchModule {
    fn name(&self) -> &str {
        "auto-patch"
    }

    fn description(&self) -> &str {
        "Draft remediation patches and WAF rules for findings"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if !scan.config.generate_patch {
            bail!("patch generation not enabled");
        }
        Ok(())
    }

    async fn run(&self, _cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;
        let already_patched: HashSet<String> =
            snapshot.patches.iter().map(|p| p.vuln_id.clone()).collect();

        let mut drafted = 0usize;
        for vuln in &snapshot.vulnerabilities {
            if already_patched.contains(&vuln.id) {
                continue;
            }
            if let Some(patch) = recommend(vuln) {
                scan.results.add_patch(patch).await;
                drafted += 1;
            }
        }

        info!("auto-patch: drafted {} recommendation(s)", drafted);
        Ok(())
    }
}

/// Rule table mapping finding classes to remediations. Returns None when
/// no class matches and the finding is not exploitable.
fn recommend(vuln: &Vulnerability) -> Option<PatchRecommendation> {
    let haystack = format!(
        "{} {} {}",
        vuln.name,
        vuln.description,
        vuln.template.as_deref().unwrap_or("")
    )
    .to_lowercase();

    let (kind, description, waf_rule, confidence) = if haystack.contains("sql") {
        (
            PatchKind::Code,
            "Replace string-built queries with parameterized statements and reject unexpected input types.",
            Some(r#"SecRule ARGS "@detectSQLi" "id:942100,phase:2,deny,msg:'SQL injection'""#),
            0.9,
        )
    } else if haystack.contains("xss") || haystack.contains("cross-site scripting") {
        (
            PatchKind::Code,
            "Context-encode all user-controlled output and set a restrictive Content-Security-Policy.",
            Some(r#"SecRule ARGS "@detectXSS" "id:941100,phase:2,deny,msg:'XSS'""#),
            0.9,
        )
    } else if haystack.contains("rce")
        || haystack.contains("command injection")
        || haystack.contains("log4j")
    {
        (
            PatchKind::Config,
            "Upgrade the affected component to a patched release and restrict outbound connections from the host.",
            None,
            0.85,
        )
    } else if haystack.contains("tls") || haystack.contains("ssl") {
        (
            PatchKind::Config,
            "Disable legacy protocol versions and weak cipher suites in the server TLS configuration.",
            None,
            0.8,
        )
    } else if haystack.contains("default login")
        || haystack.contains("default credential")
        || haystack.contains("default-login")
    {
        (
            PatchKind::Config,
            "Rotate the default credentials and enforce unique per-instance secrets at deploy time.",
            None,
            0.9,
        )
    } else if vuln.exploitable {
        (
            PatchKind::WafRule,
            "No class-specific fix known; deploy a virtual patch scoped to the affected endpoint while a vendor fix is prepared.",
            Some(r#"SecRule REQUEST_URI "@contains /" "id:900001,phase:1,deny,msg:'virtual patch'""#),
            0.5,
        )
    } else {
        return None;
    };

    Some(PatchRecommendation {
        vuln_id: vuln.id.clone(),
        kind,
        description: description.to_string(),
        diff: None,
        waf_rule: waf_rule.map(String::from),
        confidence,
    })
}
