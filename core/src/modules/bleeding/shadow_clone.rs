/// Response parity checking against previously probed endpoints.
///
/// Re-requests every recorded web application and compares status codes
/// with the first pass. Divergence suggests load-balancer asymmetry,
/// selective blocking, or an environment that changed mid-scan.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info};

use crate::core::cancel::CancelToken;
use crate::core::state::{CloneParity, Scan};
use crate::modules::{Module, ModuleCategory};

pub struct ShadowCloneModule;

impl ShadowCloneModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShadowCloneModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for ShadowCloneModule {
    fn name(&self) -> &str {
        "shadow-clone"
    }

    fn description(&self) -> &str {
        "Response parity verification across repeat probes"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if !scan.config.shadow_clone {
            bail!("shadow clone verification not enabled");
        }
        Ok(())
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;
        let expected: Vec<(String, u16)> = snapshot
            .hosts
            .iter()
            .flat_map(|h| h.web_apps.iter())
            .map(|w| (w.url.clone(), w.status_code))
            .collect();

        if expected.is_empty() {
            debug!("shadow-clone: no web applications recorded, nothing to verify");
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(scan.config.timeout))
            .danger_accept_invalid_certs(true)
            .build()
            .context("building http client")?;

        let mut observed = Vec::with_capacity(expected.len());
        for (url, _) in &expected {
            if cancel.is_cancelled() {
                debug!("shadow-clone: cancellation observed, stopping verification");
                break;
            }
            let status = client
                .get(url)
                .send()
                .await
                .ok()
                .map(|r| r.status().as_u16());
            observed.push((url.clone(), status));
        }

        let parity = compare_parity(&expected, &observed);
        info!(
            "shadow-clone: {} endpoint(s) checked, {} mismatched",
            parity.checked,
            parity.mismatched.len()
        );

        scan.results
            .update(|results| {
                results.side_channel.clone_parity = Some(parity);
            })
            .await;

        Ok(())
    }
}

/// Pairs expected statuses with the re-probe outcome. An endpoint that no
/// longer answers counts as mismatched.
fn compare_parity(expected: &[(String, u16)], observed: &[(String, Option<u16>)]) -> CloneParity {
    let mut mismatched = Vec::new();

    for (url, status) in observed {
        let first_pass = expected
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, s)| *s);
        match (first_pass, status) {
            (Some(was), Some(now)) if was == *now => {}
            _ => mismatched.push(url.clone()),
        }
    }

    CloneParity {
        checked: observed.len(),
        mismatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(pairs: &[(&str, u16)]) -> Vec<(String, u16)> {
        pairs.iter().map(|(u, s)| (u.to_string(), *s)).collect()
    }

    #[test]
    fn test_matching_statuses_produce_no_mismatch() {
        let expected = urls(&[("https://a", 200), ("https://b", 301)]);
        let observed = vec![
            ("https://a".to_string(), Some(200)),
            ("https://b".to_string(), Some(301)),
        ];
        let parity = compare_parity(&expected, &observed);
        assert_eq!(parity.checked, 2);
        assert!(parity.mismatched.is_empty());
    }

    #[test]
    fn test_changed_status_is_mismatch() {
        let expected = urls(&[("https://a", 200)]);
        let observed = vec![("https://a".to_string(), Some(403))];
        let parity = compare_parity(&expected, &observed);
        assert_eq!(parity.mismatched, vec!["https://a"]);
    }

    #[test]
    fn test_dead_endpoint_is_mismatch() {
        let expected = urls(&[("https://a", 200)]);
        let observed = vec![("https://a".to_string(), None)];
        let parity = compare_parity(&expected, &observed);
        assert_eq!(parity.mismatched, vec!["https://a"]);
    }

    #[test]
    fn test_partial_observation_counts_only_probed() {
        let expected = urls(&[("https://a", 200), ("https://b", 200)]);
        let observed = vec![("https://a".to_string(), Some(200))];
        let parity = compare_parity(&expected, &observed);
        assert_eq!(parity.checked, 1);
        assert!(parity.mismatched.is_empty());
    }
}
