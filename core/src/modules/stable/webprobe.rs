/// In-process HTTP probing of discovered hosts.
///
/// Tries https then http for every host, records responsive endpoints as
/// web applications, and feeds their URLs into the shared context for the
/// vulnerability assessment phase. Requests share the adaptive throttle
/// and, in stealth mode, rotate through a User-Agent pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info};
use rand::prelude::IndexedRandom;
use regex::Regex;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::core::state::{HostResult, Scan, WebAppResult};
use crate::core::throttle::ThrottleController;
use crate::modules::{Module, ModuleCategory};

const DEFAULT_USER_AGENT: &str = "harrier/0.3";

// Randomized User-Agent pool for fingerprint evasion
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
     Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

pub struct WebProbeModule;

impl WebProbeModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebProbeModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for WebProbeModule {
    fn name(&self) -> &str {
        "webprobe"
    }

    fn description(&self) -> &str {
        "HTTP service probing and technology fingerprinting"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Stable
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;
        let mut hosts: Vec<String> = snapshot.hosts.iter().map(|h| h.hostname.clone()).collect();
        if hosts.is_empty() {
            hosts = scan.targets.clone();
        }

        let candidates = candidate_urls(&hosts);
        if candidates.is_empty() {
            debug!("webprobe: nothing to probe");
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(scan.config.timeout))
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building http client")?;

        let throttle = Arc::new(ThrottleController::new(
            scan.config.rate_limit as u32,
            scan.config.no_throttle,
        ));
        let stealth = scan.config.stealth;
        let concurrency = scan.config.threads.clamp(1, 64);

        let probed: Vec<WebAppResult> = stream::iter(candidates)
            .map(|url| {
                let client = client.clone();
                let throttle = Arc::clone(&throttle);
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    throttle.wait().await;
                    probe_one(&client, &throttle, &url, stealth).await
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        info!("webprobe: {} responsive endpoint(s)", probed.len());

        for webapp in probed {
            let hostname = match Url::parse(&webapp.url)
                .ok()
                .and_then(|u| u.host_str().map(String::from))
            {
                Some(h) => h,
                None => continue,
            };

            scan.context.add_web_target(webapp.url.clone()).await;
            scan.results
                .update(|results| {
                    let idx = match results.hosts.iter().position(|h| h.hostname == hostname) {
                        Some(i) => i,
                        None => {
                            results.hosts.push(HostResult::named(&hostname));
                            results.hosts.len() - 1
                        }
                    };
                    results.hosts[idx].web_apps.push(webapp);
                })
                .await;
        }

        Ok(())
    }
}

async fn probe_one(
    client: &reqwest::Client,
    throttle: &ThrottleController,
    url: &str,
    stealth: bool,
) -> Option<WebAppResult> {
    let ua = if stealth {
        pick_user_agent()
    } else {
        DEFAULT_USER_AGENT
    };

    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, ua)
        .send()
        .await
        .ok()?;

    let status = response.status().as_u16();
    throttle.record_response(status);

    let server = response
        .headers()
        .get("server")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let powered_by = response
        .headers()
        .get("x-powered-by")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = response.text().await.unwrap_or_default();

    Some(WebAppResult {
        url: url.to_string(),
        status_code: status,
        title: extract_title(&body),
        server: server.clone(),
        technologies: detect_technologies(server.as_deref(), powered_by.as_deref()),
    })
}

fn pick_user_agent() -> &'static str {
    let mut rng = rand::rng();
    USER_AGENTS.choose(&mut rng).unwrap_or(&DEFAULT_USER_AGENT)
}

/// Builds the probe list: targets that already carry a scheme pass through,
/// bare hosts expand to https and http variants. Order-preserving dedup.
fn candidate_urls(hosts: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for host in hosts {
        let variants: Vec<String> = if host.starts_with("http://") || host.starts_with("https://") {
            vec![host.clone()]
        } else {
            vec![format!("https://{}", host), format!("http://{}", host)]
        };
        for url in variants {
            if seen.insert(url.clone()) {
                out.push(url);
            }
        }
    }
    out
}

fn extract_title(body: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let captures = re.captures(body)?;
    let title = captures.get(1)?.as_str().trim();
    if title.is_empty() {
        None
    } else {
        Some(title.chars().take(120).collect())
    }
}

fn detect_technologies(server: Option<&str>, powered_by: Option<&str>) -> Vec<String> {
    let mut techs = Vec::new();

    if let Some(server) = server {
        let lowered = server.to_lowercase();
        if lowered.contains("nginx") {
            techs.push("nginx".to_string());
        } else if lowered.contains("apache") {
            techs.push("Apache httpd".to_string());
        } else if lowered.contains("iis") {
            techs.push("Microsoft IIS".to_string());
        } else if !server.is_empty() {
            techs.push(server.to_string());
        }
    }

    if let Some(powered_by) = powered_by {
        if !powered_by.is_empty() {
            techs.push(powered_by.to_string());
        }
    }

    techs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_expand_bare_hosts() {
        let hosts = vec!["example.com".to_string()];
        assert_eq!(
            candidate_urls(&hosts),
            vec!["https://example.com", "http://example.com"]
        );
    }

    #[test]
    fn test_candidate_urls_keep_explicit_schemes() {
        let hosts = vec![
            "http://example.com:8080".to_string(),
            "example.com".to_string(),
            "example.com".to_string(),
        ];
        let urls = candidate_urls(&hosts);
        assert_eq!(
            urls,
            vec![
                "http://example.com:8080",
                "https://example.com",
                "http://example.com"
            ]
        );
    }

    #[test]
    fn test_extract_title() {
        let body = "<html><head><TITLE>  Login Portal </TITLE></head></html>";
        assert_eq!(extract_title(body).as_deref(), Some("Login Portal"));
        assert_eq!(extract_title("<html></html>"), None);
        assert_eq!(extract_title("<title></title>"), None);
    }

    #[test]
    fn test_detect_technologies_from_headers() {
        let techs = detect_technologies(Some("nginx/1.18.0"), Some("PHP/8.1"));
        assert_eq!(techs, vec!["nginx", "PHP/8.1"]);

        let techs = detect_technologies(Some("Custom-Server"), None);
        assert_eq!(techs, vec!["Custom-Server"]);

        assert!(detect_technologies(None, None).is_empty());
    }
}
