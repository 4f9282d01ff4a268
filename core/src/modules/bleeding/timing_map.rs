/// Connect-time side-channel mapping of open ports.
///
/// Samples TCP connect latency for every open port and records the
/// min/max/jitter profile. High jitter on a single port is flagged as an
/// informational finding since it often marks a tarpit, an inline IPS,
/// or per-source rate shaping.

use std::time::Instant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, info};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

use crate::core::cancel::CancelToken;
use crate::core::state::{PortState, PortTiming, Scan, TimingProfile, Vulnerability};
use crate::core::Severity;
use crate::modules::{Module, ModuleCategory};

const SAMPLES_PER_PORT: usize = 3;
const MAX_PORTS: usize = 32;
const JITTER_FLAG_MS: u64 = 50;

pub struct TimingMapModule;

impl TimingMapModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TimingMapModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for TimingMapModule {
    fn name(&self) -> &str {
        "timing-map"
    }

    fn description(&self) -> &str {
        "TCP connect-time profiling for side-channel signals"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if !scan.config.timing_map {
            bail!("timing map not enabled");
        }
        Ok(())
    }

    async fn run(&self, cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;
        let endpoints: Vec<(String, u16)> = snapshot
            .hosts
            .iter()
            .flat_map(|h| {
                h.ports
                    .iter()
                    .filter(|p| p.state == PortState::Open)
                    .map(|p| (h.hostname.clone(), p.port))
            })
            .take(MAX_PORTS)
            .collect();

        if endpoints.is_empty() {
            debug!("timing-map: no open ports to profile");
            return Ok(());
        }

        let connect_timeout = Duration::from_secs(scan.config.timeout);
        let mut samples = Vec::new();

        for (host, port) in endpoints {
            if cancel.is_cancelled() {
                debug!("timing-map: cancellation observed, stopping profiling");
                break;
            }

            let mut times_ms = Vec::with_capacity(SAMPLES_PER_PORT);
            for _ in 0..SAMPLES_PER_PORT {
                let started = Instant::now();
                let connected = timeout(connect_timeout, TcpStream::connect((host.as_str(), port)))
                    .await;
                if matches!(connected, Ok(Ok(_))) {
                    times_ms.push(started.elapsed().as_millis() as u64);
                }

                // Small random gap so samples do not land in one burst
                let pause = rand::rng().random_range(10..50u64);
                sleep(Duration::from_millis(pause)).await;
            }

            if let Some((min_ms, max_ms, jitter_ms)) = summarize(&times_ms) {
                if jitter_ms > JITTER_FLAG_MS {
                    let mut vuln = Vulnerability::new(
                        "High connect-time jitter",
                        Severity::Info,
                        &host,
                    );
                    vuln.port = Some(port);
                    vuln.description = format!(
                        "TCP connect jitter of {}ms on port {} suggests a tarpit, inline inspection, or rate shaping.",
                        jitter_ms, port
                    );
                    scan.results.add_vulnerability(vuln).await;
                }

                samples.push(PortTiming {
                    host: host.clone(),
                    port,
                    min_ms,
                    max_ms,
                    jitter_ms,
                });
            }
        }

        info!("timing-map: profiled {} port(s)", samples.len());
        scan.results
            .update(|results| {
                results.side_channel.timing = Some(TimingProfile { samples });
            })
            .await;

        Ok(())
    }
}

/// (min, max, jitter) of the collected samples, None when every connect
/// attempt failed.
fn summarize(times_ms: &[u64]) -> Option<(u64, u64, u64)> {
    let min = *times_ms.iter().min()?;
    let max = *times_ms.iter().max()?;
    Some((min, max, max - min))
}
