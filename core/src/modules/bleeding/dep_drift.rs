/// Supply-chain drift estimation from detected service versions.
///
/// Treats the fraction of services with no identifiable version as a
/// drift signal: unversioned surfaces cannot be matched against advisory
/// feeds, so their patch state is unknown. The resulting coefficient
/// feeds the risk scoring phase through the shared context.

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::info;

use crate::core::cancel::CancelToken;
use crate::core::state::{DriftReport, Scan};
use crate::modules::{Module, ModuleCategory};

pub struct DepDriftModule;

impl DepDriftModule {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DepDriftModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for DepDriftModule {
    fn name(&self) -> &str {
        "dep-drift"
    }

    fn description(&self) -> &str {
        "Supply-chain drift estimation from service inventory"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::BleedingEdge
    }

    fn prerequisites(&self, scan: &Scan) -> Result<()> {
        if !scan.config.dep_drift {
            bail!("dependency drift analysis not enabled");
        }
        Ok(())
    }

    async fn run(&self, _cancel: &CancelToken, scan: &Scan) -> Result<()> {
        let snapshot = scan.results.snapshot().await;

        let services_total: usize = snapshot.hosts.iter().map(|h| h.services.len()).sum();
        let services_versioned: usize = snapshot
            .hosts
            .iter()
            .flat_map(|h| h.services.iter())
            .filter(|s| s.version.is_some())
            .count();

        let drift = compute_drift(services_total, services_versioned);
        info!(
            "dep-drift: {:.2} ({}/{} services versioned)",
            drift, services_versioned, services_total
        );

        scan.context.set_supply_chain_drift(drift).await;
        scan.results
            .update(|results| {
                results.side_channel.drift = Some(DriftReport {
                    services_total,
                    services_versioned,
                    drift,
                });
            })
            .await;

        Ok(())
    }
}

/// Drift is the unversioned fraction of the service inventory, 0.0 when
/// nothing was inventoried.
fn compute_drift(total: usize, versioned: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (total - versioned.min(total)) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inventory_has_no_drift() {
        assert_eq!(compute_drift(0, 0), 0.0);
    }

    #[test]
    fn test_fully_versioned_inventory_has_no_drift() {
        assert_eq!(compute_drift(4, 4), 0.0);
    }

    #[test]
    fn test_unversioned_fraction() {
        assert_eq!(compute_drift(4, 1), 0.75);
        assert_eq!(compute_drift(2, 1), 0.5);
    }

    #[test]
    fn test_versioned_count_clamped_to_total() {
        assert_eq!(compute_drift(2, 5), 0.0);
    }
}
