//! Node-level operations (C6): the trait every upgrade step drives, and the
//! data it reports back. Backed by local-supervisor clients in
//! `crate::supervisor`.

use crate::errors::RuntimeError;
use crate::topology::NodeRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Running,
    Stopped,
    Starting,
    Stopping,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct NodeStatusReport {
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub version: Option<String>,
}

/// Every action the orchestrator performs against a single node, expressed
/// as a trait so the dual-supervisor protocol can be driven identically
/// against whichever supervisor generation (old binary's or new binary's)
/// currently owns the process.
#[async_trait]
pub trait NodeOperations: Send + Sync {
    fn node(&self) -> &NodeRef;

    async fn stop(&self) -> Result<(), RuntimeError>;

    async fn start(&self) -> Result<(), RuntimeError>;

    async fn restart(&self) -> Result<(), RuntimeError> {
        self.stop().await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        self.start().await
    }

    async fn status(&self) -> Result<NodeStatusReport, RuntimeError>;

    /// Poll `status` until it reports `Running`, or time out.
    async fn wait_healthy(&self, timeout: Duration, poll_interval: Duration) -> Result<(), RuntimeError> {
        let started = std::time::Instant::now();
        loop {
            if let Ok(report) = self.status().await {
                if report.state == ProcessState::Running {
                    return Ok(());
                }
            }
            if started.elapsed() >= timeout {
                return Err(RuntimeError::HealthCheckTimeout {
                    node: self.node().id(),
                    timeout_secs: timeout.as_secs(),
                    detail: String::new(),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Stage the binaries for `version` on disk without touching the live
    /// process; idempotent if already staged.
    async fn prepare_binaries(&self, version: &str) -> Result<(), RuntimeError>;

    /// Rewrite this node's config file fields (e.g. `featureCompatibilityVersion`
    /// hints, port) that change across the upgrade, in place.
    async fn update_node_config(&self, version: &str) -> Result<(), RuntimeError>;

    /// Read back the running binary's reported version and compare to `expected`.
    async fn verify_version(&self, expected: &str) -> Result<(), RuntimeError>;

    /// Run the version-environment Stage/Expose steps (C7) for this node.
    async fn setup_version_env(&self, version: &str) -> Result<(), RuntimeError>;

    /// Run the version-environment Launch/Migrate/Promote steps (C7) for this node.
    async fn switch_to_new_version(&self, version: &str) -> Result<(), RuntimeError>;

    /// Remove the now-unused previous version's staged environment.
    async fn cleanup_old_version(&self, version: &str) -> Result<(), RuntimeError>;
}
