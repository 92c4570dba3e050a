//! Local supervisor client: drives `supervisorctl` against the control port
//! of one version's `supervisor.ini`, implementing [`NodeOperations`] over
//! two supervisor generations (old = current, new = next).

use crate::errors::RuntimeError;
use crate::node_ops::{NodeOperations, NodeStatusReport, ProcessState};
use crate::topology::NodeRef;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Start a supervisor daemon against a staged `supervisor.ini`. `supervisord`
/// daemonizes itself, so this returns once the parent process has forked.
pub async fn launch_supervisor(ini_path: &Path) -> Result<(), RuntimeError> {
    let output = Command::new("supervisord")
        .arg("-c")
        .arg(ini_path)
        .output()
        .await
        .map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RuntimeError::SupervisorError(format!(
            "supervisord failed to launch against {}: {stderr}",
            ini_path.display()
        )));
    }
    Ok(())
}

/// Abstracts over starting a supervisor daemon so the orchestrator can be
/// driven in tests without shelling out to a real `supervisord` binary.
#[async_trait]
pub trait SupervisorLauncher: Send + Sync {
    async fn launch(&self, ini_path: &Path) -> Result<(), RuntimeError>;
}

pub struct RealSupervisorLauncher;

#[async_trait]
impl SupervisorLauncher for RealSupervisorLauncher {
    async fn launch(&self, ini_path: &Path) -> Result<(), RuntimeError> {
        launch_supervisor(ini_path).await
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    pub control_port: u16,
    pub ini_path: PathBuf,
}

impl SupervisorHandle {
    fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.control_port)
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.ctl(&["shutdown"]).await.map(|_| ())
    }

    async fn ctl(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = Command::new("supervisorctl")
            .arg("-c")
            .arg(&self.ini_path)
            .arg("-s")
            .arg(self.endpoint())
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::SupervisorError(format!(
                "supervisorctl {args:?} failed: {stderr}"
            )));
        }
        Ok(stdout)
    }
}

pub struct LocalNodeOperations {
    node: NodeRef,
    program: String,
    old: SupervisorHandle,
    new: SupervisorHandle,
}

impl LocalNodeOperations {
    pub fn new(node: NodeRef, program: String, old: SupervisorHandle, new: SupervisorHandle) -> Self {
        Self { node, program, old, new }
    }

    fn parse_status(line: &str) -> NodeStatusReport {
        let mut parts = line.split_whitespace();
        let _name = parts.next();
        let state_word = parts.next().unwrap_or("UNKNOWN");
        let state = match state_word {
            "RUNNING" => ProcessState::Running,
            "STOPPED" | "EXITED" | "FATAL" => ProcessState::Stopped,
            "STARTING" => ProcessState::Starting,
            "STOPPING" => ProcessState::Stopping,
            _ => ProcessState::Unknown,
        };
        let pid = line
            .split("pid ")
            .nth(1)
            .and_then(|s| s.trim_end_matches(',').parse().ok());
        NodeStatusReport {
            state,
            pid,
            uptime_secs: None,
            version: None,
        }
    }
}

#[async_trait]
impl NodeOperations for LocalNodeOperations {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        self.old.ctl(&["stop", &self.program]).await.map(|_| ())
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.new.ctl(&["start", &self.program]).await.map(|_| ())
    }

    async fn status(&self) -> Result<NodeStatusReport, RuntimeError> {
        if let Ok(out) = self.new.ctl(&["status", &self.program]).await {
            if !out.trim().is_empty() {
                return Ok(Self::parse_status(&out));
            }
        }
        let out = self.old.ctl(&["status", &self.program]).await?;
        Ok(Self::parse_status(&out))
    }

    async fn prepare_binaries(&self, version: &str) -> Result<(), RuntimeError> {
        let bin = self.new.ini_path.parent().map(|p| p.join("bin").join("mongod"));
        match bin {
            Some(p) if p.exists() => Ok(()),
            _ => Err(RuntimeError::BinaryPrepError {
                version: version.to_string(),
                message: "mongod binary missing from staged version directory".into(),
            }),
        }
    }

    async fn update_node_config(&self, _version: &str) -> Result<(), RuntimeError> {
        // Configuration is regenerated wholesale during staging (C7); nothing
        // further to do per node at this point in the protocol.
        Ok(())
    }

    async fn verify_version(&self, expected: &str) -> Result<(), RuntimeError> {
        let bin = self
            .new
            .ini_path
            .parent()
            .ok_or_else(|| RuntimeError::SupervisorError("no version directory for new supervisor".into()))?
            .join("bin")
            .join("mongod");
        let output = Command::new(&bin)
            .arg("--version")
            .output()
            .await
            .map_err(|e| RuntimeError::SupervisorError(e.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.contains(expected) {
            return Err(RuntimeError::SupervisorError(format!(
                "node {} reports a version other than {expected}: {stdout}",
                self.node.id()
            )));
        }
        Ok(())
    }

    async fn setup_version_env(&self, _version: &str) -> Result<(), RuntimeError> {
        // Cluster-wide staging (Stage/Expose/Launch) is orchestrated once,
        // ahead of any per-node call; see `crate::version_env`.
        Ok(())
    }

    async fn switch_to_new_version(&self, _version: &str) -> Result<(), RuntimeError> {
        self.stop().await?;
        self.start().await
    }

    async fn cleanup_old_version(&self, _version: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_recognizes_running_with_pid() {
        let report = LocalNodeOperations::parse_status("mongod-27017 RUNNING pid 1234, uptime 0:01:02");
        assert_eq!(report.state, ProcessState::Running);
        assert_eq!(report.pid, Some(1234));
    }

    #[test]
    fn parse_status_recognizes_stopped() {
        let report = LocalNodeOperations::parse_status("mongod-27017 STOPPED Not started");
        assert_eq!(report.state, ProcessState::Stopped);
    }

    #[test]
    fn parse_status_falls_back_to_unknown() {
        let report = LocalNodeOperations::parse_status("");
        assert_eq!(report.state, ProcessState::Unknown);
    }
}
