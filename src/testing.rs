//! Test doubles for the orchestrator's external collaborators (C5/C6/C7's
//! fakeable seams): a fake node executor, a fake cluster probe, and a
//! no-op supervisor launcher, so end-to-end upgrade scenarios can run
//! against in-memory state instead of a live `mongod`/`supervisord`.

use crate::errors::RuntimeError;
use crate::mongo::{ClusterOps, MemberStatus, ReplicationLag};
use crate::node_ops::{NodeOperations, NodeStatusReport, ProcessState};
use crate::state::FailoverEvent;
use crate::supervisor::SupervisorLauncher;
use crate::topology::{NodeRef, TopologyKind};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

/// A `NodeOperations` backend that records its own running state and always
/// succeeds. Useful for driving full upgrade phases without a real
/// supervisor-controlled `mongod`.
pub struct FakeNodeOperations {
    node: NodeRef,
    running: Mutex<bool>,
}

impl FakeNodeOperations {
    pub fn new(node: NodeRef) -> Self {
        Self {
            node,
            running: Mutex::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }
}

#[async_trait]
impl NodeOperations for FakeNodeOperations {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        *self.running.lock().unwrap() = false;
        Ok(())
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        *self.running.lock().unwrap() = true;
        Ok(())
    }

    async fn status(&self) -> Result<NodeStatusReport, RuntimeError> {
        let state = if self.is_running() {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        };
        Ok(NodeStatusReport {
            state,
            pid: Some(1),
            uptime_secs: Some(0),
            version: None,
        })
    }

    async fn prepare_binaries(&self, _version: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn update_node_config(&self, _version: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn verify_version(&self, _expected: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn setup_version_env(&self, _version: &str) -> Result<(), RuntimeError> {
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

/// How a fake's `stepdown_primary` should respond: elect a specific member,
/// or never see a new primary (driving the timeout path).
#[derive(Debug, Clone)]
pub enum StepdownBehavior {
    Elects(NodeRef),
    TimesOut,
}

/// A `ClusterOps` backend driven entirely by in-memory fixtures: FCV state
/// and a fixed replica-set member list, with a configurable stepdown outcome.
pub struct FakeClusterProbe {
    fcv: Mutex<String>,
    rs_members: Mutex<Vec<MemberStatus>>,
    stepdown: StepdownBehavior,
    healthy: bool,
}

impl FakeClusterProbe {
    pub fn new(fcv: impl Into<String>) -> Self {
        Self {
            fcv: Mutex::new(fcv.into()),
            rs_members: Mutex::new(Vec::new()),
            stepdown: StepdownBehavior::TimesOut,
            healthy: true,
        }
    }

    pub fn with_replica_set_members(mut self, members: Vec<MemberStatus>) -> Self {
        self.rs_members = Mutex::new(members);
        self
    }

    pub fn with_stepdown_behavior(mut self, behavior: StepdownBehavior) -> Self {
        self.stepdown = behavior;
        self
    }

    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}

#[async_trait]
impl ClusterOps for FakeClusterProbe {
    async fn get_fcv(&self) -> Result<String, RuntimeError> {
        Ok(self.fcv.lock().unwrap().clone())
    }

    async fn set_fcv(&self, target: &str, _target_major: u32) -> Result<(), RuntimeError> {
        *self.fcv.lock().unwrap() = target.to_string();
        Ok(())
    }

    async fn rs_status(&self, _replica_set: &str, _hosts: &[NodeRef]) -> Result<Vec<MemberStatus>, RuntimeError> {
        Ok(self.rs_members.lock().unwrap().clone())
    }

    async fn stepdown_primary(
        &self,
        primary: &NodeRef,
        replica_set: &str,
        _hosts: &[NodeRef],
    ) -> Result<FailoverEvent, RuntimeError> {
        match &self.stepdown {
            StepdownBehavior::Elects(new_primary) => {
                let mut members = self.rs_members.lock().unwrap();
                for member in members.iter_mut() {
                    member.is_primary = member.host == new_primary.host && member.port == new_primary.port;
                }
                Ok(FailoverEvent {
                    ts: chrono::Utc::now(),
                    replica_set: replica_set.to_string(),
                    old_primary: primary.id(),
                    new_primary: new_primary.id(),
                    reason: "controlled stepdown".to_string(),
                    election_time_ms: 5,
                })
            }
            StepdownBehavior::TimesOut => Err(RuntimeError::StepdownTimeout {
                primary: primary.id(),
                timeout_secs: 30,
            }),
        }
    }

    async fn replication_lag(&self, _kind: TopologyKind) -> Result<ReplicationLag, RuntimeError> {
        Ok(ReplicationLag::Seconds(0.0))
    }

    async fn check_cluster_health(&self, _kind: TopologyKind) -> Result<(), RuntimeError> {
        if self.healthy {
            Ok(())
        } else {
            Err(RuntimeError::MongoCommandError {
                command: "check_cluster_health".into(),
                message: "fake cluster marked unhealthy".into(),
            })
        }
    }
}

/// A `SupervisorLauncher` that never shells out; every launch succeeds
/// immediately.
pub struct FakeSupervisorLauncher;

#[async_trait]
impl SupervisorLauncher for FakeSupervisorLauncher {
    async fn launch(&self, _ini_path: &Path) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Build a `MemberStatus` fixture for a replica-set member, for tests that
/// seed `FakeClusterProbe::with_replica_set_members`.
pub fn member(node: &NodeRef, is_primary: bool) -> MemberStatus {
    MemberStatus {
        host: node.host.clone(),
        port: node.port,
        state_code: if is_primary { 1 } else { 2 },
        state_name: if is_primary { "PRIMARY".to_string() } else { "SECONDARY".to_string() },
        health: 1.0,
        is_primary,
        optime_secs: Some(0),
    }
}
