//! Phased Orchestrator (C9): the top-level state machine. Reads prior state
//! from the state store, validates the requested path, probes the cluster,
//! then drives phases that delegate to the replica-set protocol and
//! individual node operations. Every phase and node transition is
//! checkpointed; hooks fire at each boundary; the prompter can gate any of
//! them.

pub mod plan;
pub mod preflight;

use crate::config::Config;
use crate::errors::{ControlFlowError, RuntimeError};
use crate::hooks::registry::HookRegistry;
use crate::hooks::types::{HookContext, HookEvent};
use crate::hooks::wait::{WaitKind, WaitManager};
use crate::mongo::ClusterOps;
use crate::node_ops::NodeOperations;
use crate::progress::MultiNodeProgress;
use crate::prompt::{PromptBoundary, PromptResponse, Prompter};
use crate::replica_set;
use crate::state::model::{NodeRole, NodeState, NodeStatus, OverallStatus, PhaseState, PhaseStatus, UpgradeState};
use crate::state::store::StateStore;
use crate::supervisor::{SupervisorHandle, SupervisorLauncher};
use crate::topology::{NodeRef, Topology, TopologyKind};
use crate::version::Version;
use crate::version_env::VersionEnv;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    ControlFlow(#[from] ControlFlowError),
}

pub struct Orchestrator {
    pub config: Config,
    pub cluster_name: String,
    topology: Topology,
    store: StateStore,
    hooks: HookRegistry,
    wait: WaitManager,
    prompter: Prompter,
    probe: Box<dyn ClusterOps>,
    version_env: VersionEnv,
    nodes: HashMap<String, Box<dyn NodeOperations>>,
    old_supervisor: SupervisorHandle,
    new_supervisor: Option<SupervisorHandle>,
    launcher: Box<dyn SupervisorLauncher>,
    cancel: CancellationToken,
    progress: MultiNodeProgress,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        cluster_name: String,
        topology: Topology,
        hooks: HookRegistry,
        prompter: Prompter,
        probe: Box<dyn ClusterOps>,
        nodes: HashMap<String, Box<dyn NodeOperations>>,
        old_supervisor: SupervisorHandle,
        launcher: Box<dyn SupervisorLauncher>,
    ) -> Self {
        let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
        let version_env = VersionEnv::new(config.cluster_root.clone(), config.port_base);
        Self {
            config,
            cluster_name,
            topology,
            store,
            hooks,
            wait: WaitManager::new(),
            prompter,
            probe,
            version_env,
            nodes,
            old_supervisor,
            new_supervisor: None,
            launcher,
            cancel: CancellationToken::new(),
            progress: MultiNodeProgress::new(),
        }
    }

    /// Override the default pacing durations, e.g. to zero them out for a
    /// fast deterministic test run.
    pub fn with_wait_manager(mut self, wait: WaitManager) -> Self {
        self.wait = wait;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn new_supervisor_handle(&self) -> Option<&SupervisorHandle> {
        self.new_supervisor.as_ref()
    }

    pub fn dry_run_plan(&self, from: &Version, to: &Version) -> plan::Plan {
        plan::generate(&self.topology, from, to)
    }

    fn ctx(&self, event: HookEvent, phase: &str, state: &UpgradeState) -> HookContext {
        HookContext::new(&self.cluster_name, &state.previous_version, &state.target_version)
            .with_event(event)
            .with_phase(phase)
    }

    async fn fire(&self, event: HookEvent, phase: &str, state: &UpgradeState) -> Result<(), OrchestratorError> {
        let ctx = self.ctx(event, phase, state);
        let result = self.hooks.dispatch_tolerant(&ctx).await;
        if !result.should_continue() && !event.is_advisory() {
            return Err(RuntimeError::HookExecutionError {
                name: event.as_str().to_string(),
                message: result.message.unwrap_or_else(|| "hook blocked the upgrade".to_string()),
            }
            .into());
        }
        Ok(())
    }

    /// Begin a fresh upgrade, or resume one already in progress at the
    /// matching `from`/`to` pair.
    pub async fn run_upgrade(&mut self, from: Version, to: Version) -> Result<(), OrchestratorError> {
        let mut state = if self.store.exists() {
            self.store.load()?
        } else {
            self.store.init(&self.cluster_name, from.as_str(), to.as_str())
        };

        self.seed_node_states(&mut state, &from, &to);

        let meta_version = self.probe.get_fcv().await?;
        let node_refs: Vec<&dyn NodeOperations> = self.nodes.values().map(|b| b.as_ref()).collect();
        preflight::run(preflight::PreflightInputs {
            meta_version: &meta_version,
            from: &from,
            to: &to,
            topology_kind: self.topology.kind(),
            nodes: &node_refs,
            probe: self.probe.as_ref(),
            hooks: &self.hooks,
            config: &self.config,
        })
        .await?;

        self.fire(HookEvent::OnUpgradeStart, "pre-flight", &state).await?;

        let to_mm = to.major_minor_string();
        self.version_env.stage(&to_mm, &self.config.binary_cache_dir, &self.topology)?;
        self.version_env.expose(&to_mm)?;
        let ini_path = self.version_env.ini_path(&to_mm);
        self.launcher.launch(&ini_path).await?;
        self.new_supervisor = Some(SupervisorHandle {
            control_port: self.version_env.control_port(&to_mm),
            ini_path,
        });

        let run_result = self.run_phases(&mut state, &from, &to).await;

        match run_result {
            Ok(()) => {
                self.post_upgrade(&mut state, &to).await?;
                state.overall = OverallStatus::Completed;
                self.store.checkpoint(&mut state, "upgrade completed")?;
                self.store.archive(&state)?;
                self.fire(HookEvent::OnUpgradeComplete, "post-upgrade", &state).await?;
                Ok(())
            }
            Err(OrchestratorError::ControlFlow(err @ ControlFlowError::PausedByUser { .. })) => {
                // The pause point already recorded `Paused` and checkpointed
                // before raising this; overwriting it as Failed here would
                // make a paused-and-resumable run look like a dead one.
                self.version_env.abort()?;
                Err(err.into())
            }
            Err(err) => {
                self.version_env.abort()?;
                state.overall = OverallStatus::Failed;
                self.store.checkpoint(&mut state, "upgrade failed")?;
                let failed_phase = state.current_phase.clone();
                let _ = self.fire(HookEvent::OnUpgradeFailure, &failed_phase, &state).await;
                Err(err)
            }
        }
    }

    fn seed_node_states(&self, state: &mut UpgradeState, from: &Version, to: &Version) {
        for node in self.topology.all_nodes() {
            let node_id = node.id();
            state.nodes.entry(node_id).or_insert_with(|| {
                let role = if self.topology.mongos.contains(node) {
                    NodeRole::Mongos
                } else if !node.replica_set.is_empty() {
                    NodeRole::Secondary
                } else {
                    NodeRole::Standalone
                };
                NodeState::pending(from.as_str(), to.as_str(), role)
            });
        }
    }

    async fn run_phases(&mut self, state: &mut UpgradeState, from: &Version, to: &Version) -> Result<(), OrchestratorError> {
        let _ = (from, to);
        match self.topology.kind() {
            TopologyKind::Standalone => {
                let name = "shard-standalone".to_string();
                if !self.phase_already_done(state, &name) {
                    self.begin_phase(state, &name).await?;
                    let node = self.topology.mongod[0].clone();
                    let result = self.upgrade_node(state, &node, &name).await;
                    self.end_phase(state, &name, result).await?;
                }
            }
            TopologyKind::ReplicaSet => {
                for rs in self.topology.replica_set_names() {
                    let name = format!("shard-{rs}");
                    if self.phase_already_done(state, &name) {
                        continue;
                    }
                    self.begin_phase(state, &name).await?;
                    let result = self.upgrade_replica_set(state, rs.clone(), name.clone()).await;
                    self.end_phase(state, &name, result).await?;
                }
            }
            TopologyKind::Sharded => {
                if !self.topology.config_svr.is_empty() {
                    let name = "config-servers".to_string();
                    if !self.phase_already_done(state, &name) {
                        self.begin_phase(state, &name).await?;
                        let members = self.topology.config_svr.clone();
                        let result = self.upgrade_node_set(state, members, name.clone()).await;
                        self.end_phase(state, &name, result).await?;
                    }
                }
                for rs in self.topology.replica_set_names() {
                    let name = format!("shard-{rs}");
                    if self.phase_already_done(state, &name) {
                        continue;
                    }
                    self.begin_phase(state, &name).await?;
                    let result = self.upgrade_replica_set(state, rs.clone(), name.clone()).await;
                    self.end_phase(state, &name, result).await?;
                }
                let name = "mongos".to_string();
                if !self.phase_already_done(state, &name) {
                    self.begin_phase(state, &name).await?;
                    let members = self.topology.mongos.clone();
                    let result = self.upgrade_node_set(state, members, name.clone()).await;
                    self.end_phase(state, &name, result).await?;
                }
            }
        }
        Ok(())
    }

    fn phase_already_done(&self, state: &UpgradeState, name: &str) -> bool {
        state.phases.get(name).map(|p| p.status == PhaseStatus::Completed).unwrap_or(false)
    }

    async fn begin_phase(&mut self, state: &mut UpgradeState, name: &str) -> Result<(), OrchestratorError> {
        match self.prompter.confirm(PromptBoundary::Phase, &format!("proceed with phase {name}?"))? {
            PromptResponse::Pause => {
                state.overall = OverallStatus::Paused;
                state.paused_at = Some(chrono::Utc::now());
                state.paused_reason = Some(format!("paused before phase {name}"));
                self.store.checkpoint(state, "paused by user")?;
                return Err(ControlFlowError::PausedByUser {
                    reason: state.paused_reason.clone().unwrap_or_default(),
                }
                .into());
            }
            PromptResponse::Abort => return Err(ControlFlowError::AbortedByUser.into()),
            _ => {}
        }

        self.fire(HookEvent::BeforePhase, name, state).await?;

        state.current_phase = name.to_string();
        state
            .phases
            .entry(name.to_string())
            .or_insert_with(|| PhaseState::new(name, Vec::new()));
        let phase = state.phases.get_mut(name).unwrap();
        phase.status = PhaseStatus::InProgress;
        phase.started_at = Some(chrono::Utc::now());
        self.store.checkpoint(state, &format!("phase {name} started"))?;
        Ok(())
    }

    async fn end_phase(&mut self, state: &mut UpgradeState, name: &str, result: Result<(), OrchestratorError>) -> Result<(), OrchestratorError> {
        match result {
            Ok(()) => {
                if let Some(phase) = state.phases.get_mut(name) {
                    phase.status = PhaseStatus::Completed;
                }
                self.store.checkpoint(state, &format!("phase {name} completed"))?;
                self.fire(HookEvent::AfterPhase, name, state).await?;
                self.wait.wait(&self.cancel, WaitKind::BetweenPhases).await?;
                Ok(())
            }
            Err(err) => {
                if let Some(phase) = state.phases.get_mut(name) {
                    phase.status = PhaseStatus::Failed;
                }
                self.store.checkpoint(state, &format!("phase {name} failed"))?;
                Err(err)
            }
        }
    }

    async fn upgrade_replica_set(&mut self, state: &mut UpgradeState, rs_name: String, phase_name: String) -> Result<(), OrchestratorError> {
        self.fire(HookEvent::BeforeShardUpgrade, &phase_name, state).await?;
        let hosts: Vec<NodeRef> = self.topology.members_of(&rs_name).into_iter().cloned().collect();
        let plan = replica_set::detect_roles(self.probe.as_ref(), &rs_name, &hosts).await?;

        for secondary in &plan.secondaries {
            self.upgrade_node(state, secondary, &phase_name).await?;
            self.fire(HookEvent::AfterSecondaryUpgrade, &phase_name, state).await?;
            self.wait.wait(&self.cancel, WaitKind::BetweenShards).await?;
        }

        if let Some(primary) = plan.primary.clone() {
            let proceed = self.prompter.confirm_failover(&rs_name, &primary.id())?;
            if !proceed {
                return Err(ControlFlowError::AbortedByUser.into());
            }
            self.fire(HookEvent::BeforePrimaryStepdown, &phase_name, state).await?;
            let event = self.probe.stepdown_primary(&primary, &rs_name, &hosts).await?;
            state.failovers.push(event);
            self.store.checkpoint(state, "recorded failover event")?;
            self.wait.wait(&self.cancel, WaitKind::AfterPrimaryStepdown).await?;
            self.fire(HookEvent::AfterPrimaryStepdown, &phase_name, state).await?;

            self.upgrade_node(state, &primary, &phase_name).await?;
        }

        self.fire(HookEvent::AfterShardUpgrade, &phase_name, state).await?;
        Ok(())
    }

    async fn upgrade_node_set(&mut self, state: &mut UpgradeState, nodes: Vec<NodeRef>, phase_name: String) -> Result<(), OrchestratorError> {
        let mut sorted = nodes;
        sorted.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        for node in &sorted {
            self.upgrade_node(state, node, &phase_name).await?;
        }
        Ok(())
    }

    /// The per-node upgrade routine shared by every phase.
    async fn upgrade_node(&mut self, state: &mut UpgradeState, node: &NodeRef, phase_name: &str) -> Result<(), OrchestratorError> {
        let node_id = node.id();
        if let Some(existing) = state.nodes.get(&node_id) {
            if existing.status.is_terminal() {
                return Ok(());
            }
        }

        match self.prompter.confirm(PromptBoundary::Node, &format!("upgrade node {node_id}?"))? {
            PromptResponse::Skip => {
                state.skipped_nodes.push(node_id.clone());
                if let Some(n) = state.nodes.get_mut(&node_id) {
                    n.status = NodeStatus::Skipped;
                }
                self.store.checkpoint(state, &format!("node {node_id} skipped by user"))?;
                return Ok(());
            }
            PromptResponse::Pause => {
                state.overall = OverallStatus::Paused;
                state.paused_at = Some(chrono::Utc::now());
                state.paused_reason = Some(format!("paused before node {node_id}"));
                self.store.checkpoint(state, "paused by user")?;
                return Err(ControlFlowError::PausedByUser {
                    reason: state.paused_reason.clone().unwrap_or_default(),
                }
                .into());
            }
            PromptResponse::Abort => return Err(ControlFlowError::AbortedByUser.into()),
            PromptResponse::Continue => {}
        }

        self.fire(HookEvent::BeforeNodeUpgrade, phase_name, state).await?;

        if let Some(n) = state.nodes.get_mut(&node_id) {
            n.status = NodeStatus::InProgress;
            n.start_ts = Some(chrono::Utc::now());
        }
        self.store.checkpoint(state, &format!("node {node_id} started"))?;

        let to_version = state.target_version.clone();
        let outcome = self.run_node_steps(node, &to_version).await;

        match outcome {
            Ok(()) => {
                if let Some(n) = state.nodes.get_mut(&node_id) {
                    n.status = NodeStatus::Completed;
                    n.completion_ts = Some(chrono::Utc::now());
                }
                self.store.checkpoint(state, &format!("node {node_id} completed"))?;
                self.fire(HookEvent::AfterNodeUpgrade, phase_name, state).await?;
                self.wait.wait(&self.cancel, WaitKind::AfterNodeUpgrade).await?;
                Ok(())
            }
            Err(err) => {
                if let Some(n) = state.nodes.get_mut(&node_id) {
                    n.status = NodeStatus::Failed;
                    n.error_detail = Some(err.to_string());
                }
                self.store.checkpoint(state, &format!("node {node_id} failed"))?;
                let failure_ctx = self
                    .ctx(HookEvent::OnNodeFailure, phase_name, state)
                    .with_node(node_id.clone(), "")
                    .with_error(err.to_string());
                let _ = self.hooks.dispatch_tolerant(&failure_ctx).await;
                Err(err.into())
            }
        }
    }

    async fn run_node_steps(&self, node: &NodeRef, to_version: &str) -> Result<(), RuntimeError> {
        let node_id = node.id();
        let ops = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| RuntimeError::SupervisorError(format!("no node operations registered for {node_id}")))?;

        let mut tracker = self.progress.track_node(&node_id);

        tracker.start_step("stop");
        ops.stop().await?;
        tracker.complete_step("stop");

        tracker.start_step("config backup");
        ops.update_node_config(to_version).await?;
        tracker.complete_step("config backup");

        // Already done by staging (C7): the new binary is in place before any
        // node is touched. This step is a pointer into the progress tracker,
        // not an action.
        tracker.start_step("binary swap");
        tracker.complete_step("binary swap");

        tracker.start_step("start");
        ops.start().await?;
        tracker.complete_step("start");

        tracker.start_step("health");
        if let Err(e) = ops.wait_healthy(self.config.health_check_timeout, std::time::Duration::from_secs(1)).await {
            tracker.fail_step("health", &e.to_string());
            self.progress.record_failure();
            return Err(e);
        }
        tracker.complete_step("health");

        tracker.start_step("verify");
        if let Err(e) = ops.verify_version(to_version).await {
            tracker.fail_step("verify", &e.to_string());
            self.progress.record_failure();
            return Err(e);
        }
        tracker.complete_step("verify");

        tracker.complete();
        self.progress.record_completion();
        Ok(())
    }

    async fn post_upgrade(&mut self, state: &mut UpgradeState, to: &Version) -> Result<(), OrchestratorError> {
        state.target_version = to.as_str().to_string();

        match self.prompter.confirm(PromptBoundary::Critical, "upgrade the feature compatibility version?")? {
            PromptResponse::Continue => {
                self.fire(HookEvent::BeforeFcvUpgrade, "post-upgrade", state).await?;
                self.probe.set_fcv(&to.major_minor_string(), to.major).await?;
                self.fire(HookEvent::AfterFcvUpgrade, "post-upgrade", state).await?;
            }
            PromptResponse::Abort => return Err(ControlFlowError::AbortedByUser.into()),
            PromptResponse::Pause => {
                state.overall = OverallStatus::Paused;
                state.paused_at = Some(chrono::Utc::now());
                state.paused_reason = Some("paused before FCV upgrade".to_string());
                self.store.checkpoint(state, "paused by user")?;
                return Err(ControlFlowError::PausedByUser {
                    reason: state.paused_reason.clone().unwrap_or_default(),
                }
                .into());
            }
            PromptResponse::Skip => {
                tracing::warn!(
                    "FCV was not upgraded; run `mongosh --eval 'db.adminCommand({{setFeatureCompatibilityVersion: \"{}\"}})'` manually once satisfied",
                    to.major_minor_string()
                );
            }
        }

        self.old_supervisor.shutdown().await.ok();
        self.version_env.promote()?;
        Ok(())
    }
}
