//! Orchestrator-level scenarios exercising the upgrade state machine end to
//! end against the fakes in `mup::testing`, without a live `mongod` or
//! `supervisord`.

use mup::config::Config;
use mup::errors::RuntimeError;
use mup::hooks::executor::ExternalCommandHook;
use mup::hooks::registry::HookRegistry;
use mup::hooks::types::HookEvent;
use mup::hooks::wait::{WaitKind, WaitManager};
use mup::mongo::ClusterOps;
use mup::node_ops::NodeOperations;
use mup::orchestrator::{Orchestrator, OrchestratorError};
use mup::prompt::{PromptLevel, PromptResponse, Prompter};
use mup::state::StateStore;
use mup::supervisor::SupervisorHandle;
use mup::testing::{member, FakeClusterProbe, FakeNodeOperations, FakeSupervisorLauncher, StepdownBehavior};
use mup::topology::{NodeRef, Topology};
use mup::version::Version;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn zero_wait_manager() -> WaitManager {
    let mut wait = WaitManager::new();
    for kind in [
        WaitKind::AfterNodeUpgrade,
        WaitKind::AfterPrimaryStepdown,
        WaitKind::BetweenShards,
        WaitKind::AfterFcvUpgrade,
        WaitKind::AfterBalancerStop,
        WaitKind::BeforePrimaryUpgrade,
        WaitKind::BetweenPhases,
        WaitKind::HealthCheckInterval,
    ] {
        wait.set(kind, Duration::ZERO);
    }
    wait
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::new(dir.path());
    config.health_check_timeout = Duration::from_secs(5);
    config
}

fn fake_old_supervisor(dir: &TempDir) -> SupervisorHandle {
    SupervisorHandle {
        control_port: 0,
        ini_path: dir.path().join("current").join("supervisor.ini"),
    }
}

fn orchestrator(
    config: Config,
    topology: Topology,
    prompter: Prompter,
    probe: Box<dyn ClusterOps>,
    nodes: HashMap<String, Box<dyn NodeOperations>>,
    old_supervisor: SupervisorHandle,
    hooks: HookRegistry,
) -> Orchestrator {
    Orchestrator::new(
        config,
        "test-cluster".to_string(),
        topology,
        hooks,
        prompter,
        probe,
        nodes,
        old_supervisor,
        Box::new(FakeSupervisorLauncher),
    )
    .with_wait_manager(zero_wait_manager())
}

#[tokio::test]
async fn patch_upgrade_of_standalone_completes_and_records_state() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let node = NodeRef::new("localhost", 27017);
    let topology = Topology {
        mongod: vec![node.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    nodes.insert(node.id(), Box::new(FakeNodeOperations::new(node.clone())));

    let probe = Box::new(FakeClusterProbe::new("7.0"));
    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());

    let mut orch = orchestrator(
        config,
        topology,
        Prompter::new(PromptLevel::None),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );

    orch.run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap();

    // The live state file is archived away on success.
    assert!(!store.exists());
}

#[tokio::test]
async fn replica_set_upgrades_secondaries_before_stepping_down_the_primary() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let primary = NodeRef::new("localhost", 27017).with_replica_set("rs0");
    let secondary_a = NodeRef::new("localhost", 27018).with_replica_set("rs0");
    let secondary_b = NodeRef::new("localhost", 27019).with_replica_set("rs0");
    let topology = Topology {
        mongod: vec![primary.clone(), secondary_a.clone(), secondary_b.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    for n in [&primary, &secondary_a, &secondary_b] {
        nodes.insert(n.id(), Box::new(FakeNodeOperations::new(n.clone())));
    }

    let probe = Box::new(
        FakeClusterProbe::new("7.0")
            .with_replica_set_members(vec![
                member(&primary, true),
                member(&secondary_a, false),
                member(&secondary_b, false),
            ])
            .with_stepdown_behavior(StepdownBehavior::Elects(secondary_a.clone())),
    );

    let mut orch = orchestrator(
        config.clone(),
        topology,
        Prompter::scripted(PromptLevel::Critical, vec![]),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );

    orch.run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap();

    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    assert!(!store.exists());
}

#[tokio::test]
async fn invalid_upgrade_path_is_rejected_before_any_node_is_touched() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let node = NodeRef::new("localhost", 27017);
    let topology = Topology {
        mongod: vec![node.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    let fake_ops = FakeNodeOperations::new(node.clone());
    nodes.insert(node.id(), Box::new(fake_ops));

    let probe = Box::new(FakeClusterProbe::new("4.0"));

    let mut orch = orchestrator(
        config,
        topology,
        Prompter::new(PromptLevel::None),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );

    // 4.0 -> 4.4 skips the 4.2 rung.
    let err = orch
        .run_upgrade(Version::parse("4.0").unwrap(), Version::parse("4.4").unwrap())
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Runtime(RuntimeError::Validation(_)) => {}
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

#[tokio::test]
async fn pause_response_halts_the_run_and_resume_continues_from_where_it_left_off() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let a = NodeRef::new("localhost", 27017).with_replica_set("rs0");
    let b = NodeRef::new("localhost", 27018).with_replica_set("rs0");
    let topology = Topology {
        mongod: vec![a.clone(), b.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    nodes.insert(a.id(), Box::new(FakeNodeOperations::new(a.clone())));
    nodes.insert(b.id(), Box::new(FakeNodeOperations::new(b.clone())));

    let probe = Box::new(
        FakeClusterProbe::new("7.0")
            .with_replica_set_members(vec![member(&a, true), member(&b, false)])
            .with_stepdown_behavior(StepdownBehavior::Elects(b.clone())),
    );

    let mut orch = orchestrator(
        config.clone(),
        topology.clone(),
        Prompter::scripted(PromptLevel::Phase, vec![PromptResponse::Pause]),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );

    let err = orch
        .run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ControlFlow(_)));

    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    let paused_state = store.load().unwrap();
    assert_eq!(paused_state.overall, mup::state::OverallStatus::Paused);

    // Resume: a fresh orchestrator picks the persisted state back up and
    // completes the run once the phase prompt no longer pauses.
    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    nodes.insert(a.id(), Box::new(FakeNodeOperations::new(a.clone())));
    nodes.insert(b.id(), Box::new(FakeNodeOperations::new(b.clone())));
    let probe = Box::new(
        FakeClusterProbe::new("7.0")
            .with_replica_set_members(vec![member(&a, true), member(&b, false)])
            .with_stepdown_behavior(StepdownBehavior::Elects(b.clone())),
    );
    let mut orch = orchestrator(
        config.clone(),
        topology,
        Prompter::new(PromptLevel::None),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );
    orch.run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap();

    assert!(!store.exists());
}

#[tokio::test]
async fn stepdown_timeout_fails_the_shard_phase_without_upgrading_the_primary() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let primary = NodeRef::new("localhost", 27017).with_replica_set("rs0");
    let secondary = NodeRef::new("localhost", 27018).with_replica_set("rs0");
    let topology = Topology {
        mongod: vec![primary.clone(), secondary.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    nodes.insert(primary.id(), Box::new(FakeNodeOperations::new(primary.clone())));
    nodes.insert(secondary.id(), Box::new(FakeNodeOperations::new(secondary.clone())));

    let probe = Box::new(
        FakeClusterProbe::new("7.0")
            .with_replica_set_members(vec![member(&primary, true), member(&secondary, false)])
            .with_stepdown_behavior(StepdownBehavior::TimesOut),
    );

    let mut orch = orchestrator(
        config.clone(),
        topology,
        Prompter::scripted(PromptLevel::Critical, vec![]),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        HookRegistry::new(),
    );

    let err = orch
        .run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Runtime(RuntimeError::StepdownTimeout { .. }) => {}
        other => panic!("expected StepdownTimeout, got {other:?}"),
    }

    let store = StateStore::new(config.state_file.clone(), config.history_dir.clone());
    let state = store.load().unwrap();
    assert_eq!(state.overall, mup::state::OverallStatus::Failed);
    assert_eq!(
        state.nodes.get(&primary.id()).unwrap().status,
        mup::state::NodeStatus::Pending
    );
}

#[tokio::test]
async fn non_executable_hook_fails_preflight_before_any_node_is_touched() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let node = NodeRef::new("localhost", 27017);
    let topology = Topology {
        mongod: vec![node.clone()],
        ..Default::default()
    };

    let mut nodes: HashMap<String, Box<dyn NodeOperations>> = HashMap::new();
    nodes.insert(node.id(), Box::new(FakeNodeOperations::new(node.clone())));

    let script = dir.path().join("hook.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
    // Deliberately not made executable.
    let mut hooks = HookRegistry::new();
    hooks.register(Box::new(ExternalCommandHook::new(
        "broken",
        HookEvent::BeforeNodeUpgrade,
        script.display().to_string(),
        dir.path().to_path_buf(),
    )));

    let probe = Box::new(FakeClusterProbe::new("7.0"));

    let mut orch = orchestrator(
        config,
        topology,
        Prompter::new(PromptLevel::None),
        probe,
        nodes,
        fake_old_supervisor(&dir),
        hooks,
    );

    let err = orch
        .run_upgrade(Version::parse("7.0").unwrap(), Version::parse("7.0.26").unwrap())
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Runtime(RuntimeError::Validation(_)) => {}
        other => panic!("expected a hook validation failure, got {other:?}"),
    }
}
