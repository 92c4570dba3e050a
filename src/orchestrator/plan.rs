//! Dry-run plan generation: the phases and steps an upgrade would execute,
//! without firing any hook with side effects.

use crate::topology::{NodeRef, Topology, TopologyKind};
use crate::version::Version;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub action: String,
    pub target: String,
    pub description: String,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanPhase {
    pub name: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub from: String,
    pub to: String,
    pub phases: Vec<PlanPhase>,
}

fn node_upgrade_steps(node: &NodeRef, to: &Version) -> Vec<PlanStep> {
    ["stop", "config backup", "binary swap", "start", "health", "verify"]
        .into_iter()
        .map(|action| PlanStep {
            action: action.to_string(),
            target: node.id(),
            description: format!("{action} {} toward {}", node.id(), to.major_minor_string()),
            critical: false,
        })
        .collect()
}

fn replica_set_phase(name: &str, members: &[&NodeRef], to: &Version) -> PlanPhase {
    let mut steps = Vec::new();
    for member in members {
        steps.extend(node_upgrade_steps(member, to));
    }
    steps.push(PlanStep {
        action: "stepdown-primary".to_string(),
        target: name.to_string(),
        description: format!("step down the primary of {name} after secondaries complete"),
        critical: true,
    });
    PlanPhase {
        name: name.to_string(),
        steps,
    }
}

pub fn generate(topology: &Topology, from: &Version, to: &Version) -> Plan {
    let mut phases = vec![PlanPhase {
        name: "pre-flight".to_string(),
        steps: vec![PlanStep {
            action: "validate".to_string(),
            target: "cluster".to_string(),
            description: "run pre-flight checks (a)-(k)".to_string(),
            critical: true,
        }],
    }];

    match topology.kind() {
        TopologyKind::Standalone => {
            let node = &topology.mongod[0];
            phases.push(PlanPhase {
                name: "shard-standalone".to_string(),
                steps: node_upgrade_steps(node, to),
            });
        }
        TopologyKind::ReplicaSet => {
            for rs in topology.replica_set_names() {
                let members = topology.members_of(&rs);
                phases.push(replica_set_phase(&format!("shard-{rs}"), &members, to));
            }
        }
        TopologyKind::Sharded => {
            if !topology.config_svr.is_empty() {
                let members: Vec<&NodeRef> = topology.config_svr.iter().collect();
                phases.push(replica_set_phase("config-servers", &members, to));
            }
            for rs in topology.replica_set_names() {
                let members = topology.members_of(&rs);
                phases.push(replica_set_phase(&format!("shard-{rs}"), &members, to));
            }
            let mongos_steps = topology
                .mongos
                .iter()
                .flat_map(|n| node_upgrade_steps(n, to))
                .collect();
            phases.push(PlanPhase {
                name: "mongos".to_string(),
                steps: mongos_steps,
            });
        }
    }

    phases.push(PlanPhase {
        name: "post-upgrade".to_string(),
        steps: vec![
            PlanStep {
                action: "update-metadata".to_string(),
                target: "cluster".to_string(),
                description: "record the new version in cluster-scoped metadata".to_string(),
                critical: false,
            },
            PlanStep {
                action: "fcv-upgrade".to_string(),
                target: "cluster".to_string(),
                description: format!("optionally set FCV to {}", to.major_minor_string()),
                critical: true,
            },
            PlanStep {
                action: "promote".to_string(),
                target: "cluster".to_string(),
                description: "swap the `current` symlink to the new version".to_string(),
                critical: false,
            },
        ],
    });

    Plan {
        from: from.to_string(),
        to: to.to_string(),
        phases,
    }
}
