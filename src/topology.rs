//! Cluster topology: the static shape of the deployment being upgraded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `host:port` endpoint and its identity within the topology.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub host: String,
    pub port: u16,
    /// Empty string for config servers and mongos; otherwise the replica
    /// set name the mongod belongs to.
    #[serde(default)]
    pub replica_set: String,
}

impl NodeRef {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            replica_set: String::new(),
        }
    }

    pub fn with_replica_set(mut self, rs: impl Into<String>) -> Self {
        self.replica_set = rs.into();
        self
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A process identity string: `mongod-<port>` or `mongos-<port>`.
pub fn process_id(kind: ProcessKind, port: u16) -> String {
    match kind {
        ProcessKind::Mongod => format!("mongod-{port}"),
        ProcessKind::Mongos => format!("mongos-{port}"),
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessKind {
    Mongod,
    Mongos,
}

/// The full cluster topology: ordered sequences of config servers, mongods,
/// and mongos routers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub config_svr: Vec<NodeRef>,
    #[serde(default)]
    pub mongod: Vec<NodeRef>,
    #[serde(default)]
    pub mongos: Vec<NodeRef>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TopologyKind {
    Standalone,
    ReplicaSet,
    Sharded,
}

impl Topology {
    /// Derive the topology kind from its member sets.
    ///
    /// Sharded if any mongos or config server is present; replica-set if
    /// every mongod carries a non-empty replica-set tag and there is no
    /// mongos; standalone if there is exactly one untagged mongod.
    pub fn kind(&self) -> TopologyKind {
        if !self.mongos.is_empty() || !self.config_svr.is_empty() {
            return TopologyKind::Sharded;
        }
        if !self.mongod.is_empty() && self.mongod.iter().all(|n| !n.replica_set.is_empty()) {
            return TopologyKind::ReplicaSet;
        }
        TopologyKind::Standalone
    }

    /// Every replica set name present among the mongods, in first-seen order.
    pub fn replica_set_names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for node in &self.mongod {
            if !node.replica_set.is_empty() && !seen.contains(&node.replica_set) {
                seen.push(node.replica_set.clone());
            }
        }
        seen
    }

    /// All mongods belonging to a given replica set, in topology order.
    pub fn members_of(&self, rs_name: &str) -> Vec<&NodeRef> {
        self.mongod
            .iter()
            .filter(|n| n.replica_set == rs_name)
            .collect()
    }

    pub fn all_nodes(&self) -> Vec<&NodeRef> {
        self.config_svr
            .iter()
            .chain(self.mongod.iter())
            .chain(self.mongos.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_is_single_untagged_mongod() {
        let topo = Topology {
            mongod: vec![NodeRef::new("localhost", 27017)],
            ..Default::default()
        };
        assert_eq!(topo.kind(), TopologyKind::Standalone);
    }

    #[test]
    fn replica_set_requires_every_mongod_tagged() {
        let topo = Topology {
            mongod: vec![
                NodeRef::new("localhost", 27017).with_replica_set("rs0"),
                NodeRef::new("localhost", 27018).with_replica_set("rs0"),
            ],
            ..Default::default()
        };
        assert_eq!(topo.kind(), TopologyKind::ReplicaSet);
    }

    #[test]
    fn sharded_if_mongos_present() {
        let topo = Topology {
            mongod: vec![NodeRef::new("localhost", 27017).with_replica_set("shard01")],
            mongos: vec![NodeRef::new("localhost", 27019)],
            ..Default::default()
        };
        assert_eq!(topo.kind(), TopologyKind::Sharded);
    }

    #[test]
    fn sharded_if_config_server_present_even_without_mongos() {
        let topo = Topology {
            config_svr: vec![NodeRef::new("localhost", 27020).with_replica_set("csrs")],
            ..Default::default()
        };
        assert_eq!(topo.kind(), TopologyKind::Sharded);
    }

    #[test]
    fn replica_set_names_are_deduped_and_ordered() {
        let topo = Topology {
            mongod: vec![
                NodeRef::new("a", 1).with_replica_set("rs1"),
                NodeRef::new("b", 2).with_replica_set("rs0"),
                NodeRef::new("c", 3).with_replica_set("rs1"),
            ],
            ..Default::default()
        };
        assert_eq!(topo.replica_set_names(), vec!["rs1", "rs0"]);
    }

    #[test]
    fn process_id_format() {
        assert_eq!(process_id(ProcessKind::Mongod, 27017), "mongod-27017");
        assert_eq!(process_id(ProcessKind::Mongos, 27019), "mongos-27019");
    }
}
