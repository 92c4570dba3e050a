//! Thin wrapper over the MongoDB wire client: FCV read/write, replica-set
//! status, stepdown, replication lag, and cluster health (C5).

use crate::errors::RuntimeError;
use crate::topology::{NodeRef, Topology, TopologyKind};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::Client;
use std::time::Duration;

/// One member's row from `replSetGetStatus`.
#[derive(Debug, Clone)]
pub struct MemberStatus {
    pub host: String,
    pub port: u16,
    pub state_code: i32,
    pub state_name: String,
    pub health: f64,
    pub is_primary: bool,
    /// Seconds-since-epoch of this member's last applied optime, when the
    /// status document carries one in a shape we recognize.
    pub optime_secs: Option<i64>,
}

impl MemberStatus {
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub enum ReplicationLag {
    Seconds(f64),
    Skipped(String),
}

pub struct ClusterProbe {
    client: Client,
}

fn build_uri(topology: &Topology) -> String {
    match topology.kind() {
        TopologyKind::Standalone => {
            let node = &topology.mongod[0];
            format!("mongodb://{}:{}/?directConnection=true", node.host, node.port)
        }
        TopologyKind::ReplicaSet => {
            let rs_name = &topology.mongod[0].replica_set;
            let hosts: Vec<String> = topology.mongod.iter().map(|n| n.id()).collect();
            format!("mongodb://{}/?replicaSet={}", hosts.join(","), rs_name)
        }
        TopologyKind::Sharded => {
            let router = &topology.mongos[0];
            format!("mongodb://{}:{}/", router.host, router.port)
        }
    }
}

fn uri_for(node: &NodeRef) -> String {
    format!("mongodb://{}:{}/?directConnection=true", node.host, node.port)
}

fn uri_for_replica_set(replica_set: &str, hosts: &[NodeRef]) -> String {
    let host_list: Vec<String> = hosts.iter().map(|n| n.id()).collect();
    format!("mongodb://{}/?replicaSet={}", host_list.join(","), replica_set)
}

/// Every cluster-facing probe operation, extracted so the orchestrator and
/// replica-set protocol can be driven against a fake in tests instead of a
/// live `mongodb::Client`.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get_fcv(&self) -> Result<String, RuntimeError>;

    async fn set_fcv(&self, target: &str, target_major: u32) -> Result<(), RuntimeError>;

    /// Read `replSetGetStatus` for `replica_set` via a connection scoped to
    /// `hosts`, rather than whatever this probe's own connection targets.
    /// Required for sharded topologies, where the cluster-wide probe speaks
    /// only to a mongos and has no route to a shard's own replica set.
    async fn rs_status(&self, replica_set: &str, hosts: &[NodeRef]) -> Result<Vec<MemberStatus>, RuntimeError>;

    async fn stepdown_primary(
        &self,
        primary: &NodeRef,
        replica_set: &str,
        hosts: &[NodeRef],
    ) -> Result<crate::state::FailoverEvent, RuntimeError>;

    async fn replication_lag(&self, kind: TopologyKind) -> Result<ReplicationLag, RuntimeError>;

    async fn check_cluster_health(&self, kind: TopologyKind) -> Result<(), RuntimeError>;
}

impl ClusterProbe {
    pub async fn connect(topology: &Topology) -> Result<Self, RuntimeError> {
        let uri = build_uri(topology);
        Self::connect_uri(&uri).await
    }

    pub async fn connect_direct(node: &NodeRef) -> Result<Self, RuntimeError> {
        Self::connect_uri(&uri_for(node)).await
    }

    async fn connect_scoped(replica_set: &str, hosts: &[NodeRef]) -> Result<Self, RuntimeError> {
        Self::connect_uri(&uri_for_replica_set(replica_set, hosts)).await
    }

    async fn connect_uri(uri: &str) -> Result<Self, RuntimeError> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| RuntimeError::MongoConnectError(e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| RuntimeError::MongoConnectError(e.to_string()))?;
        Ok(Self { client })
    }

    fn admin(&self) -> mongodb::Database {
        self.client.database("admin")
    }

    /// `replSetGetStatus` against whatever this probe's own connection
    /// already targets, used internally where the probe is known to be
    /// connected directly to the replica set in question.
    async fn fetch_rs_status(&self) -> Result<Vec<MemberStatus>, RuntimeError> {
        let doc = self
            .admin()
            .run_command(doc! { "replSetGetStatus": 1 })
            .await
            .map_err(|e| RuntimeError::MongoCommandError {
                command: "replSetGetStatus".into(),
                message: e.to_string(),
            })?;

        let members = doc
            .get_array("members")
            .map_err(|_| RuntimeError::MongoCommandError {
                command: "replSetGetStatus".into(),
                message: "missing members array".into(),
            })?;

        let mut result = Vec::new();
        for member in members {
            let Bson::Document(m) = member else { continue };
            let name = m.get_str("name").unwrap_or_default();
            let (host, port) = name
                .rsplit_once(':')
                .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(0)))
                .unwrap_or((name.to_string(), 0));
            let state_code = m.get_i32("state").unwrap_or(-1);
            result.push(MemberStatus {
                host,
                port,
                state_code,
                state_name: m.get_str("stateStr").unwrap_or("UNKNOWN").to_string(),
                health: m.get_f64("health").unwrap_or(0.0),
                is_primary: state_code == 1,
                optime_secs: extract_optime_secs(m),
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl ClusterOps for ClusterProbe {
    /// Read the current feature compatibility version as `"M.m"`.
    async fn get_fcv(&self) -> Result<String, RuntimeError> {
        let result = self
            .admin()
            .run_command(doc! { "getParameter": 1, "featureCompatibilityVersion": 1 })
            .await;

        if let Ok(doc) = result {
            if let Some(fcv) = extract_fcv_value(&doc) {
                return Ok(fcv);
            }
        }

        // Fallback: read admin.system.version's FCV marker document directly.
        let collection: mongodb::Collection<Document> =
            self.client.database("admin").collection("system.version");
        let found = collection
            .find_one(doc! { "_id": "featureCompatibilityVersion" })
            .await
            .map_err(|e| RuntimeError::MongoCommandError {
                command: "admin.system.version lookup".into(),
                message: e.to_string(),
            })?;

        match found.and_then(|d| extract_fcv_value(&d)) {
            Some(fcv) => Ok(fcv),
            None => Err(RuntimeError::MongoCommandError {
                command: "getParameter featureCompatibilityVersion".into(),
                message: "no FCV marker found".into(),
            }),
        }
    }

    /// Set the feature compatibility version, waiting for it to settle.
    async fn set_fcv(&self, target: &str, target_major: u32) -> Result<(), RuntimeError> {
        let mut cmd = doc! { "setFeatureCompatibilityVersion": target };
        if target_major >= 7 {
            cmd.insert("confirm", true);
        }
        self.admin()
            .run_command(cmd)
            .await
            .map_err(|e| RuntimeError::MongoCommandError {
                command: "setFeatureCompatibilityVersion".into(),
                message: e.to_string(),
            })?;

        let settled = self.get_fcv().await?;
        if settled != target {
            return Err(RuntimeError::MongoCommandError {
                command: "setFeatureCompatibilityVersion".into(),
                message: format!("FCV did not settle: expected {target}, read {settled}"),
            });
        }
        Ok(())
    }

    async fn rs_status(&self, replica_set: &str, hosts: &[NodeRef]) -> Result<Vec<MemberStatus>, RuntimeError> {
        let scoped = Self::connect_scoped(replica_set, hosts).await?;
        scoped.fetch_rs_status().await
    }

    /// Step down the primary and poll until a different primary is elected,
    /// up to 30s. Connection-reset errors from the stepdown call itself are
    /// expected (the connection is torn down as part of the demotion) and
    /// ignored.
    async fn stepdown_primary(
        &self,
        primary: &NodeRef,
        replica_set: &str,
        hosts: &[NodeRef],
    ) -> Result<crate::state::FailoverEvent, RuntimeError> {
        let direct = Self::connect_direct(primary).await?;
        let _ = direct
            .admin()
            .run_command(doc! {
                "replSetStepDown": 60i32,
                "secondaryCatchUpPeriodSecs": 10i32,
            })
            .await;

        let scoped = Self::connect_scoped(replica_set, hosts).await?;
        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(30);
        loop {
            if started.elapsed() >= deadline {
                return Err(RuntimeError::StepdownTimeout {
                    primary: primary.id(),
                    timeout_secs: 30,
                });
            }
            if let Ok(members) = scoped.fetch_rs_status().await {
                if let Some(new_primary) = members
                    .iter()
                    .find(|m| m.is_primary && m.id() != primary.id())
                {
                    return Ok(crate::state::FailoverEvent {
                        ts: chrono::Utc::now(),
                        replica_set: replica_set.to_string(),
                        old_primary: primary.id(),
                        new_primary: new_primary.id(),
                        reason: "controlled stepdown".to_string(),
                        election_time_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Replication lag for replica sets only; sharded clusters (connected
    /// via mongos) and standalones report a skip/zero result instead.
    async fn replication_lag(&self, kind: TopologyKind) -> Result<ReplicationLag, RuntimeError> {
        match kind {
            TopologyKind::Standalone => Ok(ReplicationLag::Seconds(0.0)),
            TopologyKind::Sharded => Ok(ReplicationLag::Skipped(
                "replication lag is not meaningful behind a mongos".into(),
            )),
            TopologyKind::ReplicaSet => {
                let members = self.fetch_rs_status().await?;
                let Some(primary) = members.iter().find(|m| m.is_primary) else {
                    return Ok(ReplicationLag::Skipped("no primary to measure against".into()));
                };
                let Some(primary_optime) = primary.optime_secs else {
                    return Ok(ReplicationLag::Skipped("primary optime unavailable".into()));
                };
                let max_lag = members
                    .iter()
                    .filter(|m| !m.is_primary)
                    .filter_map(|m| m.optime_secs)
                    .map(|secondary_optime| (primary_optime - secondary_optime).max(0) as f64)
                    .fold(0.0, f64::max);
                Ok(ReplicationLag::Seconds(max_lag))
            }
        }
    }

    async fn check_cluster_health(&self, kind: TopologyKind) -> Result<(), RuntimeError> {
        match kind {
            TopologyKind::Standalone => Ok(()),
            TopologyKind::ReplicaSet => {
                let members = self.fetch_rs_status().await?;
                let has_primary = members.iter().any(|m| m.is_primary);
                if !has_primary {
                    return Err(RuntimeError::MongoCommandError {
                        command: "check_cluster_health".into(),
                        message: "replica set has no primary".into(),
                    });
                }
                let unhealthy: Vec<String> = members
                    .iter()
                    .filter(|m| m.health < 1.0)
                    .map(|m| m.id())
                    .collect();
                if !unhealthy.is_empty() {
                    return Err(RuntimeError::MongoCommandError {
                        command: "check_cluster_health".into(),
                        message: format!("unhealthy members: {}", unhealthy.join(", ")),
                    });
                }
                Ok(())
            }
            TopologyKind::Sharded => {
                let shards = self
                    .admin()
                    .run_command(doc! { "listShards": 1 })
                    .await
                    .map_err(|e| RuntimeError::MongoCommandError {
                        command: "listShards".into(),
                        message: e.to_string(),
                    })?;
                let count = shards.get_array("shards").map(|a| a.len()).unwrap_or(0);
                if count == 0 {
                    return Err(RuntimeError::MongoCommandError {
                        command: "listShards".into(),
                        message: "no shard documents found".into(),
                    });
                }
                // Balancer status is advisory only; failures here are not fatal.
                let _ = self.admin().run_command(doc! { "balancerStatus": 1 }).await;
                Ok(())
            }
        }
    }
}

/// Accepts the modern `optimeDate` (a BSON UTC datetime) shape and the
/// legacy `optime.ts`/`optime` (a BSON timestamp) shapes, returning
/// seconds-since-epoch in either case.
fn extract_optime_secs(member: &Document) -> Option<i64> {
    if let Ok(dt) = member.get_datetime("optimeDate") {
        return Some(dt.timestamp_millis() / 1000);
    }
    if let Ok(ts) = member.get_document("optime").and_then(|o| o.get_timestamp("ts")) {
        return Some(ts.time as i64);
    }
    if let Ok(ts) = member.get_timestamp("optime") {
        return Some(ts.time as i64);
    }
    None
}

/// Accepts both the nested `{version: "M.m"}` shape and a plain string.
fn extract_fcv_value(doc: &Document) -> Option<String> {
    if let Ok(fcv_doc) = doc.get_document("featureCompatibilityVersion") {
        if let Ok(v) = fcv_doc.get_str("version") {
            return Some(v.to_string());
        }
    }
    if let Ok(s) = doc.get_str("featureCompatibilityVersion") {
        return Some(s.to_string());
    }
    None
}
