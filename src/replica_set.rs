//! Replica-Set Upgrade Protocol (C8): secondaries first, primary failover
//! last, former primary upgraded as the final member.

use crate::errors::RuntimeError;
use crate::mongo::{ClusterOps, MemberStatus};
use crate::topology::NodeRef;

/// The ordered plan for upgrading one replica set, derived from a fresh
/// `rs_status` read. Members already marked completed by the caller should
/// be filtered out before this is used to drive the node loop.
pub struct ReplicaSetPlan {
    pub replica_set: String,
    pub secondaries: Vec<NodeRef>,
    pub primary: Option<NodeRef>,
}

/// Partition a replica set's members into secondaries (ascending `(host,
/// port)` order) and the current primary, per a fresh status read.
pub async fn detect_roles(
    probe: &dyn ClusterOps,
    replica_set: &str,
    hosts: &[NodeRef],
) -> Result<ReplicaSetPlan, RuntimeError> {
    let members = probe.rs_status(replica_set, hosts).await?;
    let mut secondaries: Vec<NodeRef> = members
        .iter()
        .filter(|m| !m.is_primary)
        .map(to_node_ref)
        .collect();
    secondaries.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));

    let primary = members.iter().find(|m: &&MemberStatus| m.is_primary).map(to_node_ref);

    Ok(ReplicaSetPlan {
        replica_set: replica_set.to_string(),
        secondaries,
        primary,
    })
}

fn to_node_ref(member: &MemberStatus) -> NodeRef {
    NodeRef::new(member.host.clone(), member.port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ref_ordering_is_ascending_host_then_port() {
        let mut nodes = vec![
            NodeRef::new("localhost", 27019),
            NodeRef::new("localhost", 27017),
            NodeRef::new("localhost", 27018),
        ];
        nodes.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        assert_eq!(nodes.iter().map(|n| n.port).collect::<Vec<_>>(), vec![27017, 27018, 27019]);
    }
}
