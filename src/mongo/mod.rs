//! Cluster Probe (C5): a thin wrapper over the MongoDB wire client.

pub mod probe;

pub use probe::{ClusterOps, ClusterProbe, MemberStatus, ReplicationLag};
