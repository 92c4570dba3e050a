//! Pre-flight checks (§4.9, steps a–k). Any fatal failure here halts before
//! any state beyond `pre-flight` is written.

use crate::config::Config;
use crate::errors::RuntimeError;
use crate::hooks::registry::HookRegistry;
use crate::mongo::ClusterOps;
use crate::node_ops::NodeOperations;
use crate::topology::TopologyKind;
use crate::version::Version;

pub struct PreflightInputs<'a> {
    pub meta_version: &'a str,
    pub from: &'a Version,
    pub to: &'a Version,
    pub topology_kind: TopologyKind,
    pub nodes: &'a [&'a dyn NodeOperations],
    pub probe: &'a dyn ClusterOps,
    pub hooks: &'a HookRegistry,
    pub config: &'a Config,
}

/// Runs checks (a)-(k) in order. Returns `Ok(())` if every fatal check
/// passed; advisory checks only log warnings.
pub async fn run(inputs: PreflightInputs<'_>) -> Result<(), RuntimeError> {
    // (a) meta_version == from_version
    if inputs.meta_version != inputs.from.as_str() {
        return Err(RuntimeError::Other(anyhow::anyhow!(
            "cluster's reported version {} does not match the declared starting version {}",
            inputs.meta_version,
            inputs.from.as_str()
        )));
    }

    // (b) validate_path(from, to)
    crate::version::validate_path(inputs.from, inputs.to)?;

    // (c)/(d) every node's reported state is RUNNING
    for node in inputs.nodes {
        let status = node.status().await?;
        if status.state != crate::node_ops::ProcessState::Running {
            return Err(RuntimeError::SupervisorError(format!(
                "node {} is not RUNNING on the current supervisor",
                node.node().id()
            )));
        }
    }

    // (e) Client.connect already succeeded to construct `probe`; (f) FCV check.
    let fcv = inputs.probe.get_fcv().await?;
    let expected = inputs.from.major_minor_string();
    if fcv != expected {
        if fcv.as_str() > expected.as_str() {
            return Err(RuntimeError::Other(anyhow::anyhow!(
                "cluster FCV {fcv} is already ahead of the declared starting version {expected}.\n\
                 This usually means the cluster is mid-upgrade, or --from was given the wrong value.\n\
                 To inspect the live FCV:\n  \
                 mongosh --eval 'db.adminCommand({{getParameter: 1, featureCompatibilityVersion: 1}})'\n\
                 If {fcv} is in fact correct, re-run with --from {fcv}. If the cluster is mid-upgrade,\n\
                 finish or roll back that upgrade before starting a new one."
            )));
        }
        tracing::warn!(fcv, expected, "cluster FCV trails the declared starting version");
    }

    // (g) prepare_binaries
    for node in inputs.nodes {
        node.prepare_binaries(inputs.to.major_minor_string().as_str()).await?;
    }

    // (h) disk space sanity check (advisory: best effort, never fatal here).
    if let Ok(space) = fs2::available_space(&inputs.config.cluster_root) {
        const MIN_BYTES: u64 = 2 * 1024 * 1024 * 1024;
        if space < MIN_BYTES {
            tracing::warn!(available = space, "low disk space at cluster root");
        }
    }

    // (i) check_cluster_health
    inputs.probe.check_cluster_health(inputs.topology_kind).await?;

    // (j) replication_lag: any lag over 10s, or any probe error, is advisory only.
    match inputs.probe.replication_lag(inputs.topology_kind).await {
        Ok(crate::mongo::ReplicationLag::Seconds(secs)) if secs > 10.0 => {
            tracing::warn!(lag_secs = secs, "replication lag exceeds 10s");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "replication lag probe failed"),
    }

    // (k) hook registry validation
    inputs.hooks.validate()?;

    Ok(())
}
