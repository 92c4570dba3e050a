//! Hook vocabulary: events, context, and results (C3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The exhaustive set of lifecycle points a hook can attach to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    OnUpgradeStart,
    OnUpgradeComplete,
    OnUpgradeFailure,
    BeforePhase,
    AfterPhase,
    BeforeNodeUpgrade,
    AfterNodeUpgrade,
    OnNodeFailure,
    BeforePrimaryStepdown,
    AfterPrimaryStepdown,
    BeforeSecondaryUpgrade,
    AfterSecondaryUpgrade,
    BeforeShardUpgrade,
    AfterShardUpgrade,
    BeforeFcvUpgrade,
    AfterFcvUpgrade,
    BeforeBalancerStop,
    AfterBalancerStart,
}

impl HookEvent {
    pub fn all() -> &'static [HookEvent] {
        use HookEvent::*;
        &[
            OnUpgradeStart,
            OnUpgradeComplete,
            OnUpgradeFailure,
            BeforePhase,
            AfterPhase,
            BeforeNodeUpgrade,
            AfterNodeUpgrade,
            OnNodeFailure,
            BeforePrimaryStepdown,
            AfterPrimaryStepdown,
            BeforeSecondaryUpgrade,
            AfterSecondaryUpgrade,
            BeforeShardUpgrade,
            AfterShardUpgrade,
            BeforeFcvUpgrade,
            AfterFcvUpgrade,
            BeforeBalancerStop,
            AfterBalancerStart,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        use HookEvent::*;
        match self {
            OnUpgradeStart => "on-upgrade-start",
            OnUpgradeComplete => "on-upgrade-complete",
            OnUpgradeFailure => "on-upgrade-failure",
            BeforePhase => "before-phase",
            AfterPhase => "after-phase",
            BeforeNodeUpgrade => "before-node-upgrade",
            AfterNodeUpgrade => "after-node-upgrade",
            OnNodeFailure => "on-node-failure",
            BeforePrimaryStepdown => "before-primary-stepdown",
            AfterPrimaryStepdown => "after-primary-stepdown",
            BeforeSecondaryUpgrade => "before-secondary-upgrade",
            AfterSecondaryUpgrade => "after-secondary-upgrade",
            BeforeShardUpgrade => "before-shard-upgrade",
            AfterShardUpgrade => "after-shard-upgrade",
            BeforeFcvUpgrade => "before-fcv-upgrade",
            AfterFcvUpgrade => "after-fcv-upgrade",
            BeforeBalancerStop => "before-balancer-stop",
            AfterBalancerStart => "after-balancer-start",
        }
    }

    /// Hooks on these events never fail the upgrade; failures are logged
    /// with a `Warning:` prefix instead (§7).
    pub fn is_advisory(&self) -> bool {
        use HookEvent::*;
        matches!(
            self,
            AfterPhase | AfterNodeUpgrade | AfterFcvUpgrade | AfterPrimaryStepdown
                | AfterSecondaryUpgrade | AfterShardUpgrade | AfterBalancerStart
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::all()
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{s}'"))
    }
}

/// What a hook returns. `Continue`/`Approve` let the upgrade proceed;
/// `Block`/`Reject` halt it; `Skip` is meaningful only for node-level hooks.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    Continue,
    Block,
    Skip,
    Approve,
    Reject,
}

impl Default for HookAction {
    fn default() -> Self {
        HookAction::Continue
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookResult {
    #[serde(default)]
    pub action: HookAction,
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HookResult {
    pub fn continue_execution() -> Self {
        Self {
            action: HookAction::Continue,
            message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            action: HookAction::Block,
            message: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            action: HookAction::Skip,
            message: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn should_continue(&self) -> bool {
        matches!(self.action, HookAction::Continue | HookAction::Approve)
    }
}

/// Everything a hook needs to know about the moment it is firing.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub event: Option<HookEvent>,
    pub cluster_name: String,
    pub phase: String,
    pub node: Option<String>,
    pub node_role: Option<String>,
    pub shard_name: Option<String>,
    pub from_version: String,
    pub to_version: String,
    pub attempt: u32,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl HookContext {
    pub fn new(cluster_name: &str, from_version: &str, to_version: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_event(mut self, event: HookEvent) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_node(mut self, node: impl Into<String>, role: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self.node_role = Some(role.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Structured environment variables an `ExternalCommandHook` exposes to
    /// its child process, per §4.3/§6.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            (
                "MUP_HOOK_TYPE".to_string(),
                self.event.map(|e| e.as_str().to_string()).unwrap_or_default(),
            ),
            ("MUP_CLUSTER_NAME".to_string(), self.cluster_name.clone()),
            ("MUP_PHASE".to_string(), self.phase.clone()),
            ("MUP_FROM_VERSION".to_string(), self.from_version.clone()),
            ("MUP_TO_VERSION".to_string(), self.to_version.clone()),
            ("MUP_ATTEMPT".to_string(), self.attempt.to_string()),
        ];
        if let Some(node) = &self.node {
            vars.push(("MUP_NODE".to_string(), node.clone()));
        }
        if let Some(role) = &self.node_role {
            vars.push(("MUP_NODE_ROLE".to_string(), role.clone()));
        }
        if let Some(shard) = &self.shard_name {
            vars.push(("MUP_SHARD_NAME".to_string(), shard.clone()));
        }
        if let Some(err) = &self.error {
            vars.push(("MUP_ERROR".to_string(), err.clone()));
        }
        for (key, value) in &self.metadata {
            vars.push((format!("MUP_META_{}", key.to_uppercase()), value.clone()));
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_event_from_str_round_trips_with_as_str() {
        for event in HookEvent::all() {
            let parsed: HookEvent = event.as_str().parse().unwrap();
            assert_eq!(parsed, *event);
        }
    }

    #[test]
    fn hook_event_from_str_rejects_unknown() {
        assert!("not-a-real-event".parse::<HookEvent>().is_err());
    }

    #[test]
    fn default_hook_result_continues() {
        let result = HookResult::default();
        assert!(result.should_continue());
    }

    #[test]
    fn block_result_does_not_continue() {
        let result = HookResult::block("bad things");
        assert!(!result.should_continue());
        assert_eq!(result.message.as_deref(), Some("bad things"));
    }

    #[test]
    fn advisory_events_match_spec_set() {
        assert!(HookEvent::AfterNodeUpgrade.is_advisory());
        assert!(HookEvent::AfterFcvUpgrade.is_advisory());
        assert!(!HookEvent::BeforeNodeUpgrade.is_advisory());
        assert!(!HookEvent::OnNodeFailure.is_advisory());
    }

    #[test]
    fn env_vars_include_structured_and_metadata_keys() {
        let mut ctx = HookContext::new("cluster0", "7.0.1", "7.0.26")
            .with_event(HookEvent::BeforeNodeUpgrade)
            .with_phase("shard-rs0")
            .with_node("localhost:27017", "SECONDARY");
        ctx.metadata.insert("retry".to_string(), "2".to_string());

        let vars = ctx.env_vars();
        let get = |key: &str| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        assert_eq!(get("MUP_HOOK_TYPE"), Some("before-node-upgrade".to_string()));
        assert_eq!(get("MUP_NODE"), Some("localhost:27017".to_string()));
        assert_eq!(get("MUP_META_RETRY"), Some("2".to_string()));
    }

    #[test]
    fn hook_result_json_round_trip() {
        let result = HookResult::skip("already migrated");
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: HookResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.action, HookAction::Skip);
    }
}
