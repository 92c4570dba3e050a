//! The persisted upgrade state document (§3 data model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::RolledBack | NodeStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    Primary,
    Secondary,
    Arbiter,
    Mongos,
    Standalone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    pub start_ts: Option<DateTime<Utc>>,
    pub completion_ts: Option<DateTime<Utc>>,
    pub from_version: String,
    pub to_version: String,
    #[serde(default)]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub role: NodeRole,
}

impl NodeState {
    pub fn pending(from_version: &str, to_version: &str, role: NodeRole) -> Self {
        Self {
            status: NodeStatus::Pending,
            start_ts: None,
            completion_ts: None,
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            error_detail: None,
            retry_count: 0,
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub members: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
}

impl PhaseState {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status: PhaseStatus::NotStarted,
            members,
            started_at: None,
            last_checkpoint_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
    Paused,
}

pub use crate::prompt::PromptLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub ts: DateTime<Utc>,
    pub replica_set: String,
    pub old_primary: String,
    pub new_primary: String,
    pub reason: String,
    pub election_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeState {
    pub upgrade_id: String,
    pub cluster_name: String,
    pub previous_version: String,
    pub target_version: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub overall: OverallStatus,
    pub current_phase: String,
    pub phases: BTreeMap<String, PhaseState>,
    pub nodes: BTreeMap<String, NodeState>,
    pub checkpoint_count: u64,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_reason: Option<String>,
    pub prompt_level: PromptLevel,
    #[serde(default)]
    pub skipped_nodes: Vec<String>,
    #[serde(default)]
    pub user_pause_requested: bool,
    #[serde(default)]
    pub failovers: Vec<FailoverEvent>,
}

impl UpgradeState {
    pub fn new(
        upgrade_id: String,
        cluster_name: String,
        from: String,
        to: String,
        prompt_level: PromptLevel,
    ) -> Self {
        let now = Utc::now();
        Self {
            upgrade_id,
            cluster_name,
            previous_version: from,
            target_version: to,
            started_at: now,
            last_updated: now,
            overall: OverallStatus::InProgress,
            current_phase: String::new(),
            phases: BTreeMap::new(),
            nodes: BTreeMap::new(),
            checkpoint_count: 0,
            last_checkpoint_at: None,
            paused_at: None,
            paused_reason: None,
            prompt_level,
            skipped_nodes: Vec::new(),
            user_pause_requested: false,
            failovers: Vec::new(),
        }
    }

    /// At most one phase may be `in_progress`, and it must match `current_phase`.
    pub fn invariant_single_in_progress_phase(&self) -> bool {
        let in_progress: Vec<&String> = self
            .phases
            .iter()
            .filter(|(_, p)| p.status == PhaseStatus::InProgress)
            .map(|(name, _)| name)
            .collect();
        match in_progress.as_slice() {
            [] => true,
            [only] => **only == self.current_phase,
            _ => false,
        }
    }

    pub fn invariant_node_totals(&self) -> bool {
        let total = self.nodes.len();
        let accounted = self
            .nodes
            .values()
            .filter(|n| {
                matches!(
                    n.status,
                    NodeStatus::Completed | NodeStatus::Skipped | NodeStatus::Failed
                )
            })
            .count();
        accounted <= total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UpgradeState {
        let mut state = UpgradeState::new(
            "upg-1".into(),
            "cluster0".into(),
            "7.0.1".into(),
            "7.0.26".into(),
            PromptLevel::None,
        );
        state.phases.insert(
            "pre-flight".into(),
            PhaseState::new("pre-flight", vec!["localhost:27017".into()]),
        );
        state.nodes.insert(
            "localhost:27017".into(),
            NodeState::pending("7.0.1", "7.0.26", NodeRole::Standalone),
        );
        state
    }

    #[test]
    fn new_state_has_no_in_progress_phase() {
        let state = sample();
        assert!(state.invariant_single_in_progress_phase());
    }

    #[test]
    fn single_in_progress_phase_must_match_current_phase() {
        let mut state = sample();
        state.current_phase = "pre-flight".into();
        state.phases.get_mut("pre-flight").unwrap().status = PhaseStatus::InProgress;
        assert!(state.invariant_single_in_progress_phase());

        state.current_phase = "other".into();
        assert!(!state.invariant_single_in_progress_phase());
    }

    #[test]
    fn node_totals_never_exceed_total_node_count() {
        let state = sample();
        assert!(state.invariant_node_totals());
    }

    #[test]
    fn yaml_round_trip_is_idempotent() {
        let state = sample();
        let encoded = serde_yaml::to_string(&state).unwrap();
        let decoded: UpgradeState = serde_yaml::from_str(&encoded).unwrap();
        let re_encoded = serde_yaml::to_string(&decoded).unwrap();
        assert_eq!(encoded, re_encoded);
    }

    #[test]
    fn terminal_statuses_are_classified_correctly() {
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::RolledBack.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(!NodeStatus::InProgress.is_terminal());
    }
}
