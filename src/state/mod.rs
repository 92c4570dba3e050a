//! Upgrade state persistence (C2): the data model and its atomic store.

pub mod model;
pub mod store;

pub use model::{
    FailoverEvent, NodeRole, NodeState, NodeStatus, OverallStatus, PhaseState, PhaseStatus,
    PromptLevel, UpgradeState,
};
pub use store::StateStore;
