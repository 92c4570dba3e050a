//! Local supervisor control: the concrete `NodeOperations` backend used for
//! a single-host cluster, plus `supervisor.ini` rendering.

pub mod config_gen;
pub mod local;

pub use local::{launch_supervisor, LocalNodeOperations, RealSupervisorLauncher, SupervisorHandle, SupervisorLauncher};
