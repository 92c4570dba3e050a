//! Hook Registry & Wait Manager (C3).
//!
//! A [`Hook`] is polymorphic over an [`ExternalCommandHook`] (shells out,
//! JSON-over-stdin, structured `MUP_*` env vars, per-hook timeout) and a
//! [`FunctionHook`] (in-process callable), both dispatched through the
//! [`HookRegistry`]. The [`WaitManager`] provides the companion
//! cancellation-aware paced sleeps used between upgrade steps.

pub mod executor;
pub mod registry;
pub mod types;
pub mod wait;

pub use executor::{execute_all, ExternalCommandHook, FunctionHook, Hook};
pub use registry::HookRegistry;
pub use types::{HookAction, HookContext, HookEvent, HookResult};
pub use wait::{WaitKind, WaitManager};
