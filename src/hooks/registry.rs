//! Hook registration and dispatch (C3).

use super::executor::{execute_all, validate_hook_path, ExternalCommandHook, Hook};
use super::types::{HookContext, HookEvent, HookResult};
use crate::errors::RuntimeError;
use std::collections::HashMap;

#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookEvent, Vec<Box<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.entry(hook.event()).or_default().push(hook);
    }

    pub fn has_hooks_for(&self, event: HookEvent) -> bool {
        self.hooks.get(&event).is_some_and(|v| !v.is_empty())
    }

    /// Pre-upgrade validation: every registered `ExternalCommandHook` whose
    /// command names a path must point at an existing, executable file.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        for hooks in self.hooks.values() {
            for hook in hooks {
                if let Some(external) = hook.as_any().downcast_ref::<ExternalCommandHook>() {
                    validate_hook_path(external)?;
                }
            }
        }
        Ok(())
    }

    /// Run every hook registered for `ctx.event`, in registration order,
    /// stopping at the first non-continuing result.
    pub async fn dispatch(&self, ctx: &HookContext) -> Result<HookResult, RuntimeError> {
        let Some(event) = ctx.event else {
            return Ok(HookResult::continue_execution());
        };
        match self.hooks.get(&event) {
            Some(hooks) if !hooks.is_empty() => execute_all(hooks, ctx).await,
            _ => Ok(HookResult::continue_execution()),
        }
    }

    /// Dispatch `ctx`, downgrading a failing result to a logged warning if
    /// the event is advisory rather than halting it (§7).
    pub async fn dispatch_tolerant(&self, ctx: &HookContext) -> HookResult {
        match self.dispatch(ctx).await {
            Ok(result) => result,
            Err(err) => {
                let advisory = ctx.event.is_some_and(|e| e.is_advisory());
                if advisory {
                    tracing::warn!("Warning: hook execution failed: {err}");
                    HookResult::continue_execution()
                } else {
                    HookResult::block(err.to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::executor::FunctionHook;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dispatch_returns_continue_when_no_hooks_registered() {
        let registry = HookRegistry::new();
        let ctx = HookContext::new("c", "7.0.1", "7.0.26").with_event(HookEvent::BeforePhase);
        let result = registry.dispatch(&ctx).await.unwrap();
        assert!(result.should_continue());
    }

    #[tokio::test]
    async fn dispatch_runs_registered_function_hook() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(FunctionHook::new(
            "blocker",
            HookEvent::BeforePhase,
            |_ctx| Ok(HookResult::block("nope")),
        )));
        let ctx = HookContext::new("c", "7.0.1", "7.0.26").with_event(HookEvent::BeforePhase);
        let result = registry.dispatch(&ctx).await.unwrap();
        assert!(!result.should_continue());
    }

    #[test]
    fn validate_rejects_non_executable_external_hook() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("hook.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

        let mut registry = HookRegistry::new();
        registry.register(Box::new(ExternalCommandHook::new(
            "broken",
            HookEvent::BeforeNodeUpgrade,
            script.display().to_string(),
            dir.path().to_path_buf(),
        )));

        assert!(registry.validate().is_err());
    }

    #[tokio::test]
    async fn dispatch_tolerant_downgrades_advisory_failures() {
        let mut registry = HookRegistry::new();
        registry.register(Box::new(FunctionHook::new(
            "fails",
            HookEvent::AfterNodeUpgrade,
            |_ctx| {
                Err(RuntimeError::HookExecutionError {
                    name: "fails".into(),
                    message: "boom".into(),
                })
            },
        )));
        let ctx = HookContext::new("c", "7.0.1", "7.0.26").with_event(HookEvent::AfterNodeUpgrade);
        let result = registry.dispatch_tolerant(&ctx).await;
        assert!(result.should_continue());
    }
}
