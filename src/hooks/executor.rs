//! Hook execution: shelling out to external commands with a timeout,
//! structured environment variables, and JSON-or-exit-code result parsing.

use super::types::{HookAction, HookContext, HookEvent, HookResult};
use crate::errors::RuntimeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform contract both hook variants implement.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn event(&self) -> HookEvent;
    async fn execute(&self, ctx: &HookContext) -> Result<HookResult, RuntimeError>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A user-supplied shell command, run with the hook context piped to stdin
/// as JSON and structured `MUP_*` variables in its environment.
pub struct ExternalCommandHook {
    pub name: String,
    pub event: HookEvent,
    pub command: String,
    pub timeout: Duration,
    pub working_dir: PathBuf,
}

impl ExternalCommandHook {
    pub fn new(name: impl Into<String>, event: HookEvent, command: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            event,
            command: command.into(),
            timeout: DEFAULT_TIMEOUT,
            working_dir,
        }
    }

    /// The command's first whitespace-delimited token. Used by the registry
    /// to decide whether executable-path validation applies.
    pub fn program_token(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    /// True if the first token contains a path separator, i.e. it names a
    /// file rather than a shell builtin that the registry cannot pre-check.
    pub fn is_path_reference(&self) -> bool {
        self.program_token().contains('/')
    }
}

#[async_trait]
impl Hook for ExternalCommandHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn event(&self) -> HookEvent {
        self.event
    }

    async fn execute(&self, ctx: &HookContext) -> Result<HookResult, RuntimeError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .envs(ctx.env_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RuntimeError::HookExecutionError {
                name: self.name.clone(),
                message: format!("failed to spawn: {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&HookContextPayload::from(ctx)).unwrap_or_default();
            let _ = stdin.write_all(&payload).await;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuntimeError::HookExecutionError {
                name: self.name.clone(),
                message: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| RuntimeError::HookExecutionError {
                name: self.name.clone(),
                message: e.to_string(),
            })?;

        Ok(parse_hook_result(&output.status, &output.stdout, &output.stderr))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Minimal JSON shape a hook script receives on stdin.
#[derive(serde::Serialize)]
struct HookContextPayload {
    event: Option<String>,
    cluster_name: String,
    phase: String,
    node: Option<String>,
    from_version: String,
    to_version: String,
}

impl From<&HookContext> for HookContextPayload {
    fn from(ctx: &HookContext) -> Self {
        Self {
            event: ctx.event.map(|e| e.as_str().to_string()),
            cluster_name: ctx.cluster_name.clone(),
            phase: ctx.phase.clone(),
            node: ctx.node.clone(),
            from_version: ctx.from_version.clone(),
            to_version: ctx.to_version.clone(),
        }
    }
}

/// Try to parse stdout as a JSON `HookResult`; otherwise fall back to
/// exit-code semantics: 0=Continue, 1=Block, 2=Skip, 3=Approve, 4=Reject,
/// anything else=Block.
fn parse_hook_result(status: &std::process::ExitStatus, stdout: &[u8], stderr: &[u8]) -> HookResult {
    let stdout_str = String::from_utf8_lossy(stdout);
    if let Some(json) = crate::util::extract_json_object(&stdout_str) {
        if let Ok(result) = serde_json::from_str::<HookResult>(&json) {
            return result;
        }
    }

    match status.code() {
        Some(0) => {
            if stdout_str.trim().is_empty() {
                HookResult::continue_execution()
            } else {
                HookResult {
                    action: HookAction::Continue,
                    message: Some(stdout_str.trim().to_string()),
                    metadata: Default::default(),
                }
            }
        }
        Some(1) => {
            let reason = String::from_utf8_lossy(stderr);
            let reason = if reason.trim().is_empty() { stdout_str } else { reason };
            HookResult::block(reason.trim().to_string())
        }
        Some(2) => HookResult::skip("hook requested skip"),
        Some(3) => HookResult {
            action: HookAction::Approve,
            message: None,
            metadata: Default::default(),
        },
        Some(4) => HookResult {
            action: HookAction::Reject,
            message: Some(String::from_utf8_lossy(stderr).trim().to_string()),
            metadata: Default::default(),
        },
        _ => HookResult::block(format!("hook exited with unexpected status {status}")),
    }
}

/// An in-process callable with the same contract as `ExternalCommandHook`.
pub struct FunctionHook {
    pub name: String,
    pub event: HookEvent,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(&HookContext) -> Result<HookResult, RuntimeError> + Send + Sync>,
}

impl FunctionHook {
    pub fn new(
        name: impl Into<String>,
        event: HookEvent,
        func: impl Fn(&HookContext) -> Result<HookResult, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            event,
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl Hook for FunctionHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn event(&self) -> HookEvent {
        self.event
    }

    async fn execute(&self, ctx: &HookContext) -> Result<HookResult, RuntimeError> {
        (self.func)(ctx)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Run a slice of hooks in order, stopping at the first result that is not
/// `should_continue()`.
pub async fn execute_all(hooks: &[Box<dyn Hook>], ctx: &HookContext) -> Result<HookResult, RuntimeError> {
    let mut last = HookResult::continue_execution();
    for hook in hooks {
        let result = hook.execute(ctx).await?;
        if !result.should_continue() {
            return Ok(result);
        }
        last = result;
    }
    Ok(last)
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Registry pre-validation (§4.3): for hooks whose command names a path,
/// verify it exists and is executable before the upgrade starts.
pub fn validate_hook_path(hook: &ExternalCommandHook) -> Result<(), RuntimeError> {
    if !hook.is_path_reference() {
        return Ok(());
    }
    let path = Path::new(hook.program_token());
    if !is_executable(path) {
        return Err(crate::errors::ValidationError::HookValidationError {
            name: hook.name.clone(),
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(())
}
