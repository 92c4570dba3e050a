//! Typed error hierarchy for the upgrade orchestrator.
//!
//! Three enums cover the three failure classes named in the error handling
//! design: validation failures that halt before any state is written,
//! runtime failures raised once an upgrade is in flight, and the two
//! distinguished non-failure control-flow outcomes (pause, abort).

use thiserror::Error;

/// Errors that can be detected before an upgrade touches any state: bad
/// version strings, illegal upgrade paths, hooks that would not be able to
/// run.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("cannot parse version '{0}': expected M.m or M.m.p")]
    ParseError(String),

    #[error("cannot downgrade from {from} to {to}")]
    Downgrade { from: String, to: String },

    #[error(
        "cannot upgrade from {from} directly to {to}: the next step on the ladder is {required}"
    )]
    IllegalJump {
        from: String,
        to: String,
        required: String,
    },

    #[error("{from} is not on the canonical upgrade ladder")]
    OffLadder { from: String },

    #[error("hook '{name}' points at '{path}', which does not exist or is not executable (run: chmod +x {path})")]
    HookValidationError { name: String, path: String },
}

/// Errors raised while an upgrade is in flight. All of these leave durable
/// state behind so the run can be resumed.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("state I/O error: {0}")]
    StateIOError(#[source] std::io::Error),

    #[error("no upgrade state found at {0}")]
    StateNotFound(std::path::PathBuf),

    #[error("supervisor error: {0}")]
    SupervisorError(String),

    #[error("could not connect to MongoDB: {0}")]
    MongoConnectError(String),

    #[error("MongoDB command '{command}' failed: {message}")]
    MongoCommandError { command: String, message: String },

    #[error("stepdown of primary {primary} did not elect a new primary within {timeout_secs}s")]
    StepdownTimeout { primary: String, timeout_secs: u64 },

    #[error("node {node} did not become healthy within {timeout_secs}s{detail}")]
    HealthCheckTimeout {
        node: String,
        timeout_secs: u64,
        detail: String,
    },

    #[error("binary preparation failed for version {version}: {message}")]
    BinaryPrepError { version: String, message: String },

    #[error("symlink operation failed on {path}: {message}")]
    SymlinkError { path: String, message: String },

    #[error("hook '{name}' execution failed: {message}")]
    HookExecutionError { name: String, message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Distinguished non-failure outcomes. The CLI maps these to specific exit
/// codes rather than printing them as errors.
#[derive(Debug, Error)]
pub enum ControlFlowError {
    #[error("upgrade paused by user: {reason}")]
    PausedByUser { reason: String },

    #[error("upgrade aborted by user")]
    AbortedByUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_illegal_jump_names_required_step() {
        let err = ValidationError::IllegalJump {
            from: "4.0".into(),
            to: "4.4".into(),
            required: "4.2".into(),
        };
        assert!(err.to_string().contains("4.2"));
    }

    #[test]
    fn runtime_error_converts_from_validation_error() {
        let inner = ValidationError::ParseError("bogus".into());
        let runtime: RuntimeError = inner.into();
        match &runtime {
            RuntimeError::Validation(ValidationError::ParseError(s)) => assert_eq!(s, "bogus"),
            _ => panic!("expected Validation(ParseError)"),
        }
    }

    #[test]
    fn control_flow_errors_are_matchable() {
        let paused = ControlFlowError::PausedByUser {
            reason: "operator requested pause".into(),
        };
        assert!(matches!(paused, ControlFlowError::PausedByUser { .. }));
        assert!(matches!(
            ControlFlowError::AbortedByUser,
            ControlFlowError::AbortedByUser
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationError::ParseError("x".into()));
        assert_std_error(&RuntimeError::SupervisorError("x".into()));
        assert_std_error(&ControlFlowError::AbortedByUser);
    }
}
