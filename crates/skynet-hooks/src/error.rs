use thiserror::Error;

/// Internal errors from discovering or invoking hooks.
///
/// These never escape [`crate::HookEngine::emit`] to its caller — a handler
/// failure is logged and isolated so other handlers still run for the same
/// event. Kept as a typed enum (rather than a bare `String`) so discovery
/// and invocation failures stay distinguishable in logs and tests.
#[derive(Debug, Error)]
pub enum HookError {
    /// The handler process failed to spawn, exited non-zero, or its stdin
    /// payload could not be encoded.
    #[error("hook execution failed: {0}")]
    ExecutionFailed(String),

    /// The handler did not finish within its invocation budget.
    #[error("hook timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A `HOOK.yaml` manifest or hook directory was malformed.
    #[error("invalid hook configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, HookError>;
