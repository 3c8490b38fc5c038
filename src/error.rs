//! Bridge error taxonomy.
//!
//! Every failure a request can hit has a named variant. Variants never
//! escape a handler: they are folded into `OperationResult::fail` at the
//! boundary closest to where they were raised.

use thiserror::Error;

/// Message prefix used for dispatch timeouts. Callers match on it to
/// decide whether a retry is meaningful.
pub const TIMEOUT_PREFIX: &str = "Operation timed out";

/// Message prefix used while the host has unresolved compile errors.
pub const BUILD_BLOCKED_PREFIX: &str = "Host has compile errors";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unknown endpoint: {0}")]
    EndpointNotFound(String),

    #[error("Invalid parameter '{field}': {reason}")]
    ParameterInvalid { field: String, reason: String },

    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    #[error("Compilation failed:\n{0}")]
    CompilationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("{TIMEOUT_PREFIX} after {after_ms} ms (outcome unknown)")]
    DispatchTimeout { after_ms: u64 },

    #[error("{BUILD_BLOCKED_PREFIX}; requests are paused until they are fixed:\n{0}")]
    HostBuildBlocked(String),
}

impl BridgeError {
    pub fn param(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::ParameterInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_build_blocked_carry_stable_prefixes() {
        let timeout = BridgeError::DispatchTimeout { after_ms: 30_000 }.to_string();
        assert!(timeout.starts_with(TIMEOUT_PREFIX));

        let blocked = BridgeError::HostBuildBlocked("scripts/a.rhai: bad".into()).to_string();
        assert!(blocked.starts_with(BUILD_BLOCKED_PREFIX));
        assert!(blocked.contains("scripts/a.rhai"));
    }

    #[test]
    fn parameter_errors_name_the_field() {
        let err = BridgeError::param("code", "missing");
        assert_eq!(err.to_string(), "Invalid parameter 'code': missing");
    }
}
