//! JSON Output Envelope Types
//!
//! Every CLI command and RPC response is wrapped in one of two envelopes.
//!
//! # Output Contract
//! - Success: `{"ok": true, "provider": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "provider": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `provider` is empty when the command is not tied to a database provider
//! (e.g. `keygen`, `connection list`).

use serde::{Deserialize, Serialize};

use crate::error::ProcheckError;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database provider used for this operation (postgres, mysql, sqlite)
    pub provider: String,

    /// Command that was executed
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(
        provider: impl Into<String>,
        command: impl Into<String>,
        data: T,
        meta: Metadata,
    ) -> Self {
        Self { ok: true, provider: provider.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub provider: String,

    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(provider: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, provider: provider.into(), command: command.into(), error }
    }

    /// Create error envelope from `ProcheckError`
    pub fn from_error(
        provider: impl Into<String>,
        command: impl Into<String>,
        err: &ProcheckError,
    ) -> Self {
        Self::new(provider, command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INVALID_CONNECTION", "NO_HOSTS_PARSED")
    pub code: String,

    /// Human-readable error message (never contains credentials)
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

impl From<&ProcheckError> for ErrorInfo {
    fn from(err: &ProcheckError) -> Self {
        Self::new(err.error_code(), err.message())
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of unit tests evaluated (for `run`, None for other commands)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_evaluated: Option<usize>,
}

impl Metadata {
    pub fn new(execution_ms: u64) -> Self {
        Self { execution_ms, tests_evaluated: None }
    }

    pub fn with_tests(execution_ms: u64, tests_evaluated: usize) -> Self {
        Self { execution_ms, tests_evaluated: Some(tests_evaluated) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "postgres",
            "run",
            serde_json::json!({"outcome": "pass"}),
            Metadata::with_tests(42, 10),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""provider":"postgres"#));
        assert!(json.contains(r#""command":"run"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""tests_evaluated":10"#));
    }

    #[test]
    fn test_error_envelope_from_procheck_error() {
        let err = ProcheckError::no_hosts_parsed("postgresql://user:pw@/db");
        let envelope = ErrorEnvelope::from_error("postgres", "connection add", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.provider, "postgres");
        assert_eq!(envelope.command, "connection add");
        assert_eq!(envelope.error.code, "NO_HOSTS_PARSED");
        assert!(envelope.error.message.contains("No hosts parsed"));
    }

    #[test]
    fn test_metadata_without_tests() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();
        assert!(json.contains(r#""execution_ms":100"#));
        assert!(!json.contains("tests_evaluated"));
    }
}
