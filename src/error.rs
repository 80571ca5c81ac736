//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout Procheck.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `EncryptionUnavailable`: No encryption capability, fatal for any credential write
//! - `DecryptionFailed`: A stored credential could not be decrypted (per connection)
//! - `NoHostsParsed` / `MalformedConnectionString`: Rejected connection descriptors
//! - `InvalidConnection`: Verification failed after select, the session is cleared
//! - `NoActiveConnection`: An operation needed a verified session and none was installed
//! - `ConnectionFailed` / `QueryFailed` / `EngineError`: Driver-level failures
//! - `InvalidInput` / `NotFound`: Caller mistakes
//! - `StoreError` / `ConfigError`: Local persistence and configuration failures
//! - `Timeout`: A caller-level deadline expired
//!
//! Unit-test failures are NOT errors: they are captured as per-test outcomes
//! (see [`crate::rules::TestOutcome`]) and never escalate past their own slot.

use thiserror::Error;

/// Main error type for Procheck operations
#[derive(Error, Debug)]
pub enum ProcheckError {
    /// The host cannot provide an encryption capability
    #[error("Encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    /// A ciphertext blob is corrupt or was produced by a foreign identity
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// A connection string parsed without any host
    #[error("No hosts parsed from connection string: {0}")]
    NoHostsParsed(String),

    /// A connection string did not match the provider grammar
    #[error("Malformed connection string: {0}")]
    MalformedConnectionString(String),

    /// The selected connection failed verification
    #[error("Connection is not valid: {0}")]
    InvalidConnection(String),

    /// No verified connection is installed
    #[error("No active connection. Select a connection first.")]
    NoActiveConnection,

    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local store failure
    #[error("Store error: {0}")]
    StoreError(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A caller-level deadline expired
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ProcheckError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::EncryptionUnavailable(_) => "ENCRYPTION_UNAVAILABLE",
            Self::DecryptionFailed(_) => "DECRYPTION_FAILED",
            Self::NoHostsParsed(_) => "NO_HOSTS_PARSED",
            Self::MalformedConnectionString(_) => "MALFORMED_CONNECTION_STRING",
            Self::InvalidConnection(_) => "INVALID_CONNECTION",
            Self::NoActiveConnection => "NO_ACTIVE_CONNECTION",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::StoreError(_) => "STORE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// Get human-readable error message (no credentials)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn encryption_unavailable(message: impl Into<String>) -> Self {
        Self::EncryptionUnavailable(message.into())
    }

    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed(message.into())
    }

    pub fn no_hosts_parsed(message: impl Into<String>) -> Self {
        Self::NoHostsParsed(message.into())
    }

    pub fn malformed_connection_string(message: impl Into<String>) -> Self {
        Self::MalformedConnectionString(message.into())
    }

    pub fn invalid_connection(message: impl Into<String>) -> Self {
        Self::InvalidConnection(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn store_error(message: impl Into<String>) -> Self {
        Self::StoreError(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }
}

impl From<rusqlite::Error> for ProcheckError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreError(err.to_string())
    }
}

/// Result type alias for Procheck operations
pub type Result<T> = std::result::Result<T, ProcheckError>;
