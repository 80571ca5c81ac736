//! Procheck - Stored-Procedure Test Runner
//!
//! Procheck keeps a list of saved database connections, holds exactly one of
//! them as the active session, and evaluates declarative row assertions
//! ("unit tests") grouped into rule groups and executions against it.
//!
//! # Core Principles
//! - JSON-only output on stdout, logs on stderr
//! - Passwords are encrypted at rest and never leave the process in clear
//! - One active session, verified before it is used
//! - A failing check is a verdict, not an error
//!
//! # Architecture
//! The CLI and the JSON-RPC server are thin wrappers over [`Procheck`], which
//! wires the store, the credential vault and the active session into three
//! services.
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`logging`] - stderr tracing setup
//! - [`config`] - Settings files and data directory resolution
//! - [`vault`] - Credential encryption at rest
//! - [`descriptor`] - Connection input and connection string parsing
//! - [`engine`] - Database client trait and provider implementations
//! - [`session`] - The active connection slot
//! - [`store`] - Local `SQLite` store for connections and executions
//! - [`rules`] - Conditions, unit-test evaluation and roll-ups
//! - [`service`] - Connection, procedure and execution operations
//! - [`rpc`] - JSON-RPC 2.0 over stdio

pub mod app;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod rpc;
pub mod rules;
pub mod service;
pub mod session;
pub mod store;
pub mod vault;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use app::Procheck;
pub use config::{ConfigLocation, Settings};
pub use descriptor::{ConnectionConfigInput, ConnectionInput};
pub use engine::{ClientFactory, Comparator, ConnectionConfig, DatabaseClient, EngineConnector, Provider};
pub use error::{ProcheckError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use rules::{Execution, Expected, RuleGroup, TestOutcome, UnitTest, Verdict};
pub use session::{ActiveConnection, ConnectionStatus, Validity};
pub use store::{SavedConnection, Store};
pub use vault::{AgeCipher, CredentialVault, SecretCipher};
