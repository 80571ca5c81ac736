//! Database Client Abstraction
//!
//! This module defines the capability set the evaluation engine depends on.
//! Each provider (`PostgreSQL`, `MySQL`, `SQLite`) implements [`DatabaseClient`].
//!
//! # Stateful Clients
//! A client owns its live connection resources (pool, socket, file handle)
//! from [`ClientFactory::connect`] until [`DatabaseClient::close`]. The
//! active session (see [`crate::session`]) holds exactly one of them.
//!
//! # Database Keying
//! Every check takes the target database explicitly, so a rule group can
//! assert against a database other than the one currently selected.
//!
//! # Engine Isolation
//! Each engine implementation is independent. The only shared SQL helpers
//! are identifier quoting and comparator rendering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ProcheckError, Result};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// `PostgreSQL`
    #[serde(alias = "postgresql", alias = "PostgreSQL")]
    Postgres,
    /// `MySQL` (includes `MariaDB`)
    #[serde(alias = "mariadb", alias = "MySQL")]
    MySQL,
    /// `SQLite`
    #[serde(alias = "SQLite")]
    SQLite,
}

impl Provider {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }

    /// Port used when a descriptor omits one
    #[must_use]
    pub const fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Database used when a descriptor omits one
    #[must_use]
    pub const fn default_database(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "main",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = ProcheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            other => Err(ProcheckError::invalid_input(format!("Unknown provider '{other}'"))),
        }
    }
}

/// Decrypted connection parameters handed to a [`ClientFactory`]
///
/// Lives only in memory for the duration of a select.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub provider: Provider,

    /// Hostname (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for postgres/mysql)
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Initial working database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("provider", &self.provider)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("file", &self.file)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            provider: Provider::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `MySQL` connection config
    #[must_use]
    pub const fn mysql(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            provider: Provider::MySQL,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub const fn sqlite(file: PathBuf) -> Self {
        Self {
            provider: Provider::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file),
        }
    }

    /// Working database, falling back to the provider default
    #[must_use]
    pub fn database_or_default(&self) -> String {
        self.database
            .clone()
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| self.provider.default_database().to_string())
    }
}

/// Numeric comparator used by number tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    /// Parse an operation symbol (`=`, `==`, `!=`, `<>`, `<`, `>`, `<=`, `>=`)
    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    /// SQL operator (`<>` for inequality, portable across engines)
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }

    /// Apply the comparator to `stored <op> expected`
    #[must_use]
    pub fn holds(&self, stored: f64, expected: f64) -> bool {
        match self {
            Self::Eq => stored == expected,
            Self::Ne => stored != expected,
            Self::Lt => stored < expected,
            Self::Gt => stored > expected,
            Self::Le => stored <= expected,
            Self::Ge => stored >= expected,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Ne => "!=",
            other => other.sql(),
        };
        write!(f, "{symbol}")
    }
}

/// Stored procedure parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureParameter {
    /// Parameter name (may be empty for positional parameters)
    pub name: String,

    /// Engine-specific type name
    pub data_type: String,

    /// `IN`, `OUT` or `INOUT`
    pub mode: String,

    /// 1-based position
    pub position: u32,
}

/// Capability set of a live database client
///
/// All check methods answer whether at least one row of `table` satisfies
/// the predicate. Identifiers are quoted by the engine; values are always
/// bound as parameters.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Working database name
    async fn current_database(&self) -> String;

    /// Check that the connection is alive and usable
    async fn verify(&self) -> Result<bool>;

    /// Change the working database without discarding the client
    async fn use_database(&self, database: &str) -> Result<()>;

    /// Tear down pools/sockets. The client is unusable afterwards.
    async fn close(&self) -> Result<()>;

    /// A row whose `column` equals `value` exactly
    async fn check_exact(&self, database: &str, table: &str, column: &str, value: &str)
        -> Result<bool>;

    /// A row whose boolean `column` holds `literal` (`true` or `false`)
    ///
    /// Engines storing booleans as integers also accept `1` / `0` here.
    async fn check_boolean(
        &self,
        database: &str,
        table: &str,
        column: &str,
        literal: &str,
    ) -> Result<bool> {
        self.check_exact(database, table, column, literal).await
    }

    /// A row whose `column` contains `substr` as a literal substring
    async fn check_contains(
        &self,
        database: &str,
        table: &str,
        column: &str,
        substr: &str,
    ) -> Result<bool>;

    /// A row keyed (by primary key) by `key` exists in `table`
    async fn check_id(&self, database: &str, key: &str, table: &str) -> Result<bool>;

    /// A row whose numeric `column` satisfies `column <op> value`
    async fn check_number(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: f64,
        comparator: Comparator,
    ) -> Result<bool>;

    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Procedure names grouped by database
    async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Procedure source text
    async fn fetch_procedure(&self, database: &str, name: &str) -> Result<String>;

    async fn procedure_parameters(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Vec<ProcedureParameter>>;

    /// Invoke a procedure with positional text arguments
    async fn call_procedure(&self, database: &str, name: &str, params: &[String]) -> Result<()>;

    /// Remove all rows from `table` (rule-group cleanup)
    async fn reset_table(&self, database: &str, table: &str) -> Result<()>;
}

/// Builds live clients from decrypted connection parameters
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>>;
}

/// Default factory dispatching on [`Provider`] to the compiled-in engines
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConnector;

#[async_trait]
impl ClientFactory for EngineConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        match config.provider {
            #[cfg(feature = "postgres")]
            Provider::Postgres => Ok(Arc::new(postgres::PostgresClient::connect(config).await?)),
            #[cfg(feature = "mysql")]
            Provider::MySQL => Ok(Arc::new(mysql::MySqlClient::connect(config).await?)),
            #[cfg(feature = "sqlite")]
            Provider::SQLite => Ok(Arc::new(sqlite::SqliteClient::connect(config)?)),
            #[allow(unreachable_patterns)]
            other => Err(ProcheckError::invalid_input(format!(
                "Provider '{other}' is not enabled in this build"
            ))),
        }
    }
}

/// Quote a possibly dot-qualified identifier with `quote` (`"` or `` ` ``).
///
/// Each dot-separated part is quoted on its own and embedded quote
/// characters are doubled.
pub fn quote_identifier(name: &str, quote: char) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProcheckError::invalid_input("Identifier cannot be empty"));
    }

    let mut quoted = Vec::new();
    for part in name.split('.') {
        if part.is_empty() {
            return Err(ProcheckError::invalid_input(format!("Invalid identifier '{name}'")));
        }
        let escaped = part.replace(quote, &format!("{quote}{quote}"));
        quoted.push(format!("{quote}{escaped}{quote}"));
    }

    Ok(quoted.join("."))
}

/// Quote `table`, qualifying it with `database` unless it is already dot-qualified.
pub fn qualified_table(database: &str, table: &str, quote: char) -> Result<String> {
    if table.contains('.') || database.trim().is_empty() {
        return quote_identifier(table, quote);
    }

    Ok(format!("{}.{}", quote_identifier(database, quote)?, quote_identifier(table, quote)?))
}

/// Integer spelling of a boolean literal, for engines that store booleans as `0`/`1`.
#[must_use]
pub fn boolean_alias(value: &str) -> &str {
    match value {
        "true" => "1",
        "false" => "0",
        other => other,
    }
}
