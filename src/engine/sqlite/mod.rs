//! `SQLite` Database Client Implementation
//!
//! This module implements [`DatabaseClient`] for `SQLite` database files.
//!
//! # Features
//! - File-based connections, opened read-write (never created on connect)
//! - Attached schemas (`main`, ...) play the role of databases
//! - Row checks with bound parameters and quoted identifiers
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, calls never cross an `.await`)
//! - The connection lives in a `parking_lot::Mutex<Option<_>>`; `close` empties it
//! - `SQLite` has no stored procedures: listing yields nothing, every other
//!   procedure operation fails with an engine error
//! - Booleans are stored as integers, so boolean checks also match `1`/`0`;
//!   exact checks compare the text form only
//! - Numeric checks skip rows whose value is not a number (`'abc'` is never `0`)

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{
    boolean_alias, qualified_table, quote_identifier, Comparator, ConnectionConfig,
    DatabaseClient, ProcedureParameter, Provider,
};
use crate::error::{ProcheckError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// `SQLite` database client
pub struct SqliteClient {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    database: Mutex<String>,
}

impl SqliteClient {
    /// Open the database file named by `config.file`
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.provider != Provider::SQLite {
            return Err(ProcheckError::invalid_input(format!(
                "Expected SQLite provider, got {}",
                config.provider
            )));
        }

        let path = config
            .file
            .as_ref()
            .ok_or_else(|| ProcheckError::invalid_input("SQLite requires 'file' parameter"))?;

        let conn = open_connection(path)?;
        tracing::debug!(path = %path.display(), "Opened SQLite database");

        Ok(Self {
            path: path.clone(),
            conn: Mutex::new(Some(conn)),
            database: Mutex::new(config.database_or_default()),
        })
    }

    /// Database file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open connection, mapping driver errors to `QueryFailed`
    fn with_connection<T>(
        &self,
        context: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| ProcheckError::connection_failed("SQLite connection is closed"))?;

        f(conn).map_err(|e| ProcheckError::query_failed(format!("{context}: {e}")))
    }

    fn exists(&self, context: &str, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
        self.with_connection(context, |conn| conn.query_row(sql, params, |row| row.get(0)))
    }

    /// Unresolved double-quoted identifiers degrade to string literals in `SQLite`,
    /// so columns are checked up front.
    fn ensure_column(&self, database: &str, table: &str, column: &str) -> Result<()> {
        let (database, table) = split_table(database, table);
        let found: bool = self.with_connection("Failed to read table columns", |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1, ?2) WHERE name = ?3)",
                [table, database, column],
                |row| row.get(0),
            )
        })?;

        if found {
            Ok(())
        } else {
            Err(ProcheckError::query_failed(format!("no such column: {table}.{column}")))
        }
    }

    fn primary_key_column(&self, database: &str, table: &str) -> Result<String> {
        let (database, table) = split_table(database, table);
        let column: Option<String> = self.with_connection("Failed to read primary key", |conn| {
            conn.query_row(
                "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk LIMIT 1",
                [table, database],
                |row| row.get(0),
            )
            .optional()
        })?;

        Ok(column.unwrap_or_else(|| "id".to_string()))
    }

    fn unsupported(operation: &str) -> ProcheckError {
        ProcheckError::engine_error(
            "sqlite",
            format!("SQLite does not support stored procedures ({operation})"),
        )
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    fn provider(&self) -> Provider {
        Provider::SQLite
    }

    async fn current_database(&self) -> String {
        self.database.lock().clone()
    }

    async fn verify(&self) -> Result<bool> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(false);
        };

        match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "SQLite verification query failed");
                Ok(false)
            }
        }
    }

    async fn use_database(&self, database: &str) -> Result<()> {
        let databases = self.list_databases().await?;
        if !databases.iter().any(|db| db == database) {
            return Err(ProcheckError::not_found(format!(
                "Schema '{database}' is not attached to {}",
                self.path.display()
            )));
        }

        *self.database.lock() = database.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };

        conn.close().map_err(|(_, e)| {
            ProcheckError::engine_error("sqlite", format!("Failed to close database: {e}"))
        })
    }

    async fn check_exact(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<bool> {
        self.ensure_column(database, table, column)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE CAST({} AS TEXT) = ?1)",
            qualified_table(database, table, '"')?,
            quote_identifier(column, '"')?,
        );
        self.exists("Exact check failed", &sql, [value])
    }

    async fn check_boolean(
        &self,
        database: &str,
        table: &str,
        column: &str,
        literal: &str,
    ) -> Result<bool> {
        self.ensure_column(database, table, column)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE CAST({col} AS TEXT) IN (?1, ?2))",
            qualified_table(database, table, '"')?,
            col = quote_identifier(column, '"')?,
        );
        self.exists("Boolean check failed", &sql, [literal, boolean_alias(literal)])
    }

    async fn check_contains(
        &self,
        database: &str,
        table: &str,
        column: &str,
        substr: &str,
    ) -> Result<bool> {
        self.ensure_column(database, table, column)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE instr(CAST({} AS TEXT), ?1) > 0)",
            qualified_table(database, table, '"')?,
            quote_identifier(column, '"')?,
        );
        self.exists("Contains check failed", &sql, [substr])
    }

    async fn check_id(&self, database: &str, key: &str, table: &str) -> Result<bool> {
        let pk = self.primary_key_column(database, table)?;
        self.ensure_column(database, table, &pk)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE CAST({} AS TEXT) = ?1)",
            qualified_table(database, table, '"')?,
            quote_identifier(&pk, '"')?,
        );
        self.exists("ID check failed", &sql, [key])
    }

    async fn check_number(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: f64,
        comparator: Comparator,
    ) -> Result<bool> {
        self.ensure_column(database, table, column)?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE CAST({col} AS REAL) = {col} AND CAST({col} AS REAL) {} ?1)",
            qualified_table(database, table, '"')?,
            comparator.sql(),
            col = quote_identifier(column, '"')?,
        );
        self.exists("Number check failed", &sql, [value])
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        self.with_connection("Failed to list schemas", |conn| {
            let mut stmt = conn.prepare("SELECT name FROM pragma_database_list ORDER BY seq")?;
            let names = stmt.query_map([], |row| row.get(0))?;
            names.collect()
        })
    }

    async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(BTreeMap::new())
    }

    async fn fetch_procedure(&self, _database: &str, _name: &str) -> Result<String> {
        Err(Self::unsupported("fetch"))
    }

    async fn procedure_parameters(
        &self,
        _database: &str,
        _name: &str,
    ) -> Result<Vec<ProcedureParameter>> {
        Err(Self::unsupported("parameters"))
    }

    async fn call_procedure(&self, _database: &str, _name: &str, _params: &[String]) -> Result<()> {
        Err(Self::unsupported("call"))
    }

    async fn reset_table(&self, database: &str, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", qualified_table(database, table, '"')?);
        self.with_connection("Failed to reset table", |conn| conn.execute(&sql, [])).map(|_| ())
    }
}

/// Split a dot-qualified table into `(schema, table)`
fn split_table<'a>(database: &'a str, table: &'a str) -> (&'a str, &'a str) {
    table.rsplit_once('.').unwrap_or((database, table))
}

/// Open an existing `SQLite` file read-write. Missing files are an error.
fn open_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        ProcheckError::connection_failed(format!("Failed to open SQLite database: {e}"))
    })?;

    conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
        ProcheckError::engine_error("sqlite", format!("Failed to set busy timeout: {e}"))
    })?;

    Ok(conn)
}
