//! Local Store
//!
//! Durable registry of saved connections and execution results, kept in one
//! SQLite file under the data directory.
//!
//! # Tables
//! - `connections`: one row per saved connection; `password` holds the vault
//!   ciphertext and is never plaintext
//! - `executions` → `rule_groups` → `unit_tests`: execution snapshots, owned
//!   top-down with `ON DELETE CASCADE`
//!
//! Deletions still remove children explicitly inside the same transaction, so
//! ownership does not depend on the `foreign_keys` pragma being honored.
//!
//! # Migrations
//! Schema changes are applied in numbered steps recorded in `migrations`.
//! Opening an up-to-date store is a no-op.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::descriptor::HostSpec;
use crate::engine::Provider;
use crate::error::{ProcheckError, Result};

mod executions;

pub use executions::ExecutionSummary;

const MIGRATION_DOMAIN: &str = "core";

/// A saved connection as listed by `connections.fetch`
///
/// The stored ciphertext is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConnection {
    pub id: i64,
    pub nickname: String,
    pub provider: Provider,

    /// Primary host (file path for SQLite)
    pub address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    pub username: String,

    #[serde(skip)]
    pub password_ciphertext: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_database: Option<String>,

    /// Every parsed host, in order
    pub hosts: Vec<HostSpec>,

    /// False once the stored credential failed to decrypt
    pub usable: bool,

    pub created_date: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl SavedConnection {
    /// Fields needed to rewrite this row
    #[must_use]
    pub fn to_draft(&self) -> ConnectionDraft {
        ConnectionDraft {
            nickname: self.nickname.clone(),
            provider: self.provider,
            address: self.address.clone(),
            port: self.port,
            username: self.username.clone(),
            password_ciphertext: self.password_ciphertext.clone(),
            default_database: self.default_database.clone(),
            hosts: self.hosts.clone(),
        }
    }
}

/// Writable connection fields; the credential is already encrypted
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDraft {
    pub nickname: String,
    pub provider: Provider,
    pub address: String,
    pub port: Option<u16>,
    pub username: String,
    pub password_ciphertext: String,
    pub default_database: Option<String>,
    pub hosts: Vec<HostSpec>,
}

/// SQLite-backed store, safe to share between tasks
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProcheckError::store_error(format!(
                    "Failed to create data directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            ProcheckError::store_error(format!("Failed to open store '{}': {e}", path.display()))
        })?;
        let store = Self::with_connection(conn)?;

        tracing::debug!(path = %path.display(), "Store opened");
        Ok(store)
    }

    /// In-memory store, used by tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        configure_connection(&conn)?;
        run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // ========== Connections ==========

    /// Insert a connection row and return it
    pub fn insert_connection(&self, draft: &ConnectionDraft) -> Result<SavedConnection> {
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO connections (
                    nickname, provider, address, port, username, password,
                    default_database, hosts, usable, created_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
                params![
                    draft.nickname,
                    draft.provider.as_str(),
                    draft.address,
                    draft.port,
                    draft.username,
                    draft.password_ciphertext,
                    draft.default_database,
                    to_json(&draft.hosts)?,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        tracing::debug!(connection_id = id, nickname = %draft.nickname, "Connection saved");
        self.get_connection(id)
    }

    /// Load one connection; `NotFound` if the id is unknown
    pub fn get_connection(&self, id: i64) -> Result<SavedConnection> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?1"),
                [id],
                RawConnection::from_row,
            )
            .optional()?
            .ok_or_else(|| ProcheckError::not_found(format!("Connection {id}")))?;
        raw.into_connection()
    }

    /// All connections, most recently used first
    pub fn list_connections(&self) -> Result<Vec<SavedConnection>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections
             ORDER BY last_used IS NULL, last_used DESC, nickname"
        ))?;
        let rows = stmt.query_map([], RawConnection::from_row)?;

        let mut connections = Vec::new();
        for raw in rows {
            connections.push(raw?.into_connection()?);
        }
        Ok(connections)
    }

    /// Rewrite a connection's fields; a new credential makes it usable again
    pub fn update_connection(&self, id: i64, draft: &ConnectionDraft) -> Result<SavedConnection> {
        let changed = {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE connections SET
                    nickname = ?2, provider = ?3, address = ?4, port = ?5, username = ?6,
                    usable = CASE WHEN password = ?7 THEN usable ELSE 1 END,
                    password = ?7, default_database = ?8, hosts = ?9
                 WHERE id = ?1",
                params![
                    id,
                    draft.nickname,
                    draft.provider.as_str(),
                    draft.address,
                    draft.port,
                    draft.username,
                    draft.password_ciphertext,
                    draft.default_database,
                    to_json(&draft.hosts)?,
                ],
            )?
        };
        if changed == 0 {
            return Err(ProcheckError::not_found(format!("Connection {id}")));
        }
        self.get_connection(id)
    }

    pub fn delete_connection(&self, id: i64) -> Result<()> {
        let changed = self.conn.lock().execute("DELETE FROM connections WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(ProcheckError::not_found(format!("Connection {id}")));
        }
        tracing::debug!(connection_id = id, "Connection deleted");
        Ok(())
    }

    /// Flag a connection whose credential no longer decrypts
    pub fn mark_unusable(&self, id: i64) -> Result<()> {
        self.conn.lock().execute("UPDATE connections SET usable = 0 WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .execute("UPDATE connections SET last_used = ?2 WHERE id = ?1", params![id, at.to_rfc3339()])?;
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
        ",
    )
    .map_err(|e| ProcheckError::store_error(format!("Failed to configure store: {e}")))
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            domain TEXT NOT NULL,
            step INTEGER NOT NULL,
            migration TEXT NOT NULL,
            PRIMARY KEY(domain, step)
        ) STRICT",
        [],
    )?;

    let current_step: i64 = conn.query_row(
        "SELECT COALESCE(MAX(step), 0) FROM migrations WHERE domain = ?1",
        [MIGRATION_DOMAIN],
        |row| row.get(0),
    )?;

    if current_step < 1 {
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE connections (
                id INTEGER PRIMARY KEY,
                nickname TEXT NOT NULL,
                provider TEXT NOT NULL,
                address TEXT NOT NULL,
                port INTEGER,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                default_database TEXT,
                hosts TEXT NOT NULL DEFAULT '[]',
                usable INTEGER NOT NULL DEFAULT 1,
                created_date TEXT NOT NULL,
                last_used TEXT
            ) STRICT;

            CREATE TABLE executions (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                timestamp TEXT,
                database_name TEXT NOT NULL,
                procedure_name TEXT NOT NULL,
                outcome TEXT,
                UNIQUE(name, timestamp)
            ) STRICT;

            CREATE TABLE rule_groups (
                id INTEGER PRIMARY KEY,
                execution_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                test_data TEXT,
                parameters TEXT,
                cleanup_tables TEXT,
                outcome TEXT,
                UNIQUE(execution_id, name),
                FOREIGN KEY(execution_id) REFERENCES executions(id) ON DELETE CASCADE
            ) STRICT;

            CREATE TABLE unit_tests (
                id INTEGER PRIMARY KEY,
                rule_group_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                level TEXT NOT NULL,
                operation TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT,
                value TEXT,
                test_data TEXT,
                total REAL,
                expected_record_matches INTEGER,
                expected_num_records INTEGER,
                outcome TEXT,
                UNIQUE(rule_group_id, name),
                FOREIGN KEY(rule_group_id) REFERENCES rule_groups(id) ON DELETE CASCADE
            ) STRICT;

            CREATE INDEX idx_connections_last_used ON connections(last_used DESC);
            CREATE INDEX idx_executions_name ON executions(name, timestamp DESC);
            CREATE INDEX idx_rule_groups_execution ON rule_groups(execution_id, position);
            CREATE INDEX idx_unit_tests_rule_group ON unit_tests(rule_group_id, position);

            INSERT INTO migrations (domain, step, migration) VALUES ('core', 1, 'initial_schema');

            COMMIT;
            ",
        )
        .map_err(|e| ProcheckError::store_error(format!("Migration 1 failed: {e}")))?;

        tracing::info!("Applied store migration 1: initial_schema");
    }

    Ok(())
}

const CONNECTION_COLUMNS: &str = "id, nickname, provider, address, port, username, password, \
     default_database, hosts, usable, created_date, last_used";

/// Column values before text fields are decoded
struct RawConnection {
    id: i64,
    nickname: String,
    provider: String,
    address: String,
    port: Option<u16>,
    username: String,
    password: String,
    default_database: Option<String>,
    hosts: String,
    usable: bool,
    created_date: String,
    last_used: Option<String>,
}

impl RawConnection {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            nickname: row.get(1)?,
            provider: row.get(2)?,
            address: row.get(3)?,
            port: row.get(4)?,
            username: row.get(5)?,
            password: row.get(6)?,
            default_database: row.get(7)?,
            hosts: row.get(8)?,
            usable: row.get(9)?,
            created_date: row.get(10)?,
            last_used: row.get(11)?,
        })
    }

    fn into_connection(self) -> Result<SavedConnection> {
        let provider = self.provider.parse::<Provider>().map_err(|_| {
            ProcheckError::store_error(format!(
                "Connection {} has unknown provider '{}'",
                self.id, self.provider
            ))
        })?;

        Ok(SavedConnection {
            id: self.id,
            nickname: self.nickname,
            provider,
            address: self.address,
            port: self.port,
            username: self.username,
            password_ciphertext: self.password,
            default_database: self.default_database,
            hosts: from_json(&self.hosts)?,
            usable: self.usable,
            created_date: parse_time(&self.created_date)?,
            last_used: self.last_used.as_deref().map(parse_time).transpose()?,
        })
    }
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| ProcheckError::store_error(format!("Failed to encode column: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| ProcheckError::store_error(format!("Failed to decode column: {e}")))
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ProcheckError::store_error(format!("Invalid timestamp '{text}': {e}")))
}
