//! MySQL Database Client Implementation
//!
//! This module implements [`DatabaseClient`] for MySQL servers (including MariaDB).
//!
//! # Features
//! - Pooled client-server connections via TCP
//! - Tables qualified by database, so one pool serves every database
//! - Procedure listing, parameters and source via `information_schema` / `SHOW CREATE`
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - `close` disconnects the pool; disconnect failures are returned to the caller
//! - Exact, id and boolean checks compare bytes, so the column collation never
//!   folds case or accents
//! - Booleans are `TINYINT(1)`, so boolean checks also match `1`/`0`
//! - Numeric checks skip rows whose text is not a number (`'abc'` is never `0`)
//! - `CAST(... AS DOUBLE)` needs MySQL 8.0.17+ or MariaDB 10.4+
//! - `OUT`/`INOUT` procedure arguments go through session variables

use async_trait::async_trait;
use mysql_async::{prelude::*, Conn, OptsBuilder, Params, Pool, Value};
use std::collections::BTreeMap;

use crate::engine::{
    boolean_alias, qualified_table, quote_identifier, Comparator, ConnectionConfig,
    DatabaseClient, ProcedureParameter, Provider,
};
use crate::error::{ProcheckError, Result};

/// MySQL database client
pub struct MySqlClient {
    pool: parking_lot::Mutex<Option<Pool>>,
    database: parking_lot::Mutex<String>,
}

impl MySqlClient {
    /// Create the pool and check one connection out of it
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.provider != Provider::MySQL {
            return Err(ProcheckError::invalid_input(format!(
                "Expected MySQL provider, got {}",
                config.provider
            )));
        }

        let pool = Pool::new(build_mysql_opts(config)?);
        let mut conn = pool.get_conn().await.map_err(|e| {
            ProcheckError::connection_failed(format!("Failed to connect to MySQL: {e}"))
        })?;
        conn.ping().await.map_err(|e| {
            ProcheckError::connection_failed(format!("MySQL did not answer ping: {e}"))
        })?;
        drop(conn);

        Ok(Self {
            pool: parking_lot::Mutex::new(Some(pool)),
            database: parking_lot::Mutex::new(config.database_or_default()),
        })
    }

    async fn conn(&self) -> Result<Conn> {
        let pool = self
            .pool
            .lock()
            .clone()
            .ok_or_else(|| ProcheckError::connection_failed("MySQL pool is closed"))?;

        pool.get_conn().await.map_err(|e| {
            ProcheckError::connection_failed(format!("Failed to get MySQL connection: {e}"))
        })
    }

    async fn exists(&self, context: &str, sql: &str, params: impl Into<Params> + Send) -> Result<bool> {
        let mut conn = self.conn().await?;
        let found: Option<i64> = conn
            .exec_first(sql, params)
            .await
            .map_err(|e| ProcheckError::query_failed(format!("{context}: {e}")))?;
        Ok(found == Some(1))
    }

    async fn primary_key_column(&self, database: &str, table: &str) -> Result<String> {
        let (schema, table) = table.rsplit_once('.').unwrap_or((database, table));
        let query = "SELECT column_name
                     FROM information_schema.key_column_usage
                     WHERE table_schema = ?
                     AND table_name = ?
                     AND constraint_name = 'PRIMARY'
                     ORDER BY ordinal_position
                     LIMIT 1";

        let mut conn = self.conn().await?;
        let column: Option<String> = conn.exec_first(query, (schema, table)).await.map_err(|e| {
            ProcheckError::query_failed(format!(
                "Failed to read primary key of {schema}.{table}: {e}"
            ))
        })?;

        Ok(column.unwrap_or_else(|| "id".to_string()))
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    fn provider(&self) -> Provider {
        Provider::MySQL
    }

    async fn current_database(&self) -> String {
        self.database.lock().clone()
    }

    async fn verify(&self) -> Result<bool> {
        let mut conn = match self.conn().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "MySQL verification could not get a connection");
                return Ok(false);
            }
        };

        match conn.ping().await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "MySQL verification ping failed");
                Ok(false)
            }
        }
    }

    async fn use_database(&self, database: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let found: Option<String> = conn
            .exec_first(
                "SELECT schema_name FROM information_schema.schemata WHERE schema_name = ?",
                (database,),
            )
            .await
            .map_err(|e| ProcheckError::query_failed(format!("Failed to look up database: {e}")))?;

        if found.is_none() {
            return Err(ProcheckError::not_found(format!("Database '{database}'")));
        }

        *self.database.lock() = database.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(pool) = self.pool.lock().take() else {
            return Ok(());
        };

        pool.disconnect().await.map_err(|e| {
            ProcheckError::engine_error("mysql", format!("Failed to disconnect pool: {e}"))
        })
    }

    async fn check_exact(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<bool> {
        let sql = exact_sql(&qualified_table(database, table, '`')?, &quote_identifier(column, '`')?);
        self.exists("Exact check failed", &sql, (value,)).await
    }

    async fn check_boolean(
        &self,
        database: &str,
        table: &str,
        column: &str,
        literal: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {col} IN ({}, {}))",
            qualified_table(database, table, '`')?,
            BINARY_PARAM,
            BINARY_PARAM,
            col = binary(&quote_identifier(column, '`')?),
        );
        self.exists("Boolean check failed", &sql, (literal, boolean_alias(literal))).await
    }

    async fn check_contains(
        &self,
        database: &str,
        table: &str,
        column: &str,
        substr: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE LOCATE(CAST(? AS BINARY), CAST({} AS BINARY)) > 0)",
            qualified_table(database, table, '`')?,
            quote_identifier(column, '`')?,
        );
        self.exists("Contains check failed", &sql, (substr,)).await
    }

    async fn check_id(&self, database: &str, key: &str, table: &str) -> Result<bool> {
        let pk = self.primary_key_column(database, table).await?;
        let sql = exact_sql(&qualified_table(database, table, '`')?, &quote_identifier(&pk, '`')?);
        self.exists("ID check failed", &sql, (key,)).await
    }

    async fn check_number(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: f64,
        comparator: Comparator,
    ) -> Result<bool> {
        let sql = number_sql(
            &qualified_table(database, table, '`')?,
            &quote_identifier(column, '`')?,
            comparator,
        );
        self.exists("Number check failed", &sql, (NUMERIC_PATTERN, value)).await
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.query("SELECT schema_name FROM information_schema.schemata ORDER BY schema_name")
            .await
            .map_err(|e| ProcheckError::query_failed(format!("Failed to list databases: {e}")))
    }

    async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(String, String)> = conn
            .query(
                "SELECT routine_schema, routine_name
                 FROM information_schema.routines
                 WHERE routine_type = 'PROCEDURE'
                 ORDER BY routine_schema, routine_name",
            )
            .await
            .map_err(|e| ProcheckError::query_failed(format!("Failed to list procedures: {e}")))?;

        let mut procedures: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (schema, name) in rows {
            procedures.entry(schema).or_default().push(name);
        }
        Ok(procedures)
    }

    async fn fetch_procedure(&self, database: &str, name: &str) -> Result<String> {
        let sql = format!("SHOW CREATE PROCEDURE {}", qualified_table(database, name, '`')?);
        let mut conn = self.conn().await?;
        let row: Option<mysql_async::Row> = conn.query_first(sql).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to fetch procedure {name}: {e}"))
        })?;

        // Columns: Procedure, sql_mode, Create Procedure, ...
        row.and_then(|row| row.get_opt::<Option<String>, _>(2).and_then(|value| value.ok()))
            .flatten()
            .ok_or_else(|| ProcheckError::not_found(format!("Procedure '{name}' in {database}")))
    }

    async fn procedure_parameters(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Vec<ProcedureParameter>> {
        let (schema, routine) = name.rsplit_once('.').unwrap_or((database, name));
        let query = "SELECT COALESCE(parameter_name, ''),
                            COALESCE(dtd_identifier, data_type),
                            COALESCE(parameter_mode, 'IN'),
                            ordinal_position
                     FROM information_schema.parameters
                     WHERE specific_schema = ?
                     AND specific_name = ?
                     AND routine_type = 'PROCEDURE'
                     AND ordinal_position > 0
                     ORDER BY ordinal_position";

        let mut conn = self.conn().await?;
        let rows: Vec<(String, String, String, u32)> =
            conn.exec(query, (schema, routine)).await.map_err(|e| {
                ProcheckError::query_failed(format!("Failed to read parameters of {name}: {e}"))
            })?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, mode, position)| ProcedureParameter {
                name,
                data_type,
                mode,
                position,
            })
            .collect())
    }

    async fn call_procedure(&self, database: &str, name: &str, params: &[String]) -> Result<()> {
        let signature = self.procedure_parameters(database, name).await?;
        let mut conn = self.conn().await?;

        let mut args = Vec::new();
        let mut bound: Vec<Value> = Vec::new();
        let mut remaining = params.iter();
        for param in &signature {
            let variable = format!("@procheck_{}", param.position);
            match param.mode.to_uppercase().as_str() {
                "OUT" => args.push(variable),
                "INOUT" => {
                    let Some(value) = remaining.next() else { break };
                    conn.exec_drop(format!("SET {variable} = ?"), (value.as_str(),))
                        .await
                        .map_err(|e| {
                            ProcheckError::query_failed(format!("Failed to bind {variable}: {e}"))
                        })?;
                    args.push(variable);
                }
                _ => {
                    let Some(value) = remaining.next() else { break };
                    bound.push(Value::from(value.as_str()));
                    args.push("?".to_string());
                }
            }
        }

        if remaining.next().is_some() {
            return Err(ProcheckError::invalid_input(format!(
                "Procedure '{name}' accepts {} argument(s), got {}",
                signature.len(),
                params.len()
            )));
        }

        let sql = format!("CALL {}({})", qualified_table(database, name, '`')?, args.join(", "));
        let params = if bound.is_empty() { Params::Empty } else { Params::Positional(bound) };
        conn.exec_drop(sql, params).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to call procedure {name}: {e}"))
        })?;

        tracing::debug!(database, procedure = name, "Called procedure");
        Ok(())
    }

    async fn reset_table(&self, database: &str, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", qualified_table(database, table, '`')?);
        let mut conn = self.conn().await?;
        conn.query_drop(sql).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to reset table {table}: {e}"))
        })
    }
}

/// Bound parameter compared byte for byte
const BINARY_PARAM: &str = "CAST(? AS BINARY)";

/// Text forms MySQL converts to a number without truncation
const NUMERIC_PATTERN: &str = "^[[:space:]]*[-+]?([0-9]+[.]?[0-9]*|[.][0-9]+)([eE][-+]?[0-9]+)?[[:space:]]*$";

fn binary(column: &str) -> String {
    format!("CAST({column} AS BINARY)")
}

/// Case and accent sensitive equality, regardless of the column collation
fn exact_sql(table: &str, column: &str) -> String {
    format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {} = {BINARY_PARAM})", binary(column))
}

/// Numeric comparison over rows whose value reads as a number.
///
/// Binds the numeric pattern first, then the operand.
fn number_sql(table: &str, column: &str, comparator: Comparator) -> String {
    format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE CAST({column} AS CHAR) REGEXP ? AND CAST({column} AS DOUBLE) {} ?)",
        comparator.sql(),
    )
}

/// Build MySQL connection options from `ConnectionConfig`
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| ProcheckError::invalid_input("MySQL requires 'host' parameter"))?;

    let port = config.port.or_else(|| Provider::MySQL.default_port()).unwrap_or(3306);

    let user = config
        .user
        .as_ref()
        .filter(|user| !user.is_empty())
        .ok_or_else(|| ProcheckError::invalid_input("MySQL requires 'user' parameter"))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(config.password.as_ref().filter(|p| !p.is_empty()))
        .db_name(config.database.as_ref().filter(|db| !db.is_empty()));

    Ok(opts)
}
