//! `PostgreSQL` Database Client Implementation
//!
//! This module implements [`DatabaseClient`] for `PostgreSQL` servers.
//!
//! # Features
//! - Client-server connections via TCP
//! - One session per database, opened lazily and cached
//! - Procedure listing and parameters via `information_schema`
//! - Procedure source via `pg_get_functiondef`
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - A `PostgreSQL` session is bound to one database, so checks against another
//!   database open (or reuse) a session for it
//! - Spawned connection tasks are aborted on `close`
//! - Columns are compared through `::text` / `::double precision` casts, so
//!   booleans match the literals `true` / `false`
//! - Procedure arguments are bound as text and cast to the declared types

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config, NoTls};

use crate::engine::{
    quote_identifier, Comparator, ConnectionConfig, DatabaseClient, ProcedureParameter, Provider,
};
use crate::error::{ProcheckError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Schemas never searched for user procedures
const SYSTEM_SCHEMAS: &str = "('pg_catalog', 'information_schema')";

struct Session {
    client: Arc<Client>,
    task: JoinHandle<()>,
}

/// `PostgreSQL` database client
pub struct PostgresClient {
    base: Config,
    sessions: Mutex<HashMap<String, Session>>,
    database: parking_lot::Mutex<String>,
}

impl PostgresClient {
    /// Connect to the configured (or default) database
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.provider != Provider::Postgres {
            return Err(ProcheckError::invalid_input(format!(
                "Expected PostgreSQL provider, got {}",
                config.provider
            )));
        }

        let database = config.database_or_default();
        let client = Self {
            base: build_pg_config(config)?,
            sessions: Mutex::new(HashMap::new()),
            database: parking_lot::Mutex::new(database.clone()),
        };

        // Surface bad credentials/hosts at connect time
        client.session(&database).await?;
        Ok(client)
    }

    /// Cached session for `database`, reconnecting if it was closed
    async fn session(&self, database: &str) -> Result<Arc<Client>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(database) {
            if !session.client.is_closed() {
                return Ok(Arc::clone(&session.client));
            }
        }

        let mut config = self.base.clone();
        config.dbname(database);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            ProcheckError::connection_failed(format!(
                "Failed to connect to PostgreSQL database '{database}': {e}"
            ))
        })?;

        // Connection errors are not logged to prevent credential leakage
        let task = tokio::spawn(async move {
            let _ = connection.await;
        });

        tracing::debug!(database, "Opened PostgreSQL session");
        let client = Arc::new(client);
        if let Some(stale) =
            sessions.insert(database.to_string(), Session { client: Arc::clone(&client), task })
        {
            stale.task.abort();
        }

        Ok(client)
    }

    async fn exists(
        &self,
        database: &str,
        context: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<bool> {
        let client = self.session(database).await?;
        let row = client
            .query_one(sql, params)
            .await
            .map_err(|e| ProcheckError::query_failed(format!("{context}: {e}")))?;
        Ok(row.get(0))
    }

    async fn primary_key_column(&self, client: &Client, table: &str) -> Result<String> {
        let query = "
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a
              ON a.attrelid = i.indrelid
              AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = $1::text::regclass
              AND i.indisprimary
            ORDER BY array_position(i.indkey::int2[], a.attnum)
            LIMIT 1";

        let relation = quote_identifier(table, '"')?;
        let row = client.query_opt(query, &[&relation]).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to read primary key of {table}: {e}"))
        })?;

        Ok(row.map_or_else(|| "id".to_string(), |row| row.get(0)))
    }

    /// Routine parameters with the types used to cast text arguments
    async fn routine_parameters(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Vec<(ProcedureParameter, String)>> {
        let (schema, routine) = split_routine(name);
        let query = format!(
            "SELECT r.specific_name::text,
                    COALESCE(p.parameter_name::text, ''),
                    p.data_type::text,
                    COALESCE(p.parameter_mode::text, 'IN'),
                    p.ordinal_position::int4,
                    p.udt_schema::text,
                    p.udt_name::text
             FROM information_schema.routines r
             JOIN information_schema.parameters p
               ON p.specific_schema = r.specific_schema
               AND p.specific_name = r.specific_name
             WHERE r.routine_type = 'PROCEDURE'
               AND r.routine_name = $1
               AND ($2::text IS NULL OR r.routine_schema = $2)
               AND r.routine_schema NOT IN {SYSTEM_SCHEMAS}
             ORDER BY r.specific_name, p.ordinal_position"
        );

        let client = self.session(database).await?;
        let rows = client.query(&query, &[&routine, &schema]).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to read parameters of {name}: {e}"))
        })?;

        // Overloads: keep the first signature only
        let first: Option<String> = rows.first().map(|row| row.get(0));
        let params = rows
            .iter()
            .filter(|row| Some(row.get::<_, String>(0)) == first)
            .map(|row| {
                let udt_schema: String = row.get(5);
                let udt_name: String = row.get(6);
                let cast = format!(
                    "{}.{}",
                    quote_identifier(&udt_schema, '"').unwrap_or(udt_schema),
                    quote_identifier(&udt_name, '"').unwrap_or(udt_name)
                );
                let position: i32 = row.get(4);
                (
                    ProcedureParameter {
                        name: row.get(1),
                        data_type: row.get(2),
                        mode: row.get(3),
                        position: u32::try_from(position).unwrap_or_default(),
                    },
                    cast,
                )
            })
            .collect();

        Ok(params)
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    fn provider(&self) -> Provider {
        Provider::Postgres
    }

    async fn current_database(&self) -> String {
        self.database.lock().clone()
    }

    async fn verify(&self) -> Result<bool> {
        let database = self.current_database().await;
        let client = match self.session(&database).await {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(error = %e, "PostgreSQL verification could not open a session");
                return Ok(false);
            }
        };

        match client.query_one("SELECT 1", &[]).await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::debug!(error = %e, "PostgreSQL verification query failed");
                Ok(false)
            }
        }
    }

    async fn use_database(&self, database: &str) -> Result<()> {
        self.session(database).await?;
        *self.database.lock() = database.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        for (database, session) in sessions.drain() {
            session.task.abort();
            tracing::debug!(database = %database, "Closed PostgreSQL session");
        }
        Ok(())
    }

    async fn check_exact(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {}::text = $1)",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?,
        );
        self.exists(database, "Exact check failed", &sql, &[&value]).await
    }

    async fn check_contains(
        &self,
        database: &str,
        table: &str,
        column: &str,
        substr: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE strpos({}::text, $1) > 0)",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?,
        );
        self.exists(database, "Contains check failed", &sql, &[&substr]).await
    }

    async fn check_id(&self, database: &str, key: &str, table: &str) -> Result<bool> {
        let client = self.session(database).await?;
        let pk = self.primary_key_column(&client, table).await?;
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {}::text = $1)",
            quote_identifier(table, '"')?,
            quote_identifier(&pk, '"')?,
        );
        self.exists(database, "ID check failed", &sql, &[&key]).await
    }

    async fn check_number(
        &self,
        database: &str,
        table: &str,
        column: &str,
        value: f64,
        comparator: Comparator,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {}::double precision {} $1)",
            quote_identifier(table, '"')?,
            quote_identifier(column, '"')?,
            comparator.sql(),
        );
        self.exists(database, "Number check failed", &sql, &[&value]).await
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let client = self.session(&self.current_database().await).await?;
        let rows = client
            .query(
                "SELECT datname::text FROM pg_database
                 WHERE NOT datistemplate AND datallowconn
                 ORDER BY datname",
                &[],
            )
            .await
            .map_err(|e| ProcheckError::query_failed(format!("Failed to list databases: {e}")))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let query = format!(
            "SELECT DISTINCT routine_name::text FROM information_schema.routines
             WHERE routine_type = 'PROCEDURE'
               AND routine_schema NOT IN {SYSTEM_SCHEMAS}
             ORDER BY 1"
        );

        let mut procedures = BTreeMap::new();
        for database in self.list_databases().await? {
            let client = match self.session(&database).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(database = %database, error = %e, "Skipping database while listing procedures");
                    continue;
                }
            };

            let rows = client.query(&query, &[]).await.map_err(|e| {
                ProcheckError::query_failed(format!("Failed to list procedures in {database}: {e}"))
            })?;
            procedures.insert(database, rows.iter().map(|row| row.get(0)).collect());
        }

        Ok(procedures)
    }

    async fn fetch_procedure(&self, database: &str, name: &str) -> Result<String> {
        let (schema, routine) = split_routine(name);
        let query = format!(
            "SELECT pg_get_functiondef(p.oid)
             FROM pg_proc p
             JOIN pg_namespace n ON n.oid = p.pronamespace
             WHERE p.proname = $1
               AND ($2::text IS NULL OR n.nspname = $2)
               AND n.nspname NOT IN {SYSTEM_SCHEMAS}
             ORDER BY p.oid
             LIMIT 1"
        );

        let client = self.session(database).await?;
        let row = client.query_opt(&query, &[&routine, &schema]).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to fetch procedure {name}: {e}"))
        })?;

        row.map(|row| row.get(0))
            .ok_or_else(|| ProcheckError::not_found(format!("Procedure '{name}' in {database}")))
    }

    async fn procedure_parameters(
        &self,
        database: &str,
        name: &str,
    ) -> Result<Vec<ProcedureParameter>> {
        Ok(self.routine_parameters(database, name).await?.into_iter().map(|(p, _)| p).collect())
    }

    async fn call_procedure(&self, database: &str, name: &str, params: &[String]) -> Result<()> {
        let signature = self.routine_parameters(database, name).await?;

        let mut args = Vec::new();
        let mut bound: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let mut remaining = params.iter();
        for (param, cast) in &signature {
            if param.mode.eq_ignore_ascii_case("OUT") {
                args.push("NULL".to_string());
                continue;
            }
            let Some(value) = remaining.next() else {
                break;
            };
            bound.push(value);
            args.push(format!("${}::text::{cast}", bound.len()));
        }

        if remaining.next().is_some() {
            return Err(ProcheckError::invalid_input(format!(
                "Procedure '{name}' accepts {} argument(s), got {}",
                bound.len(),
                params.len()
            )));
        }

        let sql = format!("CALL {}({})", quote_identifier(name, '"')?, args.join(", "));
        let client = self.session(database).await?;
        client.execute(&sql, &bound).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to call procedure {name}: {e}"))
        })?;

        tracing::debug!(database, procedure = name, args = bound.len(), "Called procedure");
        Ok(())
    }

    async fn reset_table(&self, database: &str, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {}", quote_identifier(table, '"')?);
        let client = self.session(database).await?;
        client.execute(&sql, &[]).await.map_err(|e| {
            ProcheckError::query_failed(format!("Failed to reset table {table}: {e}"))
        })?;
        Ok(())
    }
}

/// Build the database-independent part of the `PostgreSQL` config
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| ProcheckError::invalid_input("PostgreSQL requires 'host' parameter"))?;

    let port = config.port.or_else(|| Provider::Postgres.default_port()).unwrap_or(5432);

    let user = config
        .user
        .as_ref()
        .filter(|user| !user.is_empty())
        .ok_or_else(|| ProcheckError::invalid_input("PostgreSQL requires 'user' parameter"))?;

    let mut pg_config = Config::new();
    pg_config.host(host).port(port).user(user).connect_timeout(CONNECT_TIMEOUT);
    if let Some(password) = config.password.as_ref().filter(|p| !p.is_empty()) {
        pg_config.password(password);
    }

    Ok(pg_config)
}

/// Split `schema.routine` into `(Some(schema), routine)`
fn split_routine(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((schema, routine)) => (Some(schema), routine),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: tests marked #[ignore] require a running PostgreSQL instance with a
    // `procheck_test` database. Run them with:
    // cargo test --features postgres -- --ignored

    fn local_config(database: &str) -> ConnectionConfig {
        ConnectionConfig::postgres(
            "localhost".to_string(),
            5432,
            "postgres".to_string(),
            "postgres".to_string(),
            database.to_string(),
        )
    }

    #[test]
    fn test_build_config_requires_host_and_user() {
        let mut config = local_config("postgres");
        assert!(build_pg_config(&config).is_ok());

        config.user = Some(String::new());
        let err = build_pg_config(&config).unwrap_err();
        assert!(err.message().contains("PostgreSQL requires 'user' parameter"));

        config.host = None;
        let err = build_pg_config(&config).unwrap_err();
        assert!(err.message().contains("PostgreSQL requires 'host' parameter"));
    }

    #[test]
    fn test_split_routine() {
        assert_eq!(split_routine("public.add_order"), (Some("public"), "add_order"));
        assert_eq!(split_routine("add_order"), (None, "add_order"));
    }

    #[tokio::test]
    async fn test_wrong_provider() {
        let config = ConnectionConfig::sqlite("/tmp/x.db".into());
        let err = PostgresClient::connect(&config).await.err().unwrap();
        assert!(err.message().contains("Expected PostgreSQL provider"));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_connect_and_verify() {
        let client = PostgresClient::connect(&local_config("postgres")).await.unwrap();
        assert!(client.verify().await.unwrap());
        assert_eq!(client.current_database().await, "postgres");
        assert!(client.list_databases().await.unwrap().contains(&"postgres".to_string()));

        client.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_row_checks() {
        let client = PostgresClient::connect(&local_config("procheck_test")).await.unwrap();
        let session = client.session("procheck_test").await.unwrap();
        session
            .batch_execute(
                "DROP TABLE IF EXISTS pc_users;
                 CREATE TABLE pc_users (id SERIAL PRIMARY KEY, email TEXT, active BOOLEAN, balance NUMERIC);
                 INSERT INTO pc_users (email, active, balance) VALUES ('a@b.com', true, 150);",
            )
            .await
            .unwrap();

        let db = "procheck_test";
        assert!(client.check_exact(db, "pc_users", "email", "a@b.com").await.unwrap());
        assert!(!client.check_exact(db, "pc_users", "email", "a@b.co").await.unwrap());
        assert!(client.check_exact(db, "pc_users", "active", "true").await.unwrap());
        assert!(client.check_contains(db, "pc_users", "email", "@b.").await.unwrap());
        assert!(client.check_id(db, "1", "pc_users").await.unwrap());
        assert!(client.check_number(db, "pc_users", "balance", 100.0, Comparator::Ge).await.unwrap());
        assert!(!client.check_number(db, "pc_users", "balance", 200.0, Comparator::Ge).await.unwrap());

        client.reset_table(db, "pc_users").await.unwrap();
        assert!(!client.check_id(db, "1", "pc_users").await.unwrap());
        client.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_procedures() {
        let client = PostgresClient::connect(&local_config("procheck_test")).await.unwrap();
        let session = client.session("procheck_test").await.unwrap();
        session
            .batch_execute(
                "DROP TABLE IF EXISTS pc_orders;
                 CREATE TABLE pc_orders (ref TEXT PRIMARY KEY, qty INT);
                 CREATE OR REPLACE PROCEDURE pc_add_order(p_ref TEXT, p_qty INT)
                 LANGUAGE SQL AS $$ INSERT INTO pc_orders VALUES (p_ref, p_qty) $$;",
            )
            .await
            .unwrap();

        let db = "procheck_test";
        let procedures = client.list_procedures().await.unwrap();
        assert!(procedures[db].contains(&"pc_add_order".to_string()));

        let source = client.fetch_procedure(db, "pc_add_order").await.unwrap();
        assert!(source.contains("PROCEDURE"));

        let params = client.procedure_parameters(db, "pc_add_order").await.unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "p_ref");
        assert_eq!(params[1].position, 2);

        client
            .call_procedure(db, "pc_add_order", &["order-42".to_string(), "3".to_string()])
            .await
            .unwrap();
        assert!(client.check_id(db, "order-42", "pc_orders").await.unwrap());
        client.close().await.unwrap();
    }
}
