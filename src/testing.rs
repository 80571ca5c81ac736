//! In-memory doubles for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::{
    ClientFactory, Comparator, ConnectionConfig, DatabaseClient, ProcedureParameter, Provider,
};
use crate::error::{ProcheckError, Result};

type Row = BTreeMap<String, String>;

/// Table-backed fake client. Every table is keyed by its `id` column.
pub struct FakeClient {
    database: Mutex<String>,
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    healthy: AtomicBool,
    fail_close: AtomicBool,
    fail_switch: AtomicBool,
    failing_procedures: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub resets: Mutex<Vec<String>>,
    pub closed: AtomicUsize,
    pub checks: AtomicUsize,
}

impl FakeClient {
    pub fn new(database: &str) -> Self {
        Self {
            database: Mutex::new(database.to_string()),
            tables: Mutex::new(BTreeMap::new()),
            healthy: AtomicBool::new(true),
            fail_close: AtomicBool::new(false),
            fail_switch: AtomicBool::new(false),
            failing_procedures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn with_rows(self, table: &str, rows: &[&[(&str, &str)]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
            .collect();
        self.tables.lock().insert(table.to_string(), rows);
        self
    }

    pub fn unhealthy(self) -> Self {
        self.set_healthy(false);
        self
    }

    pub fn failing_close(self) -> Self {
        self.fail_close.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_switch(self) -> Self {
        self.fail_switch.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_procedure(self, name: &str) -> Self {
        self.failing_procedures.lock().push(name.to_string());
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn column_values(&self, table: &str, column: &str) -> Result<Vec<String>> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock();
        let rows = tables
            .get(table)
            .ok_or_else(|| ProcheckError::query_failed(format!("no such table: {table}")))?;

        let values: Vec<String> = rows.iter().filter_map(|row| row.get(column).cloned()).collect();
        if values.is_empty() && !rows.is_empty() {
            return Err(ProcheckError::query_failed(format!("no such column: {column}")));
        }
        Ok(values)
    }
}

#[async_trait]
impl DatabaseClient for FakeClient {
    fn provider(&self) -> Provider {
        Provider::SQLite
    }

    async fn current_database(&self) -> String {
        self.database.lock().clone()
    }

    async fn verify(&self) -> Result<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn use_database(&self, database: &str) -> Result<()> {
        if self.fail_switch.load(Ordering::SeqCst) {
            return Err(ProcheckError::not_found(format!("Database '{database}'")));
        }
        *self.database.lock() = database.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ProcheckError::engine_error("fake", "pool refused to end"));
        }
        Ok(())
    }

    async fn check_exact(&self, _: &str, table: &str, column: &str, value: &str) -> Result<bool> {
        Ok(self.column_values(table, column)?.iter().any(|v| v == value))
    }

    async fn check_contains(&self, _: &str, table: &str, column: &str, substr: &str) -> Result<bool> {
        Ok(self.column_values(table, column)?.iter().any(|v| v.contains(substr)))
    }

    async fn check_id(&self, _: &str, key: &str, table: &str) -> Result<bool> {
        Ok(self.column_values(table, "id")?.iter().any(|v| v == key))
    }

    async fn check_number(
        &self,
        _: &str,
        table: &str,
        column: &str,
        value: f64,
        comparator: Comparator,
    ) -> Result<bool> {
        Ok(self
            .column_values(table, column)?
            .iter()
            .filter_map(|v| v.parse::<f64>().ok())
            .any(|stored| comparator.holds(stored, value)))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(vec![self.database.lock().clone()])
    }

    async fn list_procedures(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut procedures = BTreeMap::new();
        procedures.insert(self.database.lock().clone(), vec!["add_order".to_string()]);
        Ok(procedures)
    }

    async fn fetch_procedure(&self, _: &str, name: &str) -> Result<String> {
        Ok(format!("CREATE PROCEDURE {name}() BEGIN END"))
    }

    async fn procedure_parameters(&self, _: &str, _: &str) -> Result<Vec<ProcedureParameter>> {
        Ok(vec![ProcedureParameter {
            name: "p_ref".to_string(),
            data_type: "text".to_string(),
            mode: "IN".to_string(),
            position: 1,
        }])
    }

    async fn call_procedure(&self, _: &str, name: &str, params: &[String]) -> Result<()> {
        if self.failing_procedures.lock().iter().any(|p| p == name) {
            return Err(ProcheckError::query_failed(format!("procedure {name} raised")));
        }
        self.calls.lock().push((name.to_string(), params.to_vec()));
        Ok(())
    }

    async fn reset_table(&self, _: &str, table: &str) -> Result<()> {
        self.resets.lock().push(table.to_string());
        match self.tables.lock().get_mut(table) {
            Some(rows) => {
                rows.clear();
                Ok(())
            }
            None => Err(ProcheckError::query_failed(format!("no such table: {table}"))),
        }
    }
}

/// Hands out a prepared client; hosts named `unreachable` fail to connect
#[derive(Default)]
pub struct FakeFactory {
    pub client: Mutex<Option<Arc<FakeClient>>>,
    pub connects: AtomicUsize,
}

impl FakeFactory {
    pub fn serving(client: Arc<FakeClient>) -> Self {
        Self { client: Mutex::new(Some(client)), connects: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if config.host.as_deref() == Some("unreachable") {
            return Err(ProcheckError::connection_failed("host unreachable"));
        }

        let client = self
            .client
            .lock()
            .clone()
            .unwrap_or_else(|| Arc::new(FakeClient::new(&config.database_or_default())));
        Ok(client)
    }
}
