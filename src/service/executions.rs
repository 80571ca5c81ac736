//! Execution runs
//!
//! A run holds a [`SessionLease`](crate::session::SessionLease) from the first
//! unit test to the last, so the session cannot be switched or cleared under
//! it. A run that hits its deadline is dropped: the session stays verified
//! and nothing is persisted.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ProcheckError, Result};
use crate::rules::{run_execution, run_rule_group, Execution};
use crate::session::ActiveConnection;
use crate::store::{ExecutionSummary, Store};

/// A persisted execution snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: i64,

    #[serde(flatten)]
    pub execution: Execution,
}

/// Runs executions against the active session and keeps their snapshots
pub struct ExecutionService {
    store: Arc<Store>,
    session: Arc<ActiveConnection>,
    default_timeout: Option<Duration>,
}

impl ExecutionService {
    pub fn new(
        store: Arc<Store>,
        session: Arc<ActiveConnection>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self { store, session, default_timeout }
    }

    /// Evaluate every rule group, persist the snapshot and return it
    pub async fn check_pass_fail(
        &self,
        execution: Execution,
        timeout: Option<Duration>,
    ) -> Result<ExecutionRecord> {
        execution.validate()?;
        let name = execution.name.clone();
        let started = Instant::now();

        let lease = self.session.lease().await?;
        let result = self.bounded(&name, timeout, run_execution(&lease, execution)).await?;
        drop(lease);

        let id = self.store.save_execution(&result)?;
        tracing::info!(
            execution = %name,
            execution_id = id,
            outcome = ?result.outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Execution stored"
        );
        Ok(ExecutionRecord { id, execution: result })
    }

    /// Re-run one rule group of a stored execution; the stored snapshot is replaced in place
    pub async fn rerun_rule_group(
        &self,
        id: i64,
        group: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionRecord> {
        let execution = self.store.load_execution(id)?;
        let name = execution.name.clone();

        let lease = self.session.lease().await?;
        let result = self.bounded(&name, timeout, run_rule_group(&lease, execution, group)).await??;
        drop(lease);

        let id = self.store.save_execution(&result)?;
        tracing::info!(execution = %name, group, execution_id = id, "Rule group re-run stored");
        Ok(ExecutionRecord { id, execution: result })
    }

    pub fn list(&self) -> Result<Vec<ExecutionSummary>> {
        self.store.list_executions()
    }

    pub fn load(&self, id: i64) -> Result<ExecutionRecord> {
        Ok(ExecutionRecord { id, execution: self.store.load_execution(id)? })
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        self.store.delete_execution(id)
    }

    async fn bounded<T>(
        &self,
        name: &str,
        timeout: Option<Duration>,
        run: impl Future<Output = T>,
    ) -> Result<T> {
        match timeout.or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                tracing::warn!(execution = %name, timeout_ms = limit.as_millis() as u64, "Execution timed out");
                ProcheckError::timeout(format!(
                    "Execution '{name}' did not finish within {} ms",
                    limit.as_millis()
                ))
            }),
            None => Ok(run.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Comparator, DatabaseClient, ProcedureParameter, Provider};
    use crate::rules::condition::{ID_LEVEL, STRING_LEVEL};
    use crate::rules::{Expected, RuleGroup, UnitTest, Verdict};
    use crate::session::Validity;
    use crate::testing::FakeClient;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    async fn verified(client: Arc<dyn DatabaseClient>) -> Arc<ActiveConnection> {
        let session = Arc::new(ActiveConnection::new());
        session.install(Some(7), client).await;
        assert!(session.verify().await);
        session
    }

    fn shop() -> Arc<FakeClient> {
        Arc::new(
            FakeClient::new("shop")
                .with_rows("users", &[&[("id", "1"), ("email", "a@b.com")]])
                .with_rows("orders", &[&[("id", "order-42")]]),
        )
    }

    fn execution() -> Execution {
        Execution::new(
            "nightly",
            "shop",
            "add_order",
            vec![
                RuleGroup::new(
                    "users",
                    vec![UnitTest::new("email", STRING_LEVEL, "EXACTLY", "users")
                        .with_column("email")
                        .with_value(Expected::Text("a@b.com".to_string()))],
                ),
                RuleGroup::new(
                    "orders",
                    vec![UnitTest::new("exists", ID_LEVEL, "ID_TEST", "orders").with_test_data("order-43")],
                ),
            ],
        )
    }

    #[tokio::test]
    async fn test_check_pass_fail_persists_snapshot() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let service = ExecutionService::new(store.clone(), verified(shop()).await, None);

        let record = service.check_pass_fail(execution(), None).await.unwrap();
        assert_eq!(record.execution.outcome, Some(Verdict::Fail));
        assert_eq!(record.execution.rule_groups[0].outcome, Some(Verdict::Pass));
        assert_eq!(service.load(record.id).unwrap(), record);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], record.id);
        assert_eq!(json["name"], "nightly");
        assert_eq!(json["ruleGroups"][1]["unitTests"][0]["outcome"]["status"], "fail");
    }

    #[tokio::test]
    async fn test_rerun_replaces_stored_snapshot() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let client = shop();
        let service = ExecutionService::new(store.clone(), verified(client.clone()).await, None);
        let first = service.check_pass_fail(execution(), None).await.unwrap();

        let rerun = service.rerun_rule_group(first.id, "orders", None).await.unwrap();
        assert_eq!(rerun.execution.timestamp, first.execution.timestamp);
        assert_eq!(rerun.id, first.id);
        assert_eq!(service.list().unwrap().len(), 1);
        assert_eq!(client.checks.load(std::sync::atomic::Ordering::SeqCst), 3);

        let err = service.rerun_rule_group(rerun.id, "missing", None).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        service.delete(rerun.id).unwrap();
        assert!(service.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_or_missing_session() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let service = ExecutionService::new(store, Arc::new(ActiveConnection::new()), None);

        let err = service.check_pass_fail(execution(), None).await.unwrap_err();
        assert_eq!(err.error_code(), "NO_ACTIVE_CONNECTION");

        let mut duplicated = execution();
        duplicated.rule_groups[1].name = "users".to_string();
        let err = service.check_pass_fail(duplicated, None).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    /// Client whose checks never return
    struct Stalled;

    #[async_trait]
    impl DatabaseClient for Stalled {
        fn provider(&self) -> Provider {
            Provider::SQLite
        }
        async fn current_database(&self) -> String {
            "main".to_string()
        }
        async fn verify(&self) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn use_database(&self, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn check_exact(&self, _: &str, _: &str, _: &str, _: &str) -> crate::error::Result<bool> {
            std::future::pending().await
        }
        async fn check_contains(&self, _: &str, _: &str, _: &str, _: &str) -> crate::error::Result<bool> {
            std::future::pending().await
        }
        async fn check_id(&self, _: &str, _: &str, _: &str) -> crate::error::Result<bool> {
            std::future::pending().await
        }
        async fn check_number(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: f64,
            _: Comparator,
        ) -> crate::error::Result<bool> {
            std::future::pending().await
        }
        async fn list_databases(&self) -> crate::error::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn list_procedures(&self) -> crate::error::Result<BTreeMap<String, Vec<String>>> {
            Ok(BTreeMap::new())
        }
        async fn fetch_procedure(&self, _: &str, _: &str) -> crate::error::Result<String> {
            Ok(String::new())
        }
        async fn procedure_parameters(
            &self,
            _: &str,
            _: &str,
        ) -> crate::error::Result<Vec<ProcedureParameter>> {
            Ok(vec![])
        }
        async fn call_procedure(&self, _: &str, _: &str, _: &[String]) -> crate::error::Result<()> {
            Ok(())
        }
        async fn reset_table(&self, _: &str, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timeout_leaves_session_verified() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let session = verified(Arc::new(Stalled)).await;
        let service = ExecutionService::new(store, session.clone(), Some(Duration::from_secs(60)));

        let err = service
            .check_pass_fail(execution(), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert_eq!(session.status().await.validity, Validity::Valid);
        assert!(service.list().unwrap().is_empty());

        // The lease was released with the dropped run
        session.clear().await;
        assert!(!session.status().await.active);
    }
}
