//! Rule group and execution roll-up
//!
//! # Running a Rule Group
//! 1. If the group carries `parameters`, the execution's procedure is called
//!    with them. A failed call turns every test of the group into an `error`.
//! 2. Unit tests run concurrently; outcomes are attributed back by position.
//! 3. `cleanupTables` are reset. Cleanup failures are logged and never change
//!    an outcome.
//!
//! # Roll-up
//! - Group: `pass` iff every unit test passed; undefined while any test lacks an outcome
//! - Execution: `pass` iff every group passed; undefined with no groups or while
//!   any group lacks an outcome

use chrono::Utc;
use futures::future::join_all;

use crate::engine::DatabaseClient;
use crate::error::{ProcheckError, Result};
use crate::rules::{evaluate_unit_test, Execution, RuleGroup, TestOutcome, Verdict};
use crate::session::SessionLease;

/// Run every rule group of `execution` and stamp it with the run time
pub async fn run_execution(lease: &SessionLease<'_>, mut execution: Execution) -> Execution {
    execution.timestamp = Some(Utc::now());
    let database = target_database(lease, &execution);

    tracing::info!(
        execution = %execution.name,
        database = %database,
        groups = execution.rule_groups.len(),
        "Running execution"
    );

    for group in &mut execution.rule_groups {
        run_group(lease.client(), &database, &execution.procedure, group).await;
    }

    execution.outcome = roll_up_execution(&execution);
    tracing::info!(execution = %execution.name, outcome = ?execution.outcome, "Execution finished");
    execution
}

/// Re-run one rule group and return the full snapshot.
///
/// Other groups keep their previous outcomes. The snapshot keeps its
/// timestamp (stamped now if it never ran) so it replaces the stored run.
pub async fn run_rule_group(
    lease: &SessionLease<'_>,
    mut execution: Execution,
    group_name: &str,
) -> Result<Execution> {
    let database = target_database(lease, &execution);
    let group = execution
        .rule_groups
        .iter_mut()
        .find(|group| group.name == group_name)
        .ok_or_else(|| {
            ProcheckError::not_found(format!(
                "Rule group '{group_name}' in execution '{}'",
                execution.name
            ))
        })?;

    run_group(lease.client(), &database, &execution.procedure, group).await;

    execution.timestamp.get_or_insert_with(Utc::now);
    execution.outcome = roll_up_execution(&execution);
    Ok(execution)
}

/// Group verdict from its unit test outcomes
#[must_use]
pub fn roll_up_group(group: &RuleGroup) -> Option<Verdict> {
    let mut verdict = Verdict::Pass;
    for test in &group.unit_tests {
        match &test.outcome {
            None => return None,
            Some(outcome) if !outcome.is_pass() => verdict = Verdict::Fail,
            Some(_) => {}
        }
    }
    Some(verdict)
}

/// Execution verdict from its rule group verdicts
#[must_use]
pub fn roll_up_execution(execution: &Execution) -> Option<Verdict> {
    if execution.rule_groups.is_empty() {
        return None;
    }

    let mut verdict = Verdict::Pass;
    for group in &execution.rule_groups {
        match group.outcome? {
            Verdict::Pass => {}
            Verdict::Fail => verdict = Verdict::Fail,
        }
    }
    Some(verdict)
}

fn target_database(lease: &SessionLease<'_>, execution: &Execution) -> String {
    if execution.database.trim().is_empty() {
        lease.database().to_string()
    } else {
        execution.database.clone()
    }
}

async fn run_group(
    client: &dyn DatabaseClient,
    database: &str,
    procedure: &str,
    group: &mut RuleGroup,
) {
    let setup = match &group.parameters {
        Some(params) => client.call_procedure(database, procedure, params).await,
        None => Ok(()),
    };

    match setup {
        Ok(()) => {
            let test_data = group.test_data.as_deref();
            let outcomes = join_all(
                group
                    .unit_tests
                    .iter()
                    .map(|test| evaluate_unit_test(client, database, test, test_data)),
            )
            .await;

            for (test, outcome) in group.unit_tests.iter_mut().zip(outcomes) {
                test.outcome = Some(outcome);
            }
        }
        Err(e) => {
            tracing::warn!(group = %group.name, procedure, error = %e, "Procedure call failed");
            let message = format!("Procedure '{procedure}' failed: {}", e.message());
            for test in &mut group.unit_tests {
                test.outcome = Some(TestOutcome::Error { message: message.clone() });
            }
        }
    }

    for table in group.cleanup_tables.iter().flatten() {
        if let Err(e) = client.reset_table(database, table).await {
            tracing::warn!(group = %group.name, table = %table, error = %e, "Cleanup failed");
        }
    }

    group.outcome = roll_up_group(group);
    tracing::info!(group = %group.name, outcome = ?group.outcome, "Rule group finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::{ID_LEVEL, NUMBER_LEVEL, STRING_LEVEL};
    use crate::rules::{Expected, UnitTest};
    use crate::session::ActiveConnection;
    use crate::testing::FakeClient;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    async fn session(client: Arc<FakeClient>) -> ActiveConnection {
        let session = ActiveConnection::new();
        session.install(Some(1), client).await;
        assert!(session.verify().await);
        session
    }

    fn shop() -> FakeClient {
        FakeClient::new("shop")
            .with_rows("users", &[&[("id", "1"), ("email", "a@b.com")]])
            .with_rows("orders", &[&[("id", "order-42"), ("total", "99.5")]])
    }

    fn email(name: &str, value: &str) -> UnitTest {
        UnitTest::new(name, STRING_LEVEL, "EXACTLY", "users")
            .with_column("email")
            .with_value(Expected::Text(value.to_string()))
    }

    #[tokio::test]
    async fn test_unsupported_demotes_only_its_group() {
        let session = session(Arc::new(shop())).await;
        let lease = session.lease().await.unwrap();

        let mixed = RuleGroup::new(
            "mixed",
            vec![
                email("first", "a@b.com"),
                UnitTest::new("second", STRING_LEVEL, "FUZZY", "users").with_column("email"),
                email("third", "a@b.com"),
            ],
        );
        let clean = RuleGroup::new("clean", vec![email("only", "a@b.com")]);
        let execution = Execution::new("run", "shop", "add_order", vec![mixed, clean]);

        let result = run_execution(&lease, execution).await;
        let outcomes: Vec<_> =
            result.rule_groups[0].unit_tests.iter().map(|t| t.outcome.clone()).collect();

        assert_eq!(outcomes[0], Some(TestOutcome::Pass));
        assert!(matches!(outcomes[1], Some(TestOutcome::Unsupported { .. })));
        assert_eq!(outcomes[2], Some(TestOutcome::Pass));
        assert_eq!(result.rule_groups[0].outcome, Some(Verdict::Fail));
        assert_eq!(result.rule_groups[1].outcome, Some(Verdict::Pass));
        assert_eq!(result.outcome, Some(Verdict::Fail));
        assert!(result.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_all_pass() {
        let session = session(Arc::new(shop())).await;
        let lease = session.lease().await.unwrap();

        let group = RuleGroup::new(
            "orders",
            vec![
                UnitTest::new("exists", ID_LEVEL, "ID_TEST", "orders").with_test_data("order-42"),
                UnitTest::new("total", NUMBER_LEVEL, "<", "orders")
                    .with_column("total")
                    .with_value(Expected::Number(100.0)),
            ],
        );
        let result = run_execution(&lease, Execution::new("run", "shop", "p", vec![group])).await;
        assert_eq!(result.outcome, Some(Verdict::Pass));
    }

    #[tokio::test]
    async fn test_empty_execution_has_no_outcome() {
        let session = session(Arc::new(shop())).await;
        let lease = session.lease().await.unwrap();

        let result = run_execution(&lease, Execution::new("empty", "shop", "p", vec![])).await;
        assert_eq!(result.outcome, None);
    }

    #[tokio::test]
    async fn test_procedure_is_called_before_tests_and_cleanup_after() {
        let client = Arc::new(shop());
        let session = session(client.clone()).await;
        let lease = session.lease().await.unwrap();

        let mut group = RuleGroup::new(
            "orders",
            vec![UnitTest::new("exists", ID_LEVEL, "ID_TEST", "orders")],
        );
        group.test_data = Some("order-42".to_string());
        group.parameters = Some(vec!["order-42".to_string(), "3".to_string()]);
        group.cleanup_tables = Some(vec!["orders".to_string(), "missing".to_string()]);

        let result =
            run_execution(&lease, Execution::new("run", "shop", "add_order", vec![group])).await;

        assert_eq!(result.outcome, Some(Verdict::Pass));
        assert_eq!(
            client.calls.lock().clone(),
            vec![("add_order".to_string(), vec!["order-42".to_string(), "3".to_string()])]
        );
        assert_eq!(client.resets.lock().clone(), vec!["orders".to_string(), "missing".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_procedure_errors_every_test() {
        let client = Arc::new(shop().failing_procedure("add_order"));
        let session = session(client.clone()).await;
        let lease = session.lease().await.unwrap();

        let mut group = RuleGroup::new("g", vec![email("a", "a@b.com"), email("b", "a@b.com")]);
        group.parameters = Some(vec![]);

        let result =
            run_execution(&lease, Execution::new("run", "shop", "add_order", vec![group])).await;
        for test in &result.rule_groups[0].unit_tests {
            assert!(matches!(test.outcome, Some(TestOutcome::Error { .. })));
        }
        assert_eq!(result.outcome, Some(Verdict::Fail));
        assert_eq!(client.checks.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_single_group_keeps_siblings() {
        let client = Arc::new(shop());
        let session = session(client.clone()).await;
        let lease = session.lease().await.unwrap();

        let execution = Execution::new(
            "run",
            "shop",
            "p",
            vec![
                RuleGroup::new("users", vec![email("email", "a@b.com")]),
                RuleGroup::new(
                    "orders",
                    vec![UnitTest::new("exists", ID_LEVEL, "ID_TEST", "orders").with_test_data("order-42")],
                ),
            ],
        );
        let first = run_execution(&lease, execution).await;
        assert_eq!(first.outcome, Some(Verdict::Pass));
        let checks_after_first = client.checks.load(std::sync::atomic::Ordering::SeqCst);

        let rerun = run_rule_group(&lease, first.clone(), "orders").await.unwrap();
        assert_eq!(rerun.timestamp, first.timestamp);
        assert_eq!(rerun.rule_groups[0], first.rule_groups[0]);
        assert_eq!(rerun.outcome, Some(Verdict::Pass));
        assert_eq!(client.checks.load(std::sync::atomic::Ordering::SeqCst), checks_after_first + 1);

        let err = run_rule_group(&lease, first, "nope").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn test_roll_up_laws() {
        let mut group = RuleGroup::new("g", vec![email("a", "x"), email("b", "y")]);
        assert_eq!(roll_up_group(&group), None);

        group.unit_tests[0].outcome = Some(TestOutcome::Pass);
        group.unit_tests[1].outcome = Some(TestOutcome::Pass);
        assert_eq!(roll_up_group(&group), Some(Verdict::Pass));

        group.unit_tests[1].outcome = Some(TestOutcome::Error { message: "boom".into() });
        assert_eq!(roll_up_group(&group), Some(Verdict::Fail));

        let mut execution = Execution::new("e", "db", "p", vec![group.clone(), group]);
        assert_eq!(roll_up_execution(&execution), None);

        execution.rule_groups[0].outcome = Some(Verdict::Pass);
        execution.rule_groups[1].outcome = Some(Verdict::Pass);
        assert_eq!(roll_up_execution(&execution), Some(Verdict::Pass));

        execution.rule_groups[1].outcome = Some(Verdict::Fail);
        assert_eq!(roll_up_execution(&execution), Some(Verdict::Fail));
    }
}
