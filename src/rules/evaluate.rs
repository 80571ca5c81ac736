//! Unit test evaluation
//!
//! | condition | client call | pass iff |
//! |---|---|---|
//! | `StringExact` | `check_exact(db, table, column, value)` | a row's cell equals `value` |
//! | `StringContains` | `check_contains(db, table, column, value)` | a row's cell contains `value` |
//! | `IdExists` | `check_id(db, test data, table)` | a row keyed by the test data exists |
//! | `Number` | `check_number(db, table, column, value, op)` | `cell <op> value` holds for a row |
//! | `Boolean` | `check_boolean(db, table, column, literal)` | a row's cell holds `true`/`false` (or `1`/`0`) |
//!
//! An absent column is passed through as an empty string. Client failures
//! become `error` outcomes and never escape the test they belong to.

use crate::engine::DatabaseClient;
use crate::error::Result;
use crate::rules::{Condition, TestOutcome, UnitTest};

/// Evaluate one unit test against `database`.
///
/// `group_test_data` is the rule group's key for `ID_TEST`, used when the
/// test carries none of its own.
pub async fn evaluate_unit_test(
    client: &dyn DatabaseClient,
    database: &str,
    test: &UnitTest,
    group_test_data: Option<&str>,
) -> TestOutcome {
    let column = test.column.as_deref().unwrap_or_default();
    let table = test.table.as_str();

    let result: Result<bool> = match test.condition() {
        Condition::StringExact => match &test.value {
            Some(value) => client.check_exact(database, table, column, &value.as_text()).await,
            None => return missing("a string value"),
        },
        Condition::StringContains => match &test.value {
            Some(value) => client.check_contains(database, table, column, &value.as_text()).await,
            None => return missing("a string value"),
        },
        Condition::IdExists => {
            let key = test
                .test_data
                .as_deref()
                .or(group_test_data)
                .map(str::to_string)
                .or_else(|| test.value.as_ref().map(|value| value.as_text()));
            match key {
                Some(key) => client.check_id(database, &key, table).await,
                None => return missing("test data"),
            }
        }
        Condition::Number { comparator } => match test.value.as_ref().and_then(|v| v.as_number()) {
            Some(value) => client.check_number(database, table, column, value, comparator).await,
            None => return missing("a numeric value"),
        },
        Condition::Boolean { literal } => client.check_boolean(database, table, column, &literal).await,
        Condition::Unsupported { level, operation } => {
            return TestOutcome::Unsupported {
                reason: format!("Operation '{operation}' is not supported for level '{level}'"),
            };
        }
    };

    let outcome = match result {
        Ok(true) => TestOutcome::Pass,
        Ok(false) => TestOutcome::Fail,
        Err(e) => TestOutcome::Error { message: e.message() },
    };

    tracing::debug!(test = %test.name, database, table, outcome = ?outcome, "Evaluated unit test");
    outcome
}

fn missing(what: &str) -> TestOutcome {
    TestOutcome::Error { message: format!("Unit test requires {what}") }
}
