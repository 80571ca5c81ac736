//! Execution, Rule Group and Unit Test Model
//!
//! An [`Execution`] targets one procedure in one database and owns an ordered
//! list of [`RuleGroup`]s; each rule group owns an ordered list of
//! [`UnitTest`]s. Ownership is by value: deleting a parent deletes its
//! children.
//!
//! # Evaluation
//! - [`condition`]: parses a unit test's `(level, operation)` pair into a closed [`Condition`]
//! - [`evaluate`]: runs one condition against a [`DatabaseClient`](crate::engine::DatabaseClient)
//! - [`aggregate`]: runs rule groups and rolls outcomes up to the execution
//!
//! # Outcomes
//! Unit tests end in [`TestOutcome`] (`pass`, `fail`, `unsupported`, `error`).
//! Rule groups and executions end in a [`Verdict`]. Anything but `pass`
//! demotes the enclosing group, and only that group, to `fail`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ProcheckError, Result};

pub mod aggregate;
pub mod condition;
pub mod evaluate;

pub use aggregate::{roll_up_execution, roll_up_group, run_execution, run_rule_group};
pub use condition::Condition;
pub use evaluate::evaluate_unit_test;

/// Expected value of a unit test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Expected {
    /// Text form used by string comparisons
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Numeric form used by number comparisons
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(_) => None,
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok().filter(|n: &f64| n.is_finite()),
        }
    }
}

/// Per-test outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
    Unsupported { reason: String },
    Error { message: String },
}

impl TestOutcome {
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Rolled-up outcome of a rule group or execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// One declarative assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitTest {
    pub name: String,

    /// `RowStringOperations`, `RowIDOperations`, `RowNumberOperations` or `RowBooleanOperations`
    pub level: String,

    /// Level-specific operation (`EXACTLY`, `CONTAINS`, `ID_TEST`, `>=`, `TRUE`, ...)
    pub operation: String,

    pub table: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Expected>,

    /// Key for `ID_TEST`; falls back to the rule group's test data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_record_matches: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_num_records: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TestOutcome>,
}

impl UnitTest {
    /// Minimal unit test; optional fields start empty
    pub fn new(
        name: impl Into<String>,
        level: impl Into<String>,
        operation: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            operation: operation.into(),
            table: table.into(),
            column: None,
            value: None,
            test_data: None,
            total: None,
            expected_record_matches: None,
            expected_num_records: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: Expected) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_test_data(mut self, key: impl Into<String>) -> Self {
        self.test_data = Some(key.into());
        self
    }

    /// Parse `(level, operation)` into a condition
    #[must_use]
    pub fn condition(&self) -> Condition {
        Condition::parse(&self.level, &self.operation)
    }
}

/// Named collection of unit tests evaluated together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,

    /// Key used by `ID_TEST` unit tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_data: Option<String>,

    /// Arguments for the execution's procedure, called before the tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,

    /// Tables reset after the tests ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_tables: Option<Vec<String>>,

    #[serde(default)]
    pub unit_tests: Vec<UnitTest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Verdict>,
}

impl RuleGroup {
    pub fn new(name: impl Into<String>, unit_tests: Vec<UnitTest>) -> Self {
        Self {
            name: name.into(),
            test_data: None,
            parameters: None,
            cleanup_tables: None,
            unit_tests,
            outcome: None,
        }
    }
}

/// One named run targeting a procedure in a database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub name: String,

    /// Run time; doubles as the version of a re-run execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Database every unit test is evaluated against
    pub database: String,

    /// Procedure invoked by rule groups that carry parameters
    pub procedure: String,

    #[serde(default)]
    pub rule_groups: Vec<RuleGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Verdict>,
}

impl Execution {
    pub fn new(
        name: impl Into<String>,
        database: impl Into<String>,
        procedure: impl Into<String>,
        rule_groups: Vec<RuleGroup>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp: None,
            database: database.into(),
            procedure: procedure.into(),
            rule_groups,
            outcome: None,
        }
    }

    /// Check naming rules: non-empty names, unique per parent
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProcheckError::invalid_input("Execution name cannot be empty"));
        }

        let mut groups = HashSet::new();
        for group in &self.rule_groups {
            if group.name.trim().is_empty() {
                return Err(ProcheckError::invalid_input(format!(
                    "Execution '{}' has a rule group without a name",
                    self.name
                )));
            }
            if !groups.insert(group.name.as_str()) {
                return Err(ProcheckError::invalid_input(format!(
                    "Duplicate rule group '{}' in execution '{}'",
                    group.name, self.name
                )));
            }

            let mut tests = HashSet::new();
            for test in &group.unit_tests {
                if !tests.insert(test.name.as_str()) {
                    return Err(ProcheckError::invalid_input(format!(
                        "Duplicate unit test '{}' in rule group '{}'",
                        test.name, group.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Number of unit tests across all rule groups
    #[must_use]
    pub fn unit_test_count(&self) -> usize {
        self.rule_groups.iter().map(|group| group.unit_tests.len()).sum()
    }
}
