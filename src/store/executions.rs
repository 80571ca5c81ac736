//! Execution snapshots
//!
//! An execution is stored with its rule groups and unit tests in one
//! transaction. Saving a snapshot whose `(name, timestamp)` is already stored
//! replaces the previous rows under the same id, which is how a re-run rule
//! group updates its execution.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{from_json, parse_time, to_json, Store};
use crate::error::{ProcheckError, Result};
use crate::rules::{Execution, RuleGroup, TestOutcome, UnitTest, Verdict};

/// One stored execution, without its rule groups
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: i64,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    pub database: String,
    pub procedure: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Verdict>,

    pub rule_groups: usize,
}

impl Store {
    /// Persist a snapshot, replacing any stored run with the same name and timestamp.
    /// A replaced run keeps its id.
    pub fn save_execution(&self, execution: &Execution) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let timestamp = execution.timestamp.map(|t| t.to_rfc3339());

        let previous: Option<i64> = tx
            .query_row(
                "SELECT id FROM executions WHERE name = ?1 AND timestamp IS ?2",
                params![execution.name, timestamp],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = previous {
            delete_execution_rows(&tx, id)?;
        }

        tx.execute(
            "INSERT INTO executions (id, name, timestamp, database_name, procedure_name, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                previous,
                execution.name,
                timestamp,
                execution.database,
                execution.procedure,
                execution.outcome.map(|v| v.to_string()),
            ],
        )?;
        let execution_id = tx.last_insert_rowid();

        for (position, group) in execution.rule_groups.iter().enumerate() {
            insert_rule_group(&tx, execution_id, position, group)?;
        }

        tx.commit()?;
        tracing::debug!(
            execution = %execution.name,
            execution_id,
            replaced = previous.is_some(),
            "Execution saved"
        );
        Ok(execution_id)
    }

    /// Stored executions, newest first
    pub fn list_executions(&self) -> Result<Vec<ExecutionSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.timestamp, e.database_name, e.procedure_name, e.outcome,
                    (SELECT COUNT(*) FROM rule_groups g WHERE g.execution_id = e.id)
             FROM executions e
             ORDER BY e.timestamp IS NULL, e.timestamp DESC, e.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, name, timestamp, database, procedure, outcome, groups) = row?;
            summaries.push(ExecutionSummary {
                id,
                name,
                timestamp: timestamp.as_deref().map(parse_time).transpose()?,
                database,
                procedure,
                outcome: outcome.as_deref().map(parse_verdict).transpose()?,
                rule_groups: usize::try_from(groups).unwrap_or_default(),
            });
        }
        Ok(summaries)
    }

    /// Load a full snapshot; `NotFound` if the id is unknown
    pub fn load_execution(&self, id: i64) -> Result<Execution> {
        let conn = self.conn.lock();
        let (name, timestamp, database, procedure, outcome) = conn
            .query_row(
                "SELECT name, timestamp, database_name, procedure_name, outcome
                 FROM executions WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| ProcheckError::not_found(format!("Execution {id}")))?;

        let mut execution = Execution::new(name, database, procedure, load_rule_groups(&conn, id)?);
        execution.timestamp = timestamp.as_deref().map(parse_time).transpose()?;
        execution.outcome = outcome.as_deref().map(parse_verdict).transpose()?;
        Ok(execution)
    }

    /// Delete an execution with its rule groups and unit tests
    pub fn delete_execution(&self, id: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if delete_execution_rows(&tx, id)? == 0 {
            return Err(ProcheckError::not_found(format!("Execution {id}")));
        }
        tx.commit()?;
        tracing::debug!(execution_id = id, "Execution deleted");
        Ok(())
    }
}

fn delete_execution_rows(conn: &Connection, id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM unit_tests
         WHERE rule_group_id IN (SELECT id FROM rule_groups WHERE execution_id = ?1)",
        [id],
    )?;
    conn.execute("DELETE FROM rule_groups WHERE execution_id = ?1", [id])?;
    Ok(conn.execute("DELETE FROM executions WHERE id = ?1", [id])?)
}

fn insert_rule_group(
    conn: &Connection,
    execution_id: i64,
    position: usize,
    group: &RuleGroup,
) -> Result<()> {
    conn.execute(
        "INSERT INTO rule_groups
            (execution_id, position, name, test_data, parameters, cleanup_tables, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            execution_id,
            to_position(position)?,
            group.name,
            group.test_data,
            group.parameters.as_ref().map(to_json).transpose()?,
            group.cleanup_tables.as_ref().map(to_json).transpose()?,
            group.outcome.map(|v| v.to_string()),
        ],
    )?;
    let group_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(
        "INSERT INTO unit_tests
            (rule_group_id, position, name, level, operation, table_name, column_name, value,
             test_data, total, expected_record_matches, expected_num_records, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )?;
    for (position, test) in group.unit_tests.iter().enumerate() {
        stmt.execute(params![
            group_id,
            to_position(position)?,
            test.name,
            test.level,
            test.operation,
            test.table,
            test.column,
            test.value.as_ref().map(to_json).transpose()?,
            test.test_data,
            test.total,
            test.expected_record_matches.map(to_count).transpose()?,
            test.expected_num_records.map(to_count).transpose()?,
            test.outcome.as_ref().map(to_json).transpose()?,
        ])?;
    }
    Ok(())
}

fn load_rule_groups(conn: &Connection, execution_id: i64) -> Result<Vec<RuleGroup>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, test_data, parameters, cleanup_tables, outcome
         FROM rule_groups WHERE execution_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([execution_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut groups = Vec::new();
    for row in rows {
        let (id, name, test_data, parameters, cleanup_tables, outcome) = row?;
        let mut group = RuleGroup::new(name, load_unit_tests(conn, id)?);
        group.test_data = test_data;
        group.parameters = parameters.as_deref().map(from_json).transpose()?;
        group.cleanup_tables = cleanup_tables.as_deref().map(from_json).transpose()?;
        group.outcome = outcome.as_deref().map(parse_verdict).transpose()?;
        groups.push(group);
    }
    Ok(groups)
}

struct UnitTestRow {
    name: String,
    level: String,
    operation: String,
    table: String,
    column: Option<String>,
    value: Option<String>,
    test_data: Option<String>,
    total: Option<f64>,
    expected_record_matches: Option<i64>,
    expected_num_records: Option<i64>,
    outcome: Option<String>,
}

fn load_unit_tests(conn: &Connection, rule_group_id: i64) -> Result<Vec<UnitTest>> {
    let mut stmt = conn.prepare(
        "SELECT name, level, operation, table_name, column_name, value, test_data, total,
                expected_record_matches, expected_num_records, outcome
         FROM unit_tests WHERE rule_group_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map([rule_group_id], |row| {
        Ok(UnitTestRow {
            name: row.get(0)?,
            level: row.get(1)?,
            operation: row.get(2)?,
            table: row.get(3)?,
            column: row.get(4)?,
            value: row.get(5)?,
            test_data: row.get(6)?,
            total: row.get(7)?,
            expected_record_matches: row.get(8)?,
            expected_num_records: row.get(9)?,
            outcome: row.get(10)?,
        })
    })?;

    let mut tests = Vec::new();
    for row in rows {
        let row = row?;
        let mut test = UnitTest::new(row.name, row.level, row.operation, row.table);
        test.column = row.column;
        test.value = row.value.as_deref().map(from_json).transpose()?;
        test.test_data = row.test_data;
        test.total = row.total;
        test.expected_record_matches = row.expected_record_matches.and_then(|n| u64::try_from(n).ok());
        test.expected_num_records = row.expected_num_records.and_then(|n| u64::try_from(n).ok());
        test.outcome = row.outcome.as_deref().map(from_json::<TestOutcome>).transpose()?;
        tests.push(test);
    }
    Ok(tests)
}

fn parse_verdict(text: &str) -> Result<Verdict> {
    match text {
        "pass" => Ok(Verdict::Pass),
        "fail" => Ok(Verdict::Fail),
        other => Err(ProcheckError::store_error(format!("Unknown outcome '{other}'"))),
    }
}

fn to_position(position: usize) -> Result<i64> {
    i64::try_from(position).map_err(|_| ProcheckError::store_error("Too many rows"))
}

fn to_count(count: u64) -> Result<i64> {
    i64::try_from(count)
        .map_err(|_| ProcheckError::invalid_input(format!("Record count {count} is too large")))
}
