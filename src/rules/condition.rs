//! Declarative condition dispatch
//!
//! A unit test's `(level, operation)` pair is parsed once into a closed
//! [`Condition`]. Pairs that match no known combination become
//! [`Condition::Unsupported`], which evaluates to an explicit `unsupported`
//! outcome.

use serde::{Deserialize, Serialize};

use crate::engine::Comparator;

pub const STRING_LEVEL: &str = "RowStringOperations";
pub const ID_LEVEL: &str = "RowIDOperations";
pub const NUMBER_LEVEL: &str = "RowNumberOperations";
pub const BOOLEAN_LEVEL: &str = "RowBooleanOperations";

/// Parsed `(level, operation)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Condition {
    /// `RowStringOperations` / `EXACTLY`
    StringExact,
    /// `RowStringOperations` / `CONTAINS`
    StringContains,
    /// `RowIDOperations` / `ID_TEST`
    IdExists,
    /// `RowNumberOperations` / comparator
    Number { comparator: Comparator },
    /// `RowBooleanOperations` / `TRUE` or `FALSE`; `literal` is lower-case
    Boolean { literal: String },
    Unsupported { level: String, operation: String },
}

impl Condition {
    /// Levels match exactly, operations case-insensitively
    #[must_use]
    pub fn parse(level: &str, operation: &str) -> Self {
        let op = operation.trim().to_uppercase();
        match (level, op.as_str()) {
            (STRING_LEVEL, "EXACTLY") => Self::StringExact,
            (STRING_LEVEL, "CONTAINS") => Self::StringContains,
            (ID_LEVEL, "ID_TEST") => Self::IdExists,
            (NUMBER_LEVEL, symbol) => match Comparator::parse(symbol) {
                Some(comparator) => Self::Number { comparator },
                None => Self::unsupported(level, operation),
            },
            (BOOLEAN_LEVEL, "TRUE" | "FALSE") => Self::Boolean { literal: op.to_lowercase() },
            _ => Self::unsupported(level, operation),
        }
    }

    fn unsupported(level: &str, operation: &str) -> Self {
        Self::Unsupported { level: level.to_string(), operation: operation.to_string() }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StringExact => write!(f, "{STRING_LEVEL}/EXACTLY"),
            Self::StringContains => write!(f, "{STRING_LEVEL}/CONTAINS"),
            Self::IdExists => write!(f, "{ID_LEVEL}/ID_TEST"),
            Self::Number { comparator } => write!(f, "{NUMBER_LEVEL}/{comparator}"),
            Self::Boolean { literal } => write!(f, "{BOOLEAN_LEVEL}/{}", literal.to_uppercase()),
            Self::Unsupported { level, operation } => write!(f, "{level}/{operation}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_pairs() {
        assert_eq!(Condition::parse(STRING_LEVEL, "EXACTLY"), Condition::StringExact);
        assert_eq!(Condition::parse(STRING_LEVEL, "contains"), Condition::StringContains);
        assert_eq!(Condition::parse(ID_LEVEL, "ID_TEST"), Condition::IdExists);
        assert_eq!(
            Condition::parse(NUMBER_LEVEL, ">="),
            Condition::Number { comparator: Comparator::Ge }
        );
        assert_eq!(
            Condition::parse(NUMBER_LEVEL, "<>"),
            Condition::Number { comparator: Comparator::Ne }
        );
        assert_eq!(
            Condition::parse(BOOLEAN_LEVEL, "True"),
            Condition::Boolean { literal: "true".to_string() }
        );
    }

    #[test]
    fn test_operation_from_another_level_is_unsupported() {
        for (level, operation) in [
            (STRING_LEVEL, "ID_TEST"),
            (ID_LEVEL, "EXACTLY"),
            (NUMBER_LEVEL, "CONTAINS"),
            (BOOLEAN_LEVEL, "MAYBE"),
            ("rowstringoperations", "EXACTLY"),
            ("RowDateOperations", "BEFORE"),
        ] {
            assert_eq!(
                Condition::parse(level, operation),
                Condition::Unsupported { level: level.to_string(), operation: operation.to_string() },
                "{level}/{operation}"
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Condition::parse(NUMBER_LEVEL, "!=").to_string(), "RowNumberOperations/!=");
        assert_eq!(Condition::parse(BOOLEAN_LEVEL, "false").to_string(), "RowBooleanOperations/FALSE");
    }
}
