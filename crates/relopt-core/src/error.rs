//! # Error Types
//!
//! A rule that cannot establish its preconditions is *not* an error: it simply
//! returns without registering a replacement. The variants below are reserved for
//! misuse of the builder and for invariant violations that indicate a bug in a rule
//! or in the mapping utilities. Those must reach the caller of the driver and are
//! never swallowed.

use crate::types::RowType;

/// Errors raised while constructing or rewriting relational expressions.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A replacement registered by a rule does not produce the row type of the
    /// expression it replaces.
    #[error("rule '{rule}' produced row type {actual} but {expected} was required")]
    RowTypeMismatch {
        rule: String,
        expected: RowType,
        actual: RowType,
    },
    /// An operator was given the wrong number of inputs.
    #[error("{operator} expects {expected} input(s), got {actual}")]
    InputArity {
        operator: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A column ordinal does not exist in the row type it is resolved against.
    #[error("field ordinal {ordinal} out of range for row type with {width} field(s)")]
    FieldOutOfRange { ordinal: usize, width: usize },
    /// A column name does not exist in the row type it is resolved against.
    #[error("field '{0}' not found")]
    FieldNotFound(String),
    /// The catalog has no table under this name.
    #[error("table '{0}' not found")]
    TableNotFound(String),
    /// The builder was asked for more relational expressions than it holds.
    #[error("builder stack has {available} expression(s), {requested} requested")]
    EmptyStack { requested: usize, available: usize },
    /// Operator payload is inconsistent with its inputs (e.g. set-operation inputs
    /// of different widths, a grouping set outside the group set).
    #[error("invalid {operator}: {reason}")]
    Invalid {
        operator: &'static str,
        reason: String,
    },
    /// Configuration could not be parsed.
    #[error("invalid planner configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PlanError {
    pub fn invalid(operator: &'static str, reason: impl Into<String>) -> Self {
        PlanError::Invalid {
            operator,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, PlanError>;
