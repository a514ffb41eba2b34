//! Error types for the Quarry engine.

use crate::{ComparisonOp, FieldType};
use thiserror::Error;

/// All possible errors from the Quarry engine and the adapters built on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Filter errors (caller bugs, surfaced synchronously)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid value for field '{field}': '{value}' is not a valid {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: FieldType,
    },

    #[error("operator {op} is not supported for field '{field}' of type {field_type}")]
    UnsupportedOperator {
        field: String,
        op: ComparisonOp,
        field_type: FieldType,
    },

    // Storage errors
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Shorthand for a filter naming a field the record shape does not have.
    pub fn unknown_field(table: &str, field: &str) -> Self {
        Error::Configuration(format!("table '{table}' has no field named '{field}'"))
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::InvalidValue { .. } => "invalid_value",
            Error::UnsupportedOperator { .. } => "unsupported_operator",
            Error::NotFound(_) => "not_found",
            Error::DuplicateKey(_) => "duplicate_key",
            Error::Transport(_) => "transport",
        }
    }

    /// Whether the error was caused by a malformed filter rather than by storage.
    pub fn is_filter_error(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::InvalidValue { .. } | Error::UnsupportedOperator { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::unknown_field("customers", "Nmae");
        assert_eq!(
            err.to_string(),
            "configuration error: table 'customers' has no field named 'Nmae'"
        );

        let err = Error::InvalidValue {
            field: "age".into(),
            value: "thirty".into(),
            expected: FieldType::Int32,
        };
        assert_eq!(
            err.to_string(),
            "invalid value for field 'age': 'thirty' is not a valid Int32"
        );

        let err = Error::UnsupportedOperator {
            field: "age".into(),
            op: ComparisonOp::Contains,
            field_type: FieldType::Int32,
        };
        assert_eq!(
            err.to_string(),
            "operator Contains is not supported for field 'age' of type Int32"
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(Error::NotFound("1".into()).kind(), "not_found");
        assert_eq!(Error::DuplicateKey("1".into()).kind(), "duplicate_key");
        assert_eq!(Error::Transport("down".into()).kind(), "transport");
        assert!(Error::Configuration("x".into()).is_filter_error());
        assert!(!Error::Transport("x".into()).is_filter_error());
    }
}
