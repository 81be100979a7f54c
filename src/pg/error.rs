//! Error types for value marshalling and notification delivery.

use std::io;

use thiserror::Error;

use super::types::{NativeCategory, Oid, Shape};

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Why a value could not be carried by a requested wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatMismatch {
    /// The value's category differs from the category the wire type implies.
    Category {
        expected: NativeCategory,
        found: NativeCategory,
    },
    /// The value does not fit the width of the wire type.
    OutOfRange,
    /// A fixed-width binary cell had the wrong number of bytes.
    Length { expected: usize, actual: usize },
    /// The value has no representation in the target type (e.g. a bare time as a date).
    Unrepresentable(String),
    /// Bytes that should be UTF-8 (or hex) are not.
    Encoding(String),
}

impl std::fmt::Display for FormatMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatMismatch::Category { expected, found } => {
                write!(f, "expected a {} value, got {}", expected, found)
            }
            FormatMismatch::OutOfRange => write!(f, "value out of range"),
            FormatMismatch::Length { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
            FormatMismatch::Unrepresentable(msg) => write!(f, "unrepresentable: {}", msg),
            FormatMismatch::Encoding(msg) => write!(f, "bad encoding: {}", msg),
        }
    }
}

/// Errors that can occur while marshalling values or delivering notifications.
#[derive(Error, Debug)]
pub enum PgError {
    /// The value's shape does not fit the requested wire type.
    #[error("Unsupported data format for {oid}: {reason}")]
    UnsupportedDataFormat { oid: Oid, reason: FormatMismatch },

    /// The requested decode shape does not match the column's category.
    #[error("Column {column} holds {category} values, cannot read as {shape}")]
    InvalidType {
        column: usize,
        category: NativeCategory,
        shape: Shape,
    },

    #[error("Invalid column number {index} (result has {count} columns)")]
    InvalidColumnNumber { index: usize, count: usize },

    #[error("No column named {0:?}")]
    InvalidColumnName(String),

    #[error("Invalid row number {index} (result has {count} rows)")]
    InvalidRowNumber { index: usize, count: usize },

    /// The connection went away while draining notifications.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Error reported by the underlying client library.
    #[error("Client error: {0}")]
    Client(String),

    /// Server returned an error.
    #[error("{severity}: {message} ({code})")]
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PgError {
    pub(crate) fn unsupported(oid: Oid, reason: FormatMismatch) -> Self {
        PgError::UnsupportedDataFormat { oid, reason }
    }

    /// Check if this error reports a value/wire-type mismatch.
    pub fn is_unsupported_data_format(&self) -> bool {
        matches!(self, PgError::UnsupportedDataFormat { .. })
    }
}
