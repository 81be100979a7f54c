//! An owned raw result assembled from PostgreSQL backend messages.
//!
//! Client libraries that read the v3 protocol themselves can collect the
//! messages of one command into a `WireResult` and hand it to the result
//! decoder.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::Bytes;
use std::collections::HashMap;

use super::error::PgError;
use super::result::{ExecStatus, RawResult};
use super::types::{Format, Oid};

// ============================================================================
// Backend Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

impl FieldDescription {
    /// A column not tied to any table.
    pub fn new(name: &str, type_oid: Oid, format: Format) -> Self {
        Self {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: type_oid.binary_width().map(|w| w as i16).unwrap_or(-1),
            type_modifier: -1,
            format,
        }
    }
}

/// The backend messages that describe a command's outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    RowDescription {
        fields: Vec<FieldDescription>,
    },
    DataRow {
        values: Vec<Option<Bytes>>,
    },
    CommandComplete {
        tag: String,
    },
    EmptyQueryResponse,

    // COPY sub-protocol entry points
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,

    ErrorResponse {
        fields: HashMap<u8, String>,
    },
}

// ============================================================================
// Wire Result
// ============================================================================

/// An owned response assembled from the messages of one command.
#[derive(Debug, Clone, Default)]
pub struct WireResult {
    status: Option<ExecStatus>,
    fields: Vec<FieldDescription>,
    rows: Vec<Vec<Option<Bytes>>>,
    command_tag: Option<String>,
    error_fields: Option<HashMap<u8, String>>,
}

impl WireResult {
    /// Assemble a result from the backend messages of one command.
    ///
    /// A later outcome message overrides an earlier one.
    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = BackendMessage>,
    {
        let mut result = WireResult::default();

        for msg in messages {
            match msg {
                BackendMessage::RowDescription { fields } => {
                    result.fields = fields;
                }
                BackendMessage::DataRow { values } => {
                    result.rows.push(values);
                }
                BackendMessage::CommandComplete { tag } => {
                    result.status = Some(if result.fields.is_empty() {
                        ExecStatus::CommandOk
                    } else {
                        ExecStatus::TuplesOk
                    });
                    result.command_tag = Some(tag);
                }
                BackendMessage::EmptyQueryResponse => {
                    result.status = Some(ExecStatus::EmptyQuery);
                }
                BackendMessage::CopyInResponse => result.status = Some(ExecStatus::CopyIn),
                BackendMessage::CopyOutResponse => result.status = Some(ExecStatus::CopyOut),
                BackendMessage::CopyBothResponse => result.status = Some(ExecStatus::CopyBoth),
                BackendMessage::ErrorResponse { fields } => {
                    result.status = Some(ExecStatus::FatalError);
                    result.error_fields = Some(fields);
                }
            }
        }

        result
    }

    /// Resolved status; a response without an outcome message is a bad response.
    pub fn status(&self) -> ExecStatus {
        self.status.unwrap_or(ExecStatus::BadResponse)
    }

    /// Command tag (e.g., "SELECT 5" or "LISTEN")
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }

    /// The server error carried by this result, if any.
    pub fn server_error(&self) -> Option<PgError> {
        self.error_fields.as_ref().map(error_from_fields)
    }
}

impl RawResult for WireResult {
    fn status_code(&self) -> i32 {
        self.status().code()
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_count(&self) -> usize {
        self.fields.len()
    }

    fn column_name(&self, column: usize) -> &str {
        &self.fields[column].name
    }

    fn column_type(&self, column: usize) -> Oid {
        self.fields[column].type_oid
    }

    fn column_format(&self, column: usize) -> Format {
        self.fields[column].format
    }

    fn is_null(&self, row: usize, column: usize) -> bool {
        self.rows[row].get(column).map_or(true, Option::is_none)
    }

    fn cell(&self, row: usize, column: usize) -> &[u8] {
        match self.rows[row].get(column) {
            Some(Some(data)) => &data[..],
            _ => &[],
        }
    }

    fn error_message(&self) -> Option<&str> {
        self.error_fields
            .as_ref()
            .and_then(|f| f.get(&b'M'))
            .map(|s| s.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Create a PgError from error response fields.
pub fn error_from_fields(fields: &HashMap<u8, String>) -> PgError {
    PgError::Server {
        severity: fields.get(&b'S').cloned().unwrap_or_default(),
        code: fields.get(&b'C').cloned().unwrap_or_default(),
        message: fields.get(&b'M').cloned().unwrap_or_default(),
        detail: fields.get(&b'D').cloned(),
        hint: fields.get(&b'H').cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_result_statuses() {
        let ok = WireResult::from_messages(vec![BackendMessage::CommandComplete {
            tag: "LISTEN".to_string(),
        }]);
        assert_eq!(ok.status(), ExecStatus::CommandOk);
        assert_eq!(ok.command_tag(), Some("LISTEN"));

        let empty = WireResult::from_messages(vec![BackendMessage::EmptyQueryResponse]);
        assert_eq!(empty.status(), ExecStatus::EmptyQuery);

        let copy = WireResult::from_messages(vec![BackendMessage::CopyInResponse]);
        assert_eq!(copy.status(), ExecStatus::CopyIn);

        assert_eq!(
            WireResult::from_messages(Vec::new()).status(),
            ExecStatus::BadResponse
        );
    }

    #[test]
    fn test_wire_result_rows() {
        let result = WireResult::from_messages(vec![
            BackendMessage::RowDescription {
                fields: vec![
                    FieldDescription::new("id", Oid::INT4, Format::Binary),
                    FieldDescription::new("note", Oid::TEXT, Format::Text),
                ],
            },
            BackendMessage::DataRow {
                values: vec![Some(Bytes::from_static(&[0, 0, 0, 7])), None],
            },
            BackendMessage::CommandComplete {
                tag: "SELECT 1".to_string(),
            },
        ]);

        assert_eq!(result.status(), ExecStatus::TuplesOk);
        assert_eq!(result.column_count(), 2);
        assert_eq!(result.column_name(1), "note");
        assert_eq!(result.cell(0, 0), &[0, 0, 0, 7]);
        assert!(result.is_null(0, 1));
        assert!(result.cell(0, 1).is_empty());
    }

    #[test]
    fn test_wire_result_error() {
        let mut fields = HashMap::new();
        fields.insert(b'S', "ERROR".to_string());
        fields.insert(b'C', "42P01".to_string());
        fields.insert(b'M', "relation \"nope\" does not exist".to_string());
        let result = WireResult::from_messages(vec![BackendMessage::ErrorResponse { fields }]);

        assert_eq!(result.status(), ExecStatus::FatalError);
        assert_eq!(
            result.error_message(),
            Some("relation \"nope\" does not exist")
        );
        assert_eq!(result.row_count(), 0);
        match result.server_error() {
            Some(PgError::Server { code, .. }) => assert_eq!(code, "42P01"),
            other => panic!("expected server error, got {:?}", other),
        }
    }
}
