//! Typed access to one server response.
//!
//! `ResultDecoder` owns the raw response handed back by the client library,
//! snapshots its column metadata, and decodes cells on demand through the
//! codec. Dropping the decoder (or taking the raw result back with
//! `into_raw`) releases the response; both consume the decoder.

use super::codec::{self, FromCell};
use super::datetime::DatetimeMode;
use super::error::{PgError, PgResult};
use super::types::{category_for, category_matches, Format, NativeCategory, Oid};

// ============================================================================
// Raw result interface
// ============================================================================

/// A response object produced by the underlying client library.
///
/// Indices passed in are always validated by the decoder first.
pub trait RawResult: Send {
    /// The library's raw status code (see `ExecStatus`).
    fn status_code(&self) -> i32;

    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    fn column_name(&self, column: usize) -> &str;

    fn column_type(&self, column: usize) -> Oid;

    fn column_format(&self, column: usize) -> Format;

    fn is_null(&self, row: usize, column: usize) -> bool;

    /// The cell's bytes. Only called for non-null cells.
    fn cell(&self, row: usize, column: usize) -> &[u8];

    /// Server error message, if the command failed.
    fn error_message(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// Status
// ============================================================================

/// Classification of a response's raw status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    CopyOut,
    CopyIn,
    BadResponse,
    NonFatalError,
    FatalError,
    CopyBoth,
    SingleTuple,
}

impl ExecStatus {
    /// Map a raw status code. Unknown codes are a bad response.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExecStatus::EmptyQuery,
            1 => ExecStatus::CommandOk,
            2 => ExecStatus::TuplesOk,
            3 => ExecStatus::CopyOut,
            4 => ExecStatus::CopyIn,
            5 => ExecStatus::BadResponse,
            6 => ExecStatus::NonFatalError,
            7 => ExecStatus::FatalError,
            8 => ExecStatus::CopyBoth,
            9 => ExecStatus::SingleTuple,
            _ => ExecStatus::BadResponse,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ExecStatus::EmptyQuery => 0,
            ExecStatus::CommandOk => 1,
            ExecStatus::TuplesOk => 2,
            ExecStatus::CopyOut => 3,
            ExecStatus::CopyIn => 4,
            ExecStatus::BadResponse => 5,
            ExecStatus::NonFatalError => 6,
            ExecStatus::FatalError => 7,
            ExecStatus::CopyBoth => 8,
            ExecStatus::SingleTuple => 9,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExecStatus::CommandOk | ExecStatus::TuplesOk | ExecStatus::SingleTuple
        )
    }
}

// ============================================================================
// Columns
// ============================================================================

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub type_oid: Oid,
    pub category: NativeCategory,
    pub format: Format,
}

// ============================================================================
// Result Decoder
// ============================================================================

/// One server response with typed, validated cell access.
pub struct ResultDecoder<R: RawResult> {
    raw: R,
    columns: Vec<Column>,
    rows: usize,
    status: ExecStatus,
    mode: DatetimeMode,
}

impl<R: RawResult> ResultDecoder<R> {
    /// Take ownership of `raw` and read its metadata.
    pub fn new(raw: R, mode: DatetimeMode) -> Self {
        let columns = (0..raw.column_count())
            .map(|i| {
                let type_oid = raw.column_type(i);
                Column {
                    name: raw.column_name(i).to_string(),
                    type_oid,
                    category: category_for(type_oid),
                    format: raw.column_format(i),
                }
            })
            .collect();

        Self {
            rows: raw.row_count(),
            status: ExecStatus::from_code(raw.status_code()),
            columns,
            raw,
            mode,
        }
    }

    pub fn status(&self) -> ExecStatus {
        self.status
    }

    /// True only for CommandOk, TuplesOk and SingleTuple.
    pub fn was_successful(&self) -> bool {
        self.status.is_success()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.raw.error_message()
    }

    pub fn datetime_mode(&self) -> DatetimeMode {
        self.mode
    }

    #[inline]
    pub fn row_count(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> PgResult<&Column> {
        self.columns.get(index).ok_or(PgError::InvalidColumnNumber {
            index,
            count: self.columns.len(),
        })
    }

    /// Position of the first column whose name matches, ignoring case.
    pub fn column_index(&self, name: &str) -> PgResult<usize> {
        let wanted = name.to_lowercase();
        self.columns
            .iter()
            .position(|c| c.name.to_lowercase() == wanted)
            .ok_or_else(|| PgError::InvalidColumnName(name.to_string()))
    }

    /// Check whether a cell is SQL NULL.
    pub fn is_null(&self, row: usize, column: usize) -> PgResult<bool> {
        self.check_row(row)?;
        self.column(column)?;
        Ok(self.raw.is_null(row, column))
    }

    /// Decode the cell at (`row`, `column`) as `T`.
    ///
    /// Returns `Ok(None)` for NULL cells without looking at their bytes.
    /// Columns whose category does not fit `T` fail with `InvalidType`
    /// before any byte is read.
    pub fn get<T: FromCell>(&self, row: usize, column: usize) -> PgResult<Option<T>> {
        self.check_row(row)?;
        let col = self.column(column)?;

        if self.raw.is_null(row, column) {
            return Ok(None);
        }

        if !category_matches(col.category, T::SHAPE) {
            return Err(PgError::InvalidType {
                column,
                category: col.category,
                shape: T::SHAPE,
            });
        }

        let data = self.raw.cell(row, column);
        codec::decode(data, col.type_oid, col.format, self.mode)?
            .map(|v| T::from_value(v, col.type_oid))
            .transpose()
    }

    /// Decode a cell by column name (case-insensitive, first match).
    pub fn get_by_name<T: FromCell>(&self, row: usize, name: &str) -> PgResult<Option<T>> {
        self.check_row(row)?;
        let column = self.column_index(name)?;
        self.get(row, column)
    }

    /// A view of one row.
    pub fn row(&self, index: usize) -> PgResult<Row<'_, R>> {
        self.check_row(index)?;
        Ok(Row {
            decoder: self,
            index,
        })
    }

    /// Iterate over all rows.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_, R>> {
        (0..self.rows).map(move |index| Row {
            decoder: self,
            index,
        })
    }

    /// Give the raw response back, consuming the decoder.
    pub fn into_raw(self) -> R {
        self.raw
    }

    fn check_row(&self, index: usize) -> PgResult<()> {
        if index < self.rows {
            Ok(())
        } else {
            Err(PgError::InvalidRowNumber {
                index,
                count: self.rows,
            })
        }
    }
}

impl<R: RawResult> std::fmt::Debug for ResultDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDecoder")
            .field("status", &self.status)
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .finish()
    }
}

/// A borrowed row of a `ResultDecoder`.
pub struct Row<'a, R: RawResult> {
    decoder: &'a ResultDecoder<R>,
    index: usize,
}

impl<'a, R: RawResult> Row<'a, R> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn get<T: FromCell>(&self, column: usize) -> PgResult<Option<T>> {
        self.decoder.get(self.index, column)
    }

    pub fn get_by_name<T: FromCell>(&self, name: &str) -> PgResult<Option<T>> {
        self.decoder.get_by_name(self.index, name)
    }

    pub fn is_null(&self, column: usize) -> PgResult<bool> {
        self.decoder.is_null(self.index, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::codec::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Minimal in-memory response that counts byte accesses and releases.
    struct Fixture {
        status: i32,
        columns: Vec<(&'static str, Oid, Format)>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        cell_reads: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RawResult for Fixture {
        fn status_code(&self) -> i32 {
            self.status
        }
        fn row_count(&self) -> usize {
            self.rows.len()
        }
        fn column_count(&self) -> usize {
            self.columns.len()
        }
        fn column_name(&self, column: usize) -> &str {
            self.columns[column].0
        }
        fn column_type(&self, column: usize) -> Oid {
            self.columns[column].1
        }
        fn column_format(&self, column: usize) -> Format {
            self.columns[column].2
        }
        fn is_null(&self, row: usize, column: usize) -> bool {
            self.rows[row][column].is_none()
        }
        fn cell(&self, row: usize, column: usize) -> &[u8] {
            self.cell_reads.fetch_add(1, Ordering::SeqCst);
            self.rows[row][column].as_deref().unwrap_or(&[])
        }
    }

    fn fixture() -> (Fixture, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let int = |v: i32| Some(v.to_be_bytes().to_vec());
        let fixture = Fixture {
            status: 2,
            columns: vec![
                ("id", Oid::INT4, Format::Binary),
                ("Name", Oid::TEXT, Format::Binary),
                ("score", Oid::FLOAT8, Format::Text),
            ],
            rows: vec![
                vec![int(1024), Some(b"alice".to_vec()), Some(b"1.5".to_vec())],
                vec![int(7), None, Some(b"".to_vec())],
                vec![int(8), Some(b"carol".to_vec()), None],
            ],
            cell_reads: Arc::clone(&reads),
            released: Arc::clone(&released),
        };
        (fixture, reads, released)
    }

    #[test]
    fn test_binary_int_and_invalid_type() {
        let (raw, reads, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        assert_eq!(result.get::<i32>(0, 0).unwrap(), Some(1024));

        let before = reads.load(Ordering::SeqCst);
        let err = result.get::<String>(0, 0).unwrap_err();
        assert!(matches!(err, PgError::InvalidType { column: 0, .. }));
        assert_eq!(reads.load(Ordering::SeqCst), before, "no byte access on type mismatch");
    }

    #[test]
    fn test_null_short_circuits() {
        let (raw, reads, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        // Wrong shape on purpose: null wins
        assert_eq!(result.get::<i64>(1, 1).unwrap(), None);
        assert_eq!(result.get::<String>(1, 1).unwrap(), None);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert!(result.is_null(1, 1).unwrap());
    }

    #[test]
    fn test_bounds() {
        let (raw, _, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        assert!(matches!(
            result.get::<i32>(0, 5),
            Err(PgError::InvalidColumnNumber { index: 5, count: 3 })
        ));
        assert!(matches!(
            result.get::<i32>(10, 0),
            Err(PgError::InvalidRowNumber { index: 10, count: 3 })
        ));
        assert!(result.row(3).is_err());
    }

    #[test]
    fn test_name_lookup_ignores_case() {
        let (raw, _, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        for name in ["name", "NAME", "Name"] {
            assert_eq!(
                result.get_by_name::<String>(0, name).unwrap(),
                Some("alice".to_string())
            );
        }
        assert!(matches!(
            result.get_by_name::<String>(0, "missing"),
            Err(PgError::InvalidColumnName(n)) if n == "missing"
        ));
    }

    #[test]
    fn test_text_column_in_same_result() {
        let (raw, _, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        assert_eq!(result.get::<f64>(0, 2).unwrap(), Some(1.5));
        // Empty text in a numeric column is absent, not an error
        assert_eq!(result.get::<f64>(1, 2).unwrap(), None);
        assert_eq!(
            result.row(0).unwrap().get::<Value>(2).unwrap(),
            Some(Value::Double(1.5))
        );
    }

    #[test]
    fn test_status_classification() {
        let (raw, _, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        assert_eq!(result.status(), ExecStatus::TuplesOk);
        assert!(result.was_successful());

        for code in 0..=9 {
            let status = ExecStatus::from_code(code);
            assert_eq!(status.code(), code);
            assert_eq!(status.is_success(), matches!(code, 1 | 2 | 9));
        }
        assert_eq!(ExecStatus::from_code(42), ExecStatus::BadResponse);
    }

    #[test]
    fn test_released_exactly_once() {
        let (raw, _, released) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        let raw = result.into_raw();
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(raw);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let (raw, _, released) = fixture();
        drop(ResultDecoder::new(raw, DatetimeMode::Integer));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rows_iterator() {
        let (raw, _, _) = fixture();
        let result = ResultDecoder::new(raw, DatetimeMode::Integer);
        let ids: Vec<i32> = result
            .rows()
            .map(|row| row.get::<i32>(0).unwrap().unwrap())
            .collect();
        assert_eq!(ids, vec![1024, 7, 8]);
    }
}
