//! Encoded query parameters.
//!
//! A `BoundParameter` owns the wire bytes of one value. It is built right
//! before a parameterized call, moved into that call, and freed when dropped.
//! It is not `Clone`.

use super::codec::{self, Value};
use super::datetime::DatetimeMode;
use super::error::{FormatMismatch, PgError, PgResult};
use super::types::{category_for, Format, NativeCategory, Oid};

/// One encoded parameter value plus its wire metadata.
#[derive(Debug, PartialEq)]
pub struct BoundParameter {
    oid: Oid,
    category: NativeCategory,
    bytes: Vec<u8>,
    len: usize,
    format: Format,
}

impl BoundParameter {
    /// Validate and encode `value` as wire type `oid`.
    ///
    /// Values whose category differs from the one `oid` implies are rejected
    /// with `FormatMismatch::Category`; there is no promotion (a `Float` is
    /// never accepted for `float8`). Temporal values and types outside the
    /// catalog are sent as text, every other category as binary.
    pub fn create(oid: Oid, value: Value, mode: DatetimeMode) -> PgResult<Self> {
        let format = match value.category() {
            NativeCategory::Temporal => Format::Text,
            _ => Format::Binary,
        };
        Self::with_format(oid, value, mode, format)
    }

    /// Like `create`, with an explicit wire format.
    pub fn with_format(oid: Oid, value: Value, mode: DatetimeMode, format: Format) -> PgResult<Self> {
        let category = category_for(oid);
        let found = value.category();
        if category != found {
            return Err(PgError::unsupported(
                oid,
                FormatMismatch::Category {
                    expected: category,
                    found,
                },
            ));
        }

        let encoded = codec::encode(value, oid, format, mode)?;
        Ok(Self {
            oid,
            category,
            bytes: encoded.bytes,
            len: encoded.len,
            format: encoded.format,
        })
    }

    /// The requested wire type.
    #[inline]
    pub fn oid(&self) -> Oid {
        self.oid
    }

    #[inline]
    pub fn category(&self) -> NativeCategory {
        self.category
    }

    #[inline]
    pub fn format(&self) -> Format {
        self.format
    }

    /// Reported length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes to send: the first `len()` bytes of the buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// The whole allocated buffer, including any trailing terminator.
    pub fn buffer(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the buffer out, consuming the parameter.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::datetime::Temporal;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    const MODE: DatetimeMode = DatetimeMode::Integer;

    #[test]
    fn test_int4_parameter() {
        let p = BoundParameter::create(Oid::INT4, Value::Int(42), MODE).unwrap();
        assert_eq!(p.oid(), Oid::INT4);
        assert_eq!(p.category(), NativeCategory::Integer);
        assert_eq!(p.format(), Format::Binary);
        assert_eq!(p.len(), 4);
        assert_eq!(p.as_bytes(), &[0, 0, 0, 42]);
    }

    #[test]
    fn test_float_for_double_rejected() {
        // Exact category match: no silent promotion of float4 to float8
        let err = BoundParameter::create(Oid::FLOAT8, Value::Float(1.5), MODE).unwrap_err();
        assert!(matches!(
            err,
            PgError::UnsupportedDataFormat {
                reason: FormatMismatch::Category {
                    expected: NativeCategory::DoublePrecision,
                    found: NativeCategory::FloatingPoint,
                },
                ..
            }
        ));

        let ok = BoundParameter::create(Oid::FLOAT8, Value::Double(1.5), MODE).unwrap();
        assert_eq!(ok.len(), 8);
    }

    #[test]
    fn test_out_of_range_is_distinct_from_mismatch() {
        let err = BoundParameter::create(Oid::INT2, Value::Int(40_000), MODE).unwrap_err();
        assert!(matches!(
            err,
            PgError::UnsupportedDataFormat {
                reason: FormatMismatch::OutOfRange,
                ..
            }
        ));
    }

    #[test]
    fn test_text_parameter_carries_terminator() {
        let p = BoundParameter::create(Oid::VARCHAR, Value::from("hi"), MODE).unwrap();
        assert_eq!(p.format(), Format::Binary);
        assert_eq!(p.len(), 2);
        assert_eq!(p.as_bytes(), b"hi");
        assert_eq!(p.buffer(), b"hi\0");
    }

    #[test]
    fn test_temporal_defaults_to_text() {
        let d = NaiveDate::from_ymd_opt(2019, 1, 8).unwrap();
        let p = BoundParameter::create(Oid::DATE, Value::Temporal(Temporal::Date(d)), MODE).unwrap();
        assert_eq!(p.format(), Format::Text);
        assert_eq!(p.as_bytes(), b"2019-01-08\0");

        let b = BoundParameter::with_format(Oid::DATE, Value::from(d), MODE, Format::Binary).unwrap();
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn test_unknown_oid_takes_text() {
        let p = BoundParameter::create(Oid(2950), Value::from("a0eebc99"), MODE).unwrap();
        assert_eq!(p.category(), NativeCategory::Text);
        assert_eq!(p.format(), Format::Text);
        assert_eq!(p.as_bytes(), b"a0eebc99\0");
        assert!(BoundParameter::create(Oid(2950), Value::Int(1), MODE).is_err());
    }
}
