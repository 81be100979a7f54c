//! PostgreSQL value encoding and decoding.
//!
//! This module converts application values to and from the binary and text
//! wire formats. Every routine here is pure: no connection state is touched,
//! the datetime layout is passed in explicitly.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::datetime::{self, DatetimeMode, Temporal};
use super::error::{FormatMismatch, PgError, PgResult};
use super::types::{category_for, category_matches, Format, NativeCategory, Oid, Shape};

// ============================================================================
// Values
// ============================================================================

/// An application value, tagged by shape.
///
/// Integers carry no width of their own: the target wire type decides it,
/// and a value that does not fit is rejected at encode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Temporal(Temporal),
}

impl Value {
    /// The native category this value belongs to.
    pub fn category(&self) -> NativeCategory {
        match self {
            Value::Bool(_) => NativeCategory::Boolean,
            Value::Int(_) => NativeCategory::Integer,
            Value::Float(_) => NativeCategory::FloatingPoint,
            Value::Double(_) => NativeCategory::DoublePrecision,
            Value::Text(_) => NativeCategory::Text,
            Value::Bytes(_) => NativeCategory::ByteBuffer,
            Value::Temporal(_) => NativeCategory::Temporal,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Temporal> for Value {
    fn from(v: Temporal) -> Self {
        Value::Temporal(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Temporal(Temporal::Date(v))
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Temporal(Temporal::Time(v))
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Temporal(Temporal::Timestamp(v))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Temporal(Temporal::TimestampTz(v))
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Wire bytes for one value.
///
/// `bytes` may be longer than `len`: binary text carries an unreported
/// terminator after the payload.
#[derive(Debug, PartialEq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub len: usize,
    pub format: Format,
}

/// Encode `value` as wire type `oid` in `format`.
///
/// The value's category must be exactly the category of `oid`. Types outside
/// the catalog are always sent in text format, whatever `format` asks for;
/// the returned `Encoded::format` says which one was used.
pub fn encode(value: Value, oid: Oid, format: Format, mode: DatetimeMode) -> PgResult<Encoded> {
    let expected = category_for(oid);
    let found = value.category();
    if expected != found {
        return Err(PgError::unsupported(
            oid,
            FormatMismatch::Category { expected, found },
        ));
    }

    match format {
        Format::Binary if oid.is_cataloged() => encode_binary(value, oid, mode),
        _ => encode_text(value, oid),
    }
}

fn encode_binary(value: Value, oid: Oid, mode: DatetimeMode) -> PgResult<Encoded> {
    let bytes = match value {
        Value::Bool(v) => vec![if v { 1 } else { 0 }],
        Value::Int(v) => encode_int(v, oid)?,
        Value::Float(v) => v.to_be_bytes().to_vec(),
        Value::Double(v) => v.to_be_bytes().to_vec(),
        Value::Text(v) => {
            let mut bytes = v.into_bytes();
            let len = bytes.len();
            bytes.push(0);
            return Ok(Encoded {
                bytes,
                len,
                format: Format::Binary,
            });
        }
        Value::Bytes(v) => v,
        Value::Temporal(v) => datetime::encode_binary(v, oid, mode)?,
    };

    let len = bytes.len();
    Ok(Encoded {
        bytes,
        len,
        format: Format::Binary,
    })
}

fn encode_int(v: i64, oid: Oid) -> PgResult<Vec<u8>> {
    let out_of_range = |_| PgError::unsupported(oid, FormatMismatch::OutOfRange);
    let bytes = match oid {
        Oid::INT2 => i16::try_from(v).map_err(out_of_range)?.to_be_bytes().to_vec(),
        Oid::INT4 => i32::try_from(v).map_err(out_of_range)?.to_be_bytes().to_vec(),
        Oid::OID_TYPE => u32::try_from(v).map_err(out_of_range)?.to_be_bytes().to_vec(),
        _ => v.to_be_bytes().to_vec(),
    };
    Ok(bytes)
}

fn encode_text(value: Value, oid: Oid) -> PgResult<Encoded> {
    let text = match value {
        Value::Bool(v) => if v { "t" } else { "f" }.to_string(),
        Value::Int(v) => {
            // Same range rules as binary
            encode_int(v, oid)?;
            v.to_string()
        }
        Value::Float(v) => float_text(v as f64, || v.to_string()),
        Value::Double(v) => float_text(v, || v.to_string()),
        Value::Text(v) => v,
        Value::Bytes(v) => format!("\\x{}", hex::encode(v)),
        Value::Temporal(v) => datetime::encode_text(v, oid)?,
    };

    // Text parameters travel as C strings; the terminator is part of the length
    let mut bytes = text.into_bytes();
    bytes.push(0);
    let len = bytes.len();
    Ok(Encoded {
        bytes,
        len,
        format: Format::Text,
    })
}

fn float_text(v: f64, shortest: impl FnOnce() -> String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        shortest()
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one non-null cell of wire type `oid` in `format`.
///
/// Text-format numbers and booleans that are empty or do not parse come back
/// as `None`.
pub fn decode(data: &[u8], oid: Oid, format: Format, mode: DatetimeMode) -> PgResult<Option<Value>> {
    match format {
        Format::Binary => decode_binary(data, oid, mode).map(Some),
        Format::Text => decode_text(strip_terminator(data), oid),
    }
}

/// Decode one cell straight into `T`, refusing columns of the wrong category
/// before any byte is read.
pub fn decode_as<T: FromCell>(
    data: &[u8],
    oid: Oid,
    format: Format,
    mode: DatetimeMode,
) -> PgResult<Option<T>> {
    let category = category_for(oid);
    if !category_matches(category, T::SHAPE) {
        return Err(PgError::unsupported(
            oid,
            FormatMismatch::Category {
                expected: category,
                found: shape_category(T::SHAPE).unwrap_or(category),
            },
        ));
    }
    decode(data, oid, format, mode)?
        .map(|v| T::from_value(v, oid))
        .transpose()
}

fn decode_binary(data: &[u8], oid: Oid, mode: DatetimeMode) -> PgResult<Value> {
    let value = match category_for(oid) {
        NativeCategory::Boolean => Value::Bool(fixed::<1>(data, oid)?[0] != 0),
        NativeCategory::Integer => match oid {
            Oid::INT2 => Value::Int(i16::from_be_bytes(fixed(data, oid)?) as i64),
            Oid::INT4 => Value::Int(i32::from_be_bytes(fixed(data, oid)?) as i64),
            Oid::OID_TYPE => Value::Int(u32::from_be_bytes(fixed(data, oid)?) as i64),
            _ => Value::Int(i64::from_be_bytes(fixed(data, oid)?)),
        },
        NativeCategory::FloatingPoint => Value::Float(f32::from_be_bytes(fixed(data, oid)?)),
        NativeCategory::DoublePrecision => Value::Double(f64::from_be_bytes(fixed(data, oid)?)),
        // Unknown binary layouts (uuid, jsonb, ...) are shown as `\x` hex
        NativeCategory::Text if !oid.is_cataloged() => {
            Value::Text(format!("\\x{}", hex::encode(data)))
        }
        NativeCategory::Text => Value::Text(utf8(data, oid)?.to_string()),
        NativeCategory::ByteBuffer => Value::Bytes(data.to_vec()),
        NativeCategory::Temporal => Value::Temporal(datetime::decode_binary(data, oid, mode)?),
    };
    Ok(value)
}

fn decode_text(data: &[u8], oid: Oid) -> PgResult<Option<Value>> {
    let text = utf8(data, oid)?;

    let value = match category_for(oid) {
        NativeCategory::Boolean => match text.trim() {
            "t" | "true" | "1" | "TRUE" | "on" => Some(Value::Bool(true)),
            "f" | "false" | "0" | "FALSE" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        NativeCategory::Integer => text.trim().parse::<i64>().ok().map(Value::Int),
        NativeCategory::FloatingPoint => {
            parse_float(text, f32::NAN, f32::INFINITY, f32::NEG_INFINITY).map(Value::Float)
        }
        NativeCategory::DoublePrecision => {
            parse_float(text, f64::NAN, f64::INFINITY, f64::NEG_INFINITY).map(Value::Double)
        }
        NativeCategory::Text => Some(Value::Text(text.to_string())),
        NativeCategory::ByteBuffer => Some(Value::Bytes(decode_bytea_text(text, oid)?)),
        NativeCategory::Temporal => datetime::decode_text(text, oid)?.map(Value::Temporal),
    };
    Ok(value)
}

fn parse_float<F: std::str::FromStr>(text: &str, nan: F, inf: F, neg_inf: F) -> Option<F> {
    match text.trim() {
        "" => None,
        "NaN" => Some(nan),
        "Infinity" => Some(inf),
        "-Infinity" => Some(neg_inf),
        t => t.parse::<F>().ok(),
    }
}

fn decode_bytea_text(text: &str, oid: Oid) -> PgResult<Vec<u8>> {
    match text.strip_prefix("\\x") {
        Some(digits) => hex::decode(digits)
            .map_err(|e| PgError::unsupported(oid, FormatMismatch::Encoding(e.to_string()))),
        None => Ok(text.as_bytes().to_vec()),
    }
}

/// Drop the single C-string terminator a text payload may carry.
fn strip_terminator(data: &[u8]) -> &[u8] {
    match data.split_last() {
        Some((0, rest)) => rest,
        _ => data,
    }
}

fn fixed<const N: usize>(data: &[u8], oid: Oid) -> PgResult<[u8; N]> {
    data.try_into().map_err(|_| {
        PgError::unsupported(
            oid,
            FormatMismatch::Length {
                expected: N,
                actual: data.len(),
            },
        )
    })
}

fn utf8(data: &[u8], oid: Oid) -> PgResult<&str> {
    std::str::from_utf8(data)
        .map_err(|e| PgError::unsupported(oid, FormatMismatch::Encoding(e.to_string())))
}

fn shape_category(shape: Shape) -> Option<NativeCategory> {
    match shape {
        Shape::Bool => Some(NativeCategory::Boolean),
        Shape::Int => Some(NativeCategory::Integer),
        Shape::Float => Some(NativeCategory::FloatingPoint),
        Shape::Double => Some(NativeCategory::DoublePrecision),
        Shape::Text => Some(NativeCategory::Text),
        Shape::Bytes => Some(NativeCategory::ByteBuffer),
        Shape::Temporal => Some(NativeCategory::Temporal),
        Shape::Any => None,
    }
}

// ============================================================================
// Typed conversions
// ============================================================================

/// A Rust type a decoded cell can be read into.
pub trait FromCell: Sized {
    /// The shape this type requests; checked against the column category.
    const SHAPE: Shape;

    /// Convert a decoded value of a matching category.
    fn from_value(value: Value, oid: Oid) -> PgResult<Self>;
}

fn wrong_value(oid: Oid, value: &Value, expected: NativeCategory) -> PgError {
    PgError::unsupported(
        oid,
        FormatMismatch::Category {
            expected,
            found: value.category(),
        },
    )
}

impl FromCell for Value {
    const SHAPE: Shape = Shape::Any;

    fn from_value(value: Value, _oid: Oid) -> PgResult<Self> {
        Ok(value)
    }
}

impl FromCell for bool {
    const SHAPE: Shape = Shape::Bool;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::Boolean)),
        }
    }
}

macro_rules! int_from_cell {
    ($($t:ty),*) => {
        $(
            impl FromCell for $t {
                const SHAPE: Shape = Shape::Int;

                fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
                    match value {
                        Value::Int(v) => <$t>::try_from(v)
                            .map_err(|_| PgError::unsupported(oid, FormatMismatch::OutOfRange)),
                        other => Err(wrong_value(oid, &other, NativeCategory::Integer)),
                    }
                }
            }
        )*
    };
}

int_from_cell!(i16, i32, i64);

impl FromCell for f32 {
    const SHAPE: Shape = Shape::Float;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::FloatingPoint)),
        }
    }
}

impl FromCell for f64 {
    const SHAPE: Shape = Shape::Double;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Double(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::DoublePrecision)),
        }
    }
}

impl FromCell for String {
    const SHAPE: Shape = Shape::Text;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::Text)),
        }
    }
}

impl FromCell for Vec<u8> {
    const SHAPE: Shape = Shape::Bytes;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::ByteBuffer)),
        }
    }
}

impl FromCell for Temporal {
    const SHAPE: Shape = Shape::Temporal;

    fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
        match value {
            Value::Temporal(v) => Ok(v),
            other => Err(wrong_value(oid, &other, NativeCategory::Temporal)),
        }
    }
}

macro_rules! temporal_from_cell {
    ($t:ty, $variant:ident, $target:expr) => {
        impl FromCell for $t {
            const SHAPE: Shape = Shape::Temporal;

            fn from_value(value: Value, oid: Oid) -> PgResult<Self> {
                match Temporal::from_value(value, oid)?.coerce_to($target)? {
                    Temporal::$variant(v) => Ok(v),
                    _ => Err(PgError::unsupported(
                        oid,
                        FormatMismatch::Unrepresentable(stringify!($t).to_string()),
                    )),
                }
            }
        }
    };
}

temporal_from_cell!(NaiveDate, Date, Oid::DATE);
temporal_from_cell!(NaiveTime, Time, Oid::TIME);
temporal_from_cell!(NaiveDateTime, Timestamp, Oid::TIMESTAMP);
temporal_from_cell!(DateTime<Utc>, TimestampTz, Oid::TIMESTAMPTZ);
