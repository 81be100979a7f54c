//! PostgreSQL type catalog.
//!
//! Maps server type identifiers (OIDs) onto the small set of native
//! categories the codec understands, and describes the wire format flag.
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifiers (OIDs).
///
/// These are the built-in type OIDs from PostgreSQL. OIDs are unsigned
/// 32-bit on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub u32);

impl Oid {
    // Boolean types
    pub const BOOL: Oid = Oid(16);

    // Binary data
    pub const BYTEA: Oid = Oid(17);

    // Character types
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);

    // Integer types
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);

    // Text types
    pub const TEXT: Oid = Oid(25);

    // OID type
    pub const OID_TYPE: Oid = Oid(26);

    // JSON (text layout on the wire)
    pub const JSON: Oid = Oid(114);

    // Floating point types
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);

    // String types
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);

    // Date/time types
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const TIMETZ: Oid = Oid(1266);

    /// Create from the raw wire value
    #[inline]
    pub fn from_u32(oid: u32) -> Self {
        Oid(oid)
    }

    /// Get the raw wire value
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The server-side type name, for the types in the catalog.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Oid::BOOL => "bool",
            Oid::BYTEA => "bytea",
            Oid::CHAR => "char",
            Oid::NAME => "name",
            Oid::INT8 => "int8",
            Oid::INT2 => "int2",
            Oid::INT4 => "int4",
            Oid::TEXT => "text",
            Oid::OID_TYPE => "oid",
            Oid::JSON => "json",
            Oid::FLOAT4 => "float4",
            Oid::FLOAT8 => "float8",
            Oid::BPCHAR => "bpchar",
            Oid::VARCHAR => "varchar",
            Oid::DATE => "date",
            Oid::TIME => "time",
            Oid::TIMESTAMP => "timestamp",
            Oid::TIMESTAMPTZ => "timestamptz",
            Oid::TIMETZ => "timetz",
            _ => return None,
        };
        Some(name)
    }

    /// Whether the type is in the catalog. Types outside it are handled
    /// through their text form only.
    #[inline]
    pub fn is_cataloged(self) -> bool {
        self.name().is_some()
    }

    /// Width in bytes of the binary encoding, for fixed-size types.
    pub fn binary_width(self) -> Option<usize> {
        match self {
            Oid::BOOL => Some(1),
            Oid::INT2 => Some(2),
            Oid::INT4 | Oid::OID_TYPE | Oid::FLOAT4 | Oid::DATE => Some(4),
            Oid::INT8 | Oid::FLOAT8 | Oid::TIME | Oid::TIMESTAMP | Oid::TIMESTAMPTZ => Some(8),
            Oid::TIMETZ => Some(12),
            _ => None,
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "oid {}", self.0),
        }
    }
}

// ============================================================================
// Native categories
// ============================================================================

/// The semantic value kinds this layer supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeCategory {
    Boolean,
    Integer,
    FloatingPoint,
    DoublePrecision,
    Text,
    ByteBuffer,
    Temporal,
}

impl fmt::Display for NativeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeCategory::Boolean => "boolean",
            NativeCategory::Integer => "integer",
            NativeCategory::FloatingPoint => "floating point",
            NativeCategory::DoublePrecision => "double precision",
            NativeCategory::Text => "text",
            NativeCategory::ByteBuffer => "byte buffer",
            NativeCategory::Temporal => "temporal",
        };
        f.write_str(name)
    }
}

/// Map a wire type identifier to its native category.
///
/// Never fails: identifiers outside the catalog are reported as `Text` so
/// that server types this layer does not know remain readable as strings.
pub fn category_for(oid: Oid) -> NativeCategory {
    match oid {
        Oid::BOOL => NativeCategory::Boolean,
        Oid::INT2 | Oid::INT4 | Oid::INT8 | Oid::OID_TYPE => NativeCategory::Integer,
        Oid::FLOAT4 => NativeCategory::FloatingPoint,
        Oid::FLOAT8 => NativeCategory::DoublePrecision,
        Oid::BYTEA => NativeCategory::ByteBuffer,
        Oid::DATE | Oid::TIME | Oid::TIMETZ | Oid::TIMESTAMP | Oid::TIMESTAMPTZ => {
            NativeCategory::Temporal
        }
        _ => NativeCategory::Text,
    }
}

// ============================================================================
// Requested shapes
// ============================================================================

/// The shape a caller asks a cell to be decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Bool,
    Int,
    Float,
    Double,
    Text,
    Bytes,
    Temporal,
    /// Whatever the column holds.
    Any,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Bool => "bool",
            Shape::Int => "integer",
            Shape::Float => "float",
            Shape::Double => "double",
            Shape::Text => "text",
            Shape::Bytes => "bytes",
            Shape::Temporal => "temporal",
            Shape::Any => "any",
        };
        f.write_str(name)
    }
}

/// Check whether a column of `category` may be decoded as `shape`.
///
/// Every decode path calls this before reinterpreting any bytes.
pub fn category_matches(category: NativeCategory, shape: Shape) -> bool {
    matches!(
        (category, shape),
        (_, Shape::Any)
            | (NativeCategory::Boolean, Shape::Bool)
            | (NativeCategory::Integer, Shape::Int)
            | (NativeCategory::FloatingPoint, Shape::Float)
            | (NativeCategory::DoublePrecision, Shape::Double)
            | (NativeCategory::Text, Shape::Text)
            | (NativeCategory::ByteBuffer, Shape::Bytes)
            | (NativeCategory::Temporal, Shape::Temporal)
    )
}

// ============================================================================
// Wire format
// ============================================================================

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    /// Decode a format code; anything non-zero is binary.
    pub fn from_code(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}
