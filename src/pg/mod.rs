//! PostgreSQL value marshalling and notification delivery.
//!
//! This module sits on top of a client library (see `client::PgClient`) and
//! provides:
//! - Typed encoding of query parameters into wire bytes
//! - Typed decoding of result cells, in text or binary format
//! - Asynchronous delivery of LISTEN/NOTIFY notifications
//!
//! Architecture:
//! - `types`: Type catalog (OIDs, native categories, wire formats)
//! - `datetime`: Date/time conversions for both datetime storage modes
//! - `codec`: Value encoding/decoding per type and format
//! - `param`: Bound query parameters
//! - `result`: Result decoder over a raw result
//! - `client`: Interface to the client library
//! - `protocol`: Backend message decoding and an owned wire result
//! - `connection`: Connection handle, factory and configuration
//! - `notify`: Notification channel

pub mod client;
pub mod codec;
pub mod connection;
pub mod datetime;
pub mod error;
pub mod notify;
pub mod param;
pub mod protocol;
pub mod result;
pub mod types;


// Public API re-exports for library consumers
pub use client::{PgClient, RawNotification};
pub use codec::{FromCell, Value};
pub use connection::{Connection, ConnectionConfig, ConnectionFactory};
pub use datetime::{DatetimeMode, Temporal};
pub use error::{FormatMismatch, PgError, PgResult};
pub use notify::{ChannelState, Notification, Subscription};
pub use param::BoundParameter;
pub use protocol::{BackendMessage, WireResult};
pub use result::{Column, ExecStatus, RawResult, ResultDecoder, Row};
pub use types::{category_for, category_matches, Format, NativeCategory, Oid, Shape};
