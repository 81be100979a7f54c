//! pgmarshal - PostgreSQL value marshalling for Rust.
//!
//! Converts native values to and from PostgreSQL wire representations,
//! decodes query results by column type, and delivers LISTEN/NOTIFY
//! notifications asynchronously. The network client itself is supplied by
//! the caller through the `PgClient` trait.

pub mod pg;

pub use pg::{
    BoundParameter, ChannelState, Connection, ConnectionConfig, ConnectionFactory, DatetimeMode,
    ExecStatus, FromCell, NativeCategory, Notification, Oid, PgClient, PgError, PgResult,
    ResultDecoder, Subscription, Temporal, Value,
};
