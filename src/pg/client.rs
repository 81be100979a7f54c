//! Interface to the underlying PostgreSQL client library.
//!
//! Connection setup, authentication and the query round trip itself belong
//! to the client library. This layer only needs the handful of calls below;
//! everything it adds (encoding, decoding, notification delivery) is built
//! on top of them.

use std::os::fd::RawFd;

use super::error::PgResult;
use super::param::BoundParameter;
use super::result::RawResult;
use super::types::Format;

/// A notification as the client library hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

/// A live connection handle of the client library.
///
/// Calls may block. The handle is never used from two threads at once:
/// `Connection` keeps it behind a mutex.
pub trait PgClient: Send + 'static {
    type Result: RawResult + 'static;

    /// Open a connection from a connection-parameter string.
    fn connect(params: &str) -> PgResult<Self>
    where
        Self: Sized;

    /// Run a SQL string with no parameters.
    fn execute(&mut self, sql: &str) -> PgResult<Self::Result>;

    /// Run a parameterized statement. `None` entries are SQL NULL; the
    /// parameters are consumed by the call.
    fn execute_params(
        &mut self,
        sql: &str,
        params: Vec<Option<BoundParameter>>,
        result_format: Format,
    ) -> PgResult<Self::Result>;

    /// The connection's socket descriptor, for readiness polling.
    fn socket(&self) -> RawFd;

    /// Read whatever input is available on the socket without blocking.
    ///
    /// Fails when the connection has gone away.
    fn consume_input(&mut self) -> PgResult<()>;

    /// Pop the next notification already read from the socket.
    fn next_notification(&mut self) -> Option<RawNotification>;

    /// A session parameter the server reported at startup.
    fn parameter_status(&self, name: &str) -> Option<String>;
}
