//! Serialized access to one client-library connection.
//!
//! This module provides:
//! - `ConnectionConfig`: connection parameters and wire-format choices
//! - `ConnectionFactory`: opens connections and numbers them from an injected counter
//! - `Connection`: the per-connection handle every query and notification drain goes through

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::client::PgClient;
use super::codec::Value;
use super::datetime::DatetimeMode;
use super::error::PgResult;
use super::notify::Listeners;
use super::param::BoundParameter;
use super::result::ResultDecoder;
use super::types::{Format, NativeCategory, Oid};

// ============================================================================
// Connection Configuration
// ============================================================================

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection-parameter string handed to the client library
    pub params: String,
    /// Request binary result columns (default: true)
    #[serde(default = "default_binary_results")]
    pub binary_results: bool,
    /// Send date/time parameters in binary instead of text (default: false)
    #[serde(default)]
    pub binary_temporals: bool,
}

fn default_binary_results() -> bool {
    true
}

impl ConnectionConfig {
    /// Create a new configuration.
    pub fn new(params: &str) -> Self {
        Self {
            params: params.to_string(),
            binary_results: default_binary_results(),
            binary_temporals: false,
        }
    }

    /// Set whether result columns come back in binary.
    pub fn binary_results(mut self, binary: bool) -> Self {
        self.binary_results = binary;
        self
    }

    /// Set whether date/time parameters are sent in binary.
    pub fn binary_temporals(mut self, binary: bool) -> Self {
        self.binary_temporals = binary;
        self
    }

    /// The result format to request.
    pub fn result_format(&self) -> Format {
        if self.binary_results {
            Format::Binary
        } else {
            Format::Text
        }
    }
}

// ============================================================================
// Connection Factory
// ============================================================================

/// Opens connections and assigns their identifiers.
///
/// The counter is injected so that several factories (or tests) can share
/// or isolate the numbering.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    next_id: Arc<AtomicU64>,
}

impl ConnectionFactory {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        Self { next_id: counter }
    }

    /// Open a connection through the client library.
    pub fn open<C: PgClient>(&self, config: ConnectionConfig) -> PgResult<Connection<C>> {
        let client = C::connect(&config.params)?;
        Ok(self.wrap(client, config))
    }

    /// Adopt an already-open client.
    pub fn wrap<C: PgClient>(&self, client: C, config: ConnectionConfig) -> Connection<C> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let setting = client.parameter_status("integer_datetimes");
        let datetime_mode = DatetimeMode::from_setting(setting.as_deref());
        debug!(connection = id, ?datetime_mode, "connection opened");

        Connection {
            id,
            client: Arc::new(Mutex::new(client)),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            config,
            datetime_mode,
        }
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(Arc::new(AtomicU64::new(1)))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A connection handle.
///
/// Clones share the same underlying client and the same lock, so calls made
/// through any clone never interleave on the wire. They also share the
/// table that routes notifications to subscriptions by channel.
pub struct Connection<C: PgClient> {
    id: u64,
    client: Arc<Mutex<C>>,
    listeners: Arc<Mutex<Listeners>>,
    config: ConnectionConfig,
    datetime_mode: DatetimeMode,
}

impl<C: PgClient> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            client: Arc::clone(&self.client),
            listeners: Arc::clone(&self.listeners),
            config: self.config.clone(),
            datetime_mode: self.datetime_mode,
        }
    }
}

impl<C: PgClient> Connection<C> {
    /// Identifier assigned by the factory.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Datetime layout learned when the connection opened.
    pub fn datetime_mode(&self) -> DatetimeMode {
        self.datetime_mode
    }

    pub fn has_integer_datetimes(&self) -> bool {
        self.datetime_mode.is_integer()
    }

    /// Encode a parameter for this connection.
    pub fn bind(&self, oid: Oid, value: Value) -> PgResult<BoundParameter> {
        if self.config.binary_temporals && value.category() == NativeCategory::Temporal {
            BoundParameter::with_format(oid, value, self.datetime_mode, Format::Binary)
        } else {
            BoundParameter::create(oid, value, self.datetime_mode)
        }
    }

    /// Run a SQL string.
    pub fn execute(&self, sql: &str) -> PgResult<ResultDecoder<C::Result>> {
        trace!(connection = self.id, sql, "execute");
        let raw = self.client.lock().execute(sql)?;
        Ok(ResultDecoder::new(raw, self.datetime_mode))
    }

    /// Run a parameterized statement; the parameters are consumed.
    pub fn execute_params(
        &self,
        sql: &str,
        params: Vec<Option<BoundParameter>>,
    ) -> PgResult<ResultDecoder<C::Result>> {
        trace!(connection = self.id, sql, params = params.len(), "execute_params");
        let raw = self
            .client
            .lock()
            .execute_params(sql, params, self.config.result_format())?;
        Ok(ResultDecoder::new(raw, self.datetime_mode))
    }

    /// Bind `(type, value)` pairs (None = NULL) and run the statement.
    pub fn query(
        &self,
        sql: &str,
        values: Vec<(Oid, Option<Value>)>,
    ) -> PgResult<ResultDecoder<C::Result>> {
        let params = values
            .into_iter()
            .map(|(oid, value)| value.map(|v| self.bind(oid, v)).transpose())
            .collect::<PgResult<Vec<_>>>()?;
        self.execute_params(sql, params)
    }

    /// Run `f` with exclusive access to the client.
    pub fn with_client<T>(&self, f: impl FnOnce(&mut C) -> T) -> T {
        f(&mut self.client.lock())
    }

    pub(crate) fn shared_client(&self) -> Arc<Mutex<C>> {
        Arc::clone(&self.client)
    }

    pub(crate) fn listeners(&self) -> Arc<Mutex<Listeners>> {
        Arc::clone(&self.listeners)
    }
}

impl<C: PgClient> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("datetime_mode", &self.datetime_mode)
            .finish()
    }
}
