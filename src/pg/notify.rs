//! Asynchronous LISTEN/NOTIFY delivery.
//!
//! `Connection::listen` subscribes the session to a channel and watches the
//! connection's socket on a Tokio runtime. Every readiness event drains all
//! pending notifications under the connection lock, on the blocking pool,
//! and routes each one to the subscriptions registered for its channel. A
//! consumer task per subscription invokes the handler, one event at a time,
//! in arrival order.
//!
//! State machine of a subscription:
//!
//! ```text
//! Idle --listen--> Armed --readable--> Draining --drained--> Armed
//!                    |                    |
//!                    |                    +--input error--> Failed
//!                    +--cancel / drop--> Cancelled
//! ```

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::client::{PgClient, RawNotification};
use super::connection::Connection;
use super::error::{PgError, PgResult};

// ============================================================================
// Notification
// ============================================================================

/// A notification received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Backend process that sent the notification
    pub process_id: i32,
    pub channel: String,
    /// `None` when the sender supplied an empty payload
    pub payload: Option<String>,
}

impl From<RawNotification> for Notification {
    fn from(raw: RawNotification) -> Self {
        Self {
            process_id: raw.process_id,
            channel: raw.channel,
            payload: if raw.payload.is_empty() {
                None
            } else {
                Some(raw.payload)
            },
        }
    }
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    /// Waiting for the socket to become readable
    Armed,
    /// Pulling pending notifications off the connection
    Draining,
    /// Cancelled by the owner; nothing more is delivered
    Cancelled,
    /// The connection failed; the error has been (or is being) delivered
    Failed,
}

impl ChannelState {
    fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Cancelled | ChannelState::Failed)
    }
}

type Handler = Box<dyn FnMut(PgResult<Notification>) + Send + 'static>;
type Event = PgResult<Notification>;

// ============================================================================
// Routing
// ============================================================================

/// Per-connection table of subscriptions, keyed by channel.
///
/// Whichever watcher drains the connection routes every notification through
/// this table, so each one reaches exactly the subscriptions of its channel.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    routes: HashMap<String, Vec<(u64, UnboundedSender<Event>)>>,
}

impl Listeners {
    fn add(&mut self, channel: &str, tx: UnboundedSender<Event>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.routes
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        id
    }

    fn remove(&mut self, channel: &str, id: u64) {
        if let Some(subscribers) = self.routes.get_mut(channel) {
            subscribers.retain(|(sub, _)| *sub != id);
            if subscribers.is_empty() {
                self.routes.remove(channel);
            }
        }
    }

    fn is_listening(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    /// Queue a notification for every subscriber of its channel.
    fn route(&mut self, notification: Notification) -> usize {
        let Some(subscribers) = self.routes.get(&notification.channel) else {
            trace!(channel = %notification.channel, "no subscriber for notification");
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| tx.send(Ok(notification.clone())).is_ok())
            .count()
    }

    /// Report a lost connection to every subscriber, once, and forget them.
    fn fail_all(&mut self, reason: &str) {
        for (_, subscribers) in self.routes.drain() {
            for (_, tx) in subscribers {
                let _ = tx.send(Err(PgError::ConnectionLost(reason.to_string())));
            }
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared {
    state: Mutex<ChannelState>,
    /// Held for the whole of every handler invocation. Cancellation takes it
    /// too, so once `cancel` returns no handler call is running or pending.
    delivery: Mutex<()>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Idle),
            delivery: Mutex::new(()),
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set(&self, next: ChannelState) {
        *self.state.lock() = next;
    }

    /// Move `from -> to`; false if the state was something else.
    fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// An active LISTEN on one channel.
///
/// Dropping the subscription cancels delivery. The server-side LISTEN stays
/// in effect until `unsubscribe` is called or the session ends.
pub struct Subscription<C: PgClient> {
    channel: String,
    route: u64,
    connection: Connection<C>,
    shared: Arc<Shared>,
    watcher: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl<C: PgClient> Subscription<C> {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Stop delivery.
    ///
    /// Waits for an in-flight handler call to finish; after it returns the
    /// handler is never invoked again. Idempotent. Must not be called from
    /// inside the handler.
    pub fn cancel(&self) {
        {
            let _gate = self.shared.delivery.lock();
            let mut state = self.shared.state.lock();
            if !state.is_terminal() {
                debug!(
                    connection = self.connection.id(),
                    channel = %self.channel,
                    "subscription cancelled"
                );
                *state = ChannelState::Cancelled;
            }
        }
        self.connection
            .listeners()
            .lock()
            .remove(&self.channel, self.route);
        self.watcher.abort();
        self.consumer.abort();
    }

    /// Cancel delivery and, unless another subscription on this connection
    /// still listens to the channel, issue UNLISTEN.
    pub fn unsubscribe(self) -> PgResult<()> {
        self.cancel();
        if self.connection.listeners().lock().is_listening(&self.channel) {
            debug!(
                connection = self.connection.id(),
                channel = %self.channel,
                "channel still has subscribers, keeping LISTEN"
            );
            return Ok(());
        }
        unlisten(&self.connection, &self.channel)
    }
}

impl<C: PgClient> Drop for Subscription<C> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<C: PgClient> std::fmt::Debug for Subscription<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("connection", &self.connection.id())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Listen
// ============================================================================

impl<C: PgClient> Connection<C> {
    /// Subscribe to `channel`, delivering on the current Tokio runtime.
    pub fn listen<F>(&self, channel: &str, handler: F) -> PgResult<Subscription<C>>
    where
        F: FnMut(PgResult<Notification>) + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| PgError::Client(format!("listen needs a Tokio runtime: {}", e)))?;
        self.listen_on(channel, &runtime, handler)
    }

    /// Subscribe to `channel`, delivering on `runtime`.
    ///
    /// The handler receives `Ok` for each notification on `channel`, or a
    /// single `Err(PgError::ConnectionLost)` after which delivery stops.
    /// Several subscriptions may share a connection and even a channel.
    pub fn listen_on<F>(
        &self,
        channel: &str,
        runtime: &Handle,
        handler: F,
    ) -> PgResult<Subscription<C>>
    where
        F: FnMut(PgResult<Notification>) + Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let listeners = self.listeners();

        // Routed before LISTEN so nothing drained in between is dropped
        let (tx, rx) = mpsc::unbounded_channel();
        let route = listeners.lock().add(channel, tx);
        let abandon = |listened: bool| {
            listeners.lock().remove(channel, route);
            if listened && !listeners.lock().is_listening(channel) {
                if let Err(e) = unlisten(self, channel) {
                    warn!(connection = self.id(), channel, error = %e, "UNLISTEN after failed listen");
                }
            }
        };

        let listened = self
            .execute(&format!("LISTEN {}", quote_ident(channel)))
            .and_then(|result| {
                if result.was_successful() {
                    Ok(())
                } else {
                    Err(PgError::Client(
                        result.error_message().unwrap_or("LISTEN failed").to_string(),
                    ))
                }
            });
        if let Err(e) = listened {
            abandon(false);
            return Err(e);
        }

        let socket = self.with_client(|client| client.socket());
        let source = {
            let _enter = runtime.enter();
            duplicate_socket(socket).and_then(AsyncFd::new)
        };
        let source = match source {
            Ok(source) => source,
            Err(e) => {
                abandon(true);
                return Err(e.into());
            }
        };
        shared.set(ChannelState::Armed);
        debug!(connection = self.id(), channel, "listening");

        let watcher = runtime.spawn(watch(
            source,
            self.shared_client(),
            Arc::clone(&listeners),
            Arc::clone(&shared),
        ));
        let consumer = runtime.spawn(deliver(rx, Arc::clone(&shared), Box::new(handler)));

        Ok(Subscription {
            channel: channel.to_string(),
            route,
            connection: self.clone(),
            shared,
            watcher,
            consumer,
        })
    }
}

/// Quote an identifier for use in LISTEN/UNLISTEN.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn unlisten<C: PgClient>(connection: &Connection<C>, channel: &str) -> PgResult<()> {
    let result = connection.execute(&format!("UNLISTEN {}", quote_ident(channel)))?;
    if !result.was_successful() {
        return Err(PgError::Client(
            result
                .error_message()
                .unwrap_or("UNLISTEN failed")
                .to_string(),
        ));
    }
    debug!(connection = connection.id(), channel, "unlistened");
    Ok(())
}

/// Register a private descriptor for the socket so several subscriptions on
/// one connection each get their own readiness registration.
fn duplicate_socket(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "client has no open socket",
        ));
    }
    // SAFETY: the client keeps the socket open for as long as the borrow lasts.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    borrowed.try_clone_to_owned()
}

// ============================================================================
// Tasks
// ============================================================================

/// Wait for readability, then drain and route on the blocking pool.
async fn watch<C: PgClient>(
    source: AsyncFd<OwnedFd>,
    client: Arc<Mutex<C>>,
    listeners: Arc<Mutex<Listeners>>,
    shared: Arc<Shared>,
) {
    loop {
        let mut guard = match source.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "socket watch failed");
                listeners.lock().fail_all(&e.to_string());
                return;
            }
        };

        if !shared.transition(ChannelState::Armed, ChannelState::Draining) {
            return;
        }

        // The connection lock may be held by a running query
        let drained = {
            let client = Arc::clone(&client);
            let listeners = Arc::clone(&listeners);
            tokio::task::spawn_blocking(move || drain(&client, &listeners)).await
        };
        guard.clear_ready();

        match drained {
            Ok(Ok(routed)) => {
                if routed > 0 {
                    trace!(fd = source.as_raw_fd(), routed, "routed notifications");
                }
                if !shared.transition(ChannelState::Draining, ChannelState::Armed) {
                    return;
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "connection lost while waiting for notifications");
                return;
            }
            Err(e) => {
                warn!(error = %e, "notification drain did not complete");
                listeners.lock().fail_all(&e.to_string());
                return;
            }
        }
    }
}

/// Read available input and route every pending notification.
///
/// Routing happens under the connection lock so that batches drained by
/// different watchers keep their order.
fn drain<C: PgClient>(client: &Mutex<C>, listeners: &Mutex<Listeners>) -> PgResult<usize> {
    let mut client = client.lock();
    if let Err(e) = client.consume_input() {
        let reason = match e {
            PgError::ConnectionLost(ref msg) => msg.clone(),
            ref other => other.to_string(),
        };
        listeners.lock().fail_all(&reason);
        return Err(e);
    }

    let mut listeners = listeners.lock();
    let mut routed = 0;
    while let Some(raw) = client.next_notification() {
        routed += listeners.route(Notification::from(raw));
    }
    Ok(routed)
}

/// Invoke the handler for each queued event, in order.
async fn deliver(mut rx: UnboundedReceiver<Event>, shared: Arc<Shared>, mut handler: Handler) {
    while let Some(event) = rx.recv().await {
        let _gate = shared.delivery.lock();
        if shared.state().is_terminal() {
            break;
        }
        match event {
            Ok(notification) => handler(Ok(notification)),
            Err(e) => {
                shared.set(ChannelState::Failed);
                handler(Err(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(channel: &str, payload: &str) -> RawNotification {
        RawNotification {
            process_id: 7,
            channel: channel.to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_empty_payload_is_none() {
        assert_eq!(Notification::from(raw("jobs", "")).payload, None);
        assert_eq!(
            Notification::from(raw("jobs", "42")).payload.as_deref(),
            Some("42")
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("foobar"), "\"foobar\"");
        assert_eq!(quote_ident("Mixed Case"), "\"Mixed Case\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let shared = Shared::new();
        assert!(!shared.transition(ChannelState::Armed, ChannelState::Draining));
        shared.set(ChannelState::Armed);
        assert!(shared.transition(ChannelState::Armed, ChannelState::Draining));
        assert_eq!(shared.state(), ChannelState::Draining);
        shared.set(ChannelState::Cancelled);
        assert!(!shared.transition(ChannelState::Draining, ChannelState::Armed));
        assert!(shared.state().is_terminal());
    }

    #[test]
    fn test_route_by_channel() {
        let mut listeners = Listeners::default();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (b2_tx, mut b2_rx) = mpsc::unbounded_channel();
        listeners.add("a", a_tx);
        let b = listeners.add("b", b_tx);
        listeners.add("b", b2_tx);

        assert_eq!(listeners.route(Notification::from(raw("b", "1"))), 2);
        assert_eq!(listeners.route(Notification::from(raw("c", "2"))), 0);

        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap().unwrap().channel, "b");
        assert_eq!(b2_rx.try_recv().unwrap().unwrap().channel, "b");

        listeners.remove("b", b);
        assert!(listeners.is_listening("b"));
        assert_eq!(listeners.route(Notification::from(raw("b", "3"))), 1);
    }

    #[test]
    fn test_fail_all_reports_once() {
        let mut listeners = Listeners::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listeners.add("a", tx);

        listeners.fail_all("gone");
        listeners.fail_all("gone again");

        assert!(matches!(rx.try_recv(), Ok(Err(PgError::ConnectionLost(ref m))) if m == "gone"));
        // Sender dropped with the table entry
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!listeners.is_listening("a"));
    }
}
