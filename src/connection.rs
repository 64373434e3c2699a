//! Connection state machine and per-connection run loop.
//!
//! A [`Connection`] is a cheap-clone handle over one accepted WebSocket
//! stream. The stream itself is exclusively owned by the run loop task;
//! application code only ever talks to the handle, which funnels
//! outbound envelopes through a bounded queue and requests shutdown by
//! flipping the shared state machine.
//!
//! State machine: `OPEN → CLOSING → CLOSED`. The `OPEN → CLOSING`
//! transition is a compare-and-set, so exactly one cause wins even when
//! a read error, a write error, and an explicit [`Connection::close`]
//! race. Teardown runs once, in the run loop, after the loop observes
//! the transition.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep_until, timeout};

use crate::config::DispatcherConfig;
use crate::dispatcher::EventHandler;
use crate::envelope::{Envelope, IntoArgs};
use crate::error::DispatchError;
use crate::registry::EventRegistry;

/// Unique identifier for one accepted connection.
///
/// Wraps a UUID v4. Generated at accept time and immutable thereafter;
/// used as the key in the dispatcher's connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(uuid::Uuid);

impl ConnId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Read loop active, sends accepted.
    Open,
    /// A close or fatal error was observed; no further dispatch.
    Closing,
    /// Terminal; stream released, close hook invoked.
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

struct ConnectionShared {
    id: ConnId,
    outbound: mpsc::Sender<Envelope>,
    state: AtomicU8,
    /// First-writer-wins close cause. `None` after a graceful close.
    close_cause: Mutex<Option<DispatchError>>,
    close_notify: Notify,
    data: Mutex<Option<Box<dyn Any + Send>>>,
}

/// Handle to one accepted connection.
///
/// Clones share the same underlying connection. Safe to use from any
/// task, including from inside an event handler running on the read
/// loop.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a fresh connection handle plus the receiving end of its
    /// outbound queue, consumed by [`run_connection`].
    pub(crate) fn new(config: &DispatcherConfig) -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        let shared = Arc::new(ConnectionShared {
            id: ConnId::new(),
            outbound,
            state: AtomicU8::new(STATE_OPEN),
            close_cause: Mutex::new(None),
            close_notify: Notify::new(),
            data: Mutex::new(None),
        });
        (Self { shared }, outbound_rx)
    }

    /// Returns the connection's unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.shared.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_OPEN => ConnState::Open,
            STATE_CLOSING => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }

    /// Returns `true` while the connection accepts sends and dispatch.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Enqueues an outbound event envelope.
    ///
    /// Never blocks and never performs I/O: the envelope is handed to
    /// the connection's writer via the bounded outbound queue and
    /// written with the configured write deadline. Each caller's own
    /// sends are written in call order.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ConnectionClosing`] if the connection has
    ///   left the `OPEN` state.
    /// - [`DispatchError::SendQueueFull`] if the bounded queue is full.
    /// - [`DispatchError::Encode`] if an argument fails to serialize.
    pub fn send<A: IntoArgs>(&self, name: &str, args: A) -> Result<(), DispatchError> {
        if !self.is_open() {
            return Err(DispatchError::ConnectionClosing);
        }
        let envelope = Envelope {
            name: name.to_string(),
            args: args.into_args()?,
        };
        self.shared.outbound.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::ConnectionClosing,
        })
    }

    /// Requests a graceful shutdown.
    ///
    /// Idempotent: concurrent and repeated calls collapse into one
    /// teardown, and a close that raced a fatal error never overwrites
    /// the error cause. Safe to call from inside a handler running on
    /// the read loop; the current dispatch finishes before the loop
    /// exits.
    pub fn close(&self) {
        self.shutdown(None);
    }

    /// Stores an opaque per-connection value, replacing any previous
    /// one.
    pub fn set_data<T: Any + Send>(&self, value: T) {
        let mut slot = lock(&self.shared.data);
        *slot = Some(Box::new(value));
    }

    /// Takes the stored per-connection value back out, if it exists
    /// and has type `T`. On a type mismatch the stored value is left
    /// in place.
    #[must_use]
    pub fn take_data<T: Any + Send>(&self) -> Option<T> {
        let mut slot = lock(&self.shared.data);
        match slot.take()?.downcast::<T>() {
            Ok(boxed) => Some(*boxed),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    /// Attempts the `OPEN → CLOSING` transition, attaching `cause`.
    ///
    /// Returns `true` for the single winner; later callers (with or
    /// without a cause) are no-ops.
    pub(crate) fn shutdown(&self, cause: Option<DispatchError>) -> bool {
        let won = self
            .shared
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            *lock(&self.shared.close_cause) = cause;
            self.shared.close_notify.notify_one();
        }
        won
    }

    /// Resolves once the connection has entered `CLOSING`.
    pub(crate) async fn closing(&self) {
        if self.is_open() {
            self.shared.close_notify.notified().await;
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
    }

    pub(crate) fn take_cause(&self) -> Option<DispatchError> {
        lock(&self.shared.close_cause).take()
    }
}

/// Locks a mutex, recovering the guard from a poisoned lock. No code
/// path holds these locks across a panic boundary with broken
/// invariants, so the contents stay valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs the read/write loop for a single connection until teardown.
///
/// - Reads frames with the idle deadline, decodes envelopes, and
///   dispatches them synchronously in arrival order.
/// - Writes queued outbound envelopes with the write deadline.
/// - Exits once the state machine leaves `OPEN`, drains the outbound
///   queue on a graceful close, and returns the terminating cause
///   (`None` for graceful).
pub(crate) async fn run_connection<H: EventHandler>(
    socket: WebSocket,
    conn: &Connection,
    handler: &H,
    registry: &EventRegistry<H>,
    config: &DispatcherConfig,
    mut outbound_rx: mpsc::Receiver<Envelope>,
) -> Option<DispatchError> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Absolute idle deadline, re-armed only by inbound activity.
    // Outbound traffic must not keep a silent peer alive.
    let mut idle_deadline = Instant::now() + config.read_idle_timeout;

    while conn.is_open() {
        tokio::select! {
            inbound = ws_rx.next() => {
                idle_deadline = Instant::now() + config.read_idle_timeout;
                match inbound {
                    None | Some(Ok(Message::Close(_))) => {
                        conn.shutdown(Some(DispatchError::PeerClosed));
                    }
                    Some(Err(e)) => {
                        conn.shutdown(Some(DispatchError::Transport(e.to_string())));
                    }
                    Some(Ok(Message::Text(text))) => {
                        // A close that raced this frame wins: once the
                        // state left OPEN nothing further is dispatched.
                        if conn.is_open() {
                            handle_frame(text.as_str(), conn, handler, registry);
                        }
                    }
                    // Ping/pong are answered by the transport; binary
                    // frames are not part of the envelope protocol.
                    Some(Ok(_)) => {}
                }
            }
            () = sleep_until(idle_deadline) => {
                conn.shutdown(Some(DispatchError::ReadTimeout));
            }
            out = outbound_rx.recv() => {
                match out {
                    Some(envelope) => {
                        if let Err(e) = write_envelope(&mut ws_tx, &envelope, config).await {
                            conn.shutdown(Some(e));
                        }
                    }
                    None => break,
                }
            }
            () = conn.closing() => {}
        }
    }

    let cause = conn.take_cause();

    // Graceful close: flush whatever the application queued before the
    // close request, then say goodbye. On a fatal cause the stream is
    // not trusted to make progress, so pending envelopes are dropped.
    if cause.is_none() {
        while let Ok(envelope) = outbound_rx.try_recv() {
            if write_envelope(&mut ws_tx, &envelope, config).await.is_err() {
                break;
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    outbound_rx.close();
    conn.mark_closed();

    tracing::debug!(conn_id = %conn.id(), cause = ?cause, "connection closed");
    cause
}

/// Decodes and dispatches one inbound text frame.
///
/// Recoverable failures are reported through the error hook and the
/// frame is dropped; fatal failures and handler panics trigger the
/// single-fire shutdown.
fn handle_frame<H: EventHandler>(
    text: &str,
    conn: &Connection,
    handler: &H,
    registry: &EventRegistry<H>,
) {
    let envelope = match Envelope::decode(text) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return,
        Err(e) if e.is_recoverable() => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "dropping malformed envelope");
            report_error(conn, handler, &e);
            return;
        }
        Err(e) => {
            conn.shutdown(Some(e));
            return;
        }
    };

    let dispatched = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        registry.dispatch(handler, conn, &envelope)
    }));
    match dispatched {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_recoverable() => {
            tracing::debug!(conn_id = %conn.id(), error = %e, "dropping envelope");
            report_error(conn, handler, &e);
        }
        Ok(Err(e)) => {
            conn.shutdown(Some(e));
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(conn_id = %conn.id(), panic = %message, "event handler panicked");
            conn.shutdown(Some(DispatchError::HandlerPanic(message)));
        }
    }
}

/// Invokes the error hook behind the same panic boundary as event
/// handlers: a panicking hook must not unwind through the run loop and
/// skip teardown, so it becomes the close cause instead.
fn report_error<H: EventHandler>(conn: &Connection, handler: &H, error: &DispatchError) {
    let hooked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handler.on_error(conn, error);
    }));
    if let Err(payload) = hooked {
        let message = panic_message(payload.as_ref());
        tracing::error!(conn_id = %conn.id(), panic = %message, "error hook panicked");
        conn.shutdown(Some(DispatchError::HandlerPanic(message)));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn write_envelope(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    envelope: &Envelope,
    config: &DispatcherConfig,
) -> Result<(), DispatchError> {
    let text = envelope.encode()?;
    match timeout(config.write_timeout, ws_tx.send(Message::text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DispatchError::Transport(e.to_string())),
        Err(_elapsed) => Err(DispatchError::WriteTimeout),
    }
}
