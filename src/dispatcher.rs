//! Per-stream orchestration: handler lifecycle and connection table.
//!
//! A [`Dispatcher`] owns the immutable [`EventRegistry`], a factory
//! that builds one fresh handler instance per accepted stream, and the
//! table of live connections. [`Dispatcher::serve`] drives one stream
//! from accept to teardown.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use axum::extract::ws::WebSocket;

use crate::config::DispatcherConfig;
use crate::connection::{ConnId, Connection, lock, panic_message, run_connection};
use crate::envelope::IntoArgs;
use crate::error::DispatchError;
use crate::registry::EventRegistry;

/// Per-connection lifecycle hooks.
///
/// One instance is built per accepted stream and dropped after
/// [`on_close`](Self::on_close). All hooks run synchronously on the
/// connection's own task; `on_open` may store a [`Connection`] clone
/// for later sends from other tasks.
pub trait EventHandler: Send + Sync + 'static {
    /// Invoked once, after the connection is constructed and inserted
    /// into the table, before any envelope is dispatched.
    fn on_open(&self, conn: &Connection) {
        let _ = conn;
    }

    /// Invoked for every recoverable per-message error. The offending
    /// envelope has been dropped; the connection remains open.
    fn on_error(&self, conn: &Connection, error: &DispatchError) {
        let _ = (conn, error);
    }

    /// Invoked exactly once per connection, after the stream is
    /// released and the connection removed from the table. `cause` is
    /// `None` for a graceful close.
    fn on_close(&self, conn: &Connection, cause: Option<&DispatchError>) {
        let _ = (conn, cause);
    }
}

/// Event dispatcher for streams carrying handler instances of type `H`.
///
/// An explicit value with a clear construction lifecycle; there is no
/// process-wide default. Share it behind an [`Arc`](std::sync::Arc)
/// with whatever accepts connections.
pub struct Dispatcher<H: EventHandler> {
    registry: EventRegistry<H>,
    factory: Box<dyn Fn() -> H + Send + Sync>,
    config: DispatcherConfig,
    connections: Mutex<HashMap<ConnId, Connection>>,
}

impl<H: EventHandler> fmt::Debug for Dispatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl<H: EventHandler> Dispatcher<H> {
    /// Creates a dispatcher from a validated registry, configuration,
    /// and a factory producing one fresh handler per connection.
    pub fn new(
        registry: EventRegistry<H>,
        config: DispatcherConfig,
        factory: impl Fn() -> H + Send + Sync + 'static,
    ) -> Self {
        Self {
            registry,
            factory: Box::new(factory),
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the dispatcher's configuration.
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Number of live connections in the table.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Returns the connection handle for `id`, if it is still live.
    #[must_use]
    pub fn connection(&self, id: ConnId) -> Option<Connection> {
        lock(&self.connections).get(&id).cloned()
    }

    /// Sends an event to every live connection.
    ///
    /// Connections whose queue is full or which are already closing
    /// are skipped. Returns the number of connections the envelope was
    /// enqueued for.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Encode`] if an argument fails to
    /// serialize. Per-connection send rejections are not errors.
    pub fn broadcast<A: IntoArgs>(&self, name: &str, args: A) -> Result<usize, DispatchError> {
        let args = args.into_args()?;
        let targets: Vec<Connection> = lock(&self.connections).values().cloned().collect();
        let mut delivered = 0_usize;
        for conn in &targets {
            if conn.send(name, args.clone()).is_ok() {
                delivered += 1;
            }
        }
        tracing::debug!(event = name, delivered, targets = targets.len(), "broadcast event");
        Ok(delivered)
    }

    /// Drives one accepted stream from open hook to close hook.
    ///
    /// Builds a fresh handler and connection, inserts the connection
    /// into the table, invokes [`EventHandler::on_open`] before any
    /// dispatch, runs the read/write loop, and finally removes the
    /// connection and invokes [`EventHandler::on_close`] exactly once
    /// with the terminating cause.
    pub async fn serve(&self, socket: WebSocket) {
        let (conn, outbound_rx) = Connection::new(&self.config);
        let handler = (self.factory)();

        lock(&self.connections).insert(conn.id(), conn.clone());
        tracing::debug!(conn_id = %conn.id(), "connection accepted");

        // The open hook is application code and gets the same panic
        // boundary as event handlers: a panic becomes the close cause.
        let opened = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.on_open(&conn);
        }));
        if let Err(payload) = opened {
            let message = panic_message(payload.as_ref());
            tracing::error!(conn_id = %conn.id(), panic = %message, "open hook panicked");
            conn.shutdown(Some(DispatchError::HandlerPanic(message)));
        }

        let cause = run_connection(
            socket,
            &conn,
            &handler,
            &self.registry,
            &self.config,
            outbound_rx,
        )
        .await;

        lock(&self.connections).remove(&conn.id());
        let closed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.on_close(&conn, cause.as_ref());
        }));
        if let Err(payload) = closed {
            let message = panic_message(payload.as_ref());
            tracing::error!(conn_id = %conn.id(), panic = %message, "close hook panicked");
        }
    }
}
