//! # ws-dispatch
//!
//! Bidirectional WebSocket event dispatcher with a typed handler
//! registry.
//!
//! Each accepted WebSocket carries discrete named events of the wire
//! shape `{"name": ..., "args": [...]}`. The dispatcher decodes them,
//! validates their arguments against the registered parameter shapes,
//! and routes each to the matching handler, while exposing a
//! non-blocking send/close API back to the application. Per-connection
//! dispatch is strictly serialized in arrival order; teardown is
//! race-free and single-fire.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)
//!     │
//!     ├── Upgrade adapter (upgrade/)
//!     │
//!     ├── Dispatcher (dispatcher/) ── connection table, hooks
//!     ├── Connection (connection/) ── state machine, run loop
//!     │
//!     ├── EventRegistry (registry/) ── name → (shapes, callable)
//!     └── Envelope (envelope/)     ── wire codec, shape taxonomy
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ws_dispatch::{
//!     Connection, Dispatcher, DispatcherConfig, EventHandler, EventRegistry,
//! };
//!
//! #[derive(Default)]
//! struct Chat;
//!
//! impl EventHandler for Chat {
//!     fn on_open(&self, conn: &Connection) {
//!         let _ = conn.send("greet", ("hi",));
//!     }
//! }
//!
//! # fn main() -> Result<(), ws_dispatch::DispatchError> {
//! let registry = EventRegistry::builder()
//!     .on("echo", |_chat: &Chat, conn: &Connection, (msg,): (String,)| {
//!         let _ = conn.send("echo", (msg,));
//!     })
//!     .build()?;
//! let dispatcher = Arc::new(Dispatcher::new(
//!     registry,
//!     DispatcherConfig::from_env(),
//!     Chat::default,
//! ));
//! # Ok(()) }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod upgrade;

pub use config::DispatcherConfig;
pub use connection::{ConnId, ConnState, Connection};
pub use dispatcher::{Dispatcher, EventHandler};
pub use envelope::{ArgShape, Envelope, EventArg, EventArgs, IntoArgs};
pub use error::{DispatchError, ErrorKind};
pub use registry::{EventRegistry, RegistryBuilder};
pub use upgrade::ws_handler;
