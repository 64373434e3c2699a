//! Axum WebSocket upgrade adapter.
//!
//! The transport handshake stays with axum; this module only hands the
//! established socket over to the dispatcher.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use crate::dispatcher::{Dispatcher, EventHandler};

/// Upgrades an HTTP connection to WebSocket and serves it with the
/// dispatcher from router state.
///
/// ```ignore
/// let app = Router::new()
///     .route("/ws", get(ws_handler::<MyHandler>))
///     .with_state(dispatcher);
/// ```
pub async fn ws_handler<H: EventHandler>(
    ws: WebSocketUpgrade,
    State(dispatcher): State<Arc<Dispatcher<H>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move { dispatcher.serve(socket).await })
}
