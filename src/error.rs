//! Dispatcher error taxonomy.
//!
//! [`DispatchError`] is the central error type for the crate. Every
//! variant belongs to exactly one [`ErrorKind`], which decides how the
//! dispatcher reacts: recoverable errors are reported through the error
//! hook and the offending envelope is dropped, fatal errors tear the
//! connection down once, and configuration errors surface at setup time
//! before any connection is accepted.

use crate::envelope::ArgShape;

/// Classification of a [`DispatchError`].
///
/// | Kind          | Reaction                                              |
/// |---------------|-------------------------------------------------------|
/// | `Recoverable` | error hook fires, envelope dropped, stream stays open |
/// | `Fatal`       | single-fire teardown, reported via the close hook     |
/// | `Config`      | returned from registry construction, never at runtime |
/// | `Send`        | returned to the `send` caller, never routed to hooks  |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Per-message validation failure; the connection stays open.
    Recoverable,
    /// Stream-level failure; the connection is torn down.
    Fatal,
    /// Setup-time misconfiguration.
    Config,
    /// Outbound send rejection reported to the caller.
    Send,
}

/// Errors produced by the dispatcher, registry, and connection layers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Inbound envelope had no `name` field (or it was not a string).
    #[error("missing event name in envelope")]
    MissingEventName,

    /// Inbound envelope had no `args` field (or it was not an array).
    #[error("missing event args in envelope")]
    MissingEventArgs,

    /// Inbound envelope named an event with no registered handler.
    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),

    /// Decoded arguments did not match the registered parameter shapes.
    #[error("arguments mismatch (expected {expected:?}, got {actual:?})")]
    ArgsMismatch {
        /// Parameter shapes the registered handler expects, in order.
        expected: Vec<ArgShape>,
        /// Shapes of the arguments actually decoded from the wire.
        actual: Vec<ArgShape>,
    },

    /// A registry was built with zero registered events.
    #[error("no event handlers registered")]
    NoEventHandlers,

    /// The same event name was registered twice.
    #[error("duplicate event handler: {0}")]
    DuplicateEvent(String),

    /// An inbound frame could not be decoded as JSON at all.
    #[error("undecodable frame: {0}")]
    Frame(String),

    /// The underlying WebSocket stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer closed the stream or sent a close frame.
    #[error("peer closed the connection")]
    PeerClosed,

    /// No frame arrived within the idle read deadline.
    #[error("read idle deadline exceeded")]
    ReadTimeout,

    /// An outbound write did not complete within the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// An outbound envelope could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A handler panicked; the panic was caught at the dispatch boundary.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// `send` was called after the connection entered CLOSING.
    #[error("connection is closing")]
    ConnectionClosing,

    /// The bounded outbound queue is full.
    #[error("outbound send queue is full")]
    SendQueueFull,
}

impl DispatchError {
    /// Returns the [`ErrorKind`] classification for this variant.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingEventName
            | Self::MissingEventArgs
            | Self::UnexpectedEvent(_)
            | Self::ArgsMismatch { .. } => ErrorKind::Recoverable,
            Self::Frame(_)
            | Self::Transport(_)
            | Self::PeerClosed
            | Self::ReadTimeout
            | Self::WriteTimeout
            | Self::Encode(_)
            | Self::HandlerPanic(_) => ErrorKind::Fatal,
            Self::NoEventHandlers | Self::DuplicateEvent(_) => ErrorKind::Config,
            Self::ConnectionClosing | Self::SendQueueFull => ErrorKind::Send,
        }
    }

    /// Returns `true` if the error leaves the connection open.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Recoverable)
    }
}
