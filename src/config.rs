//! Dispatcher configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment
//! variables (or a `.env` file via `dotenvy`), with sensible defaults
//! when a variable is unset or unparsable.

use std::time::Duration;

/// Per-dispatcher tuning knobs.
///
/// Loaded once at startup via [`DispatcherConfig::from_env`], or built
/// with [`Default`] for embedded use.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum time to wait for the next inbound frame before the
    /// connection is torn down with a read timeout. A stalled peer
    /// must not leak the connection or its task forever.
    pub read_idle_timeout: Duration,

    /// Deadline for each outbound write. Expiry is a write error and
    /// tears the connection down.
    pub write_timeout: Duration,

    /// Capacity of the bounded per-connection outbound queue.
    pub send_queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            read_idle_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
            send_queue_capacity: 64,
        }
    }
}

impl DispatcherConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set
    /// or does not parse. Calls `dotenvy::dotenv().ok()` to optionally
    /// load a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            read_idle_timeout: Duration::from_secs(parse_env(
                "WS_DISPATCH_READ_IDLE_TIMEOUT_SECS",
                defaults.read_idle_timeout.as_secs(),
            )),
            write_timeout: Duration::from_secs(parse_env(
                "WS_DISPATCH_WRITE_TIMEOUT_SECS",
                defaults.write_timeout.as_secs(),
            )),
            send_queue_capacity: parse_env(
                "WS_DISPATCH_SEND_QUEUE_CAPACITY",
                defaults.send_queue_capacity,
            ),
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on
/// missing or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
