//! Server tunables.

use std::time::Duration;

/// Default listening port for plaintext WebSocket.
pub const DEFAULT_PORT: u16 = 80;

/// Default maximum single-frame payload (16 MiB). Guards against memory
/// exhaustion from hostile 64-bit length fields.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum reassembled message size (16 MiB). Bounds the per-session
/// fragmentation buffer; sessions can lower or raise their own limit.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default receive poll interval. Blocked reads wake this often so the
/// receive loop can observe a cross-thread `close()`; ordinary traffic is
/// never timed out by this.
pub const DEFAULT_READ_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default close-handshake timeout: how long a closing session waits for
/// the peer's close echo before forcing teardown.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`Container`](crate::server::Container).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port used by `listen()` (a `listen_on(port)` call overrides it).
    pub port: u16,
    /// Maximum declared payload length the frame codec accepts.
    pub max_frame_size: usize,
    /// Initial per-session reassembly buffer limit.
    pub max_buffer_size: usize,
    /// Receive poll interval (see [`DEFAULT_READ_POLL_INTERVAL`]).
    pub read_poll_interval: Duration,
    /// Close-handshake timeout (see [`DEFAULT_CLOSE_TIMEOUT`]).
    pub close_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            read_poll_interval: DEFAULT_READ_POLL_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}
