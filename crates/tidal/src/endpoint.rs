//! Application-facing endpoint abstraction.
//!
//! An [`Endpoint`] is the callback set an application registers under a URI
//! path. The container invokes it from the owning session's thread; no two
//! callbacks for the same session run concurrently.

use std::sync::Arc;

use crate::close::CloseReason;
use crate::error::Error;
use crate::frame::Opcode;
use crate::session::Session;

/// A complete, reassembled application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text (validated before delivery).
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Message {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// The payload as bytes, regardless of kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    pub(crate) fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    pub(crate) fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) => b,
        }
    }
}

/// Callback capability set for one registered path.
///
/// Registered under exactly one URI path and immutable for the server's
/// lifetime. Implementations must be `Send + Sync`: callbacks fire on the
/// session threads, one thread per connection.
pub trait Endpoint: Send + Sync {
    /// A session completed its handshake and is ready for traffic.
    fn on_connect(&self, _session: &Arc<Session>) {}

    /// A complete (possibly reassembled) message arrived.
    fn on_message(&self, session: &Arc<Session>, message: Message);

    /// The session closed: normally (with the peer's or our status code) or
    /// abnormally (1006 after an I/O failure or close-handshake timeout).
    fn on_close(&self, _session: &Arc<Session>, _reason: &CloseReason) {}

    /// A fatal error occurred on the session (protocol violation). The
    /// session has already sent its close frame and is being torn down.
    fn on_error(&self, _session: &Arc<Session>, _error: &Error) {}

    /// Informational: the peer answered a ping. Liveness signal only.
    fn on_pong(&self, _session: &Arc<Session>, _payload: &[u8]) {}
}
