//! Error taxonomy for the engine.
//!
//! Four failure families, matching the blast radius of each:
//!
//! - [`HandshakeError`]: the upgrade request was malformed or incomplete.
//!   Answered with `400 Bad Request`; no session is ever created.
//! - [`ProtocolError`]: a malformed frame on an established session. Fatal
//!   to that session only -- answered with a close frame carrying the
//!   specific status code.
//! - [`RegistryError`]: endpoint registration failures, surfaced
//!   synchronously to the registering caller.
//! - I/O errors: socket-level failures, treated as abnormal closure (1006).

use std::io;

use thiserror::Error;

use crate::close::CloseCode;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A violation of the RFC 6455 framing rules.
///
/// Every variant maps to a close status code via [`ProtocolError::close_code`];
/// the session sends that code in its close frame before tearing down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode 0x{0:X}")]
    UnknownOpcode(u8),

    #[error("non-zero RSV bits without negotiated extensions")]
    ReservedBits,

    #[error("client frame is not masked")]
    UnmaskedFrame,

    #[error("control frame must not be fragmented")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes exceeds the 125-byte limit")]
    OversizedControl(usize),

    #[error("64-bit payload length has the most significant bit set")]
    LengthMsbSet,

    #[error("frame payload of {len} bytes exceeds the maximum frame size {max}")]
    FrameTooLarge { len: u64, max: usize },

    #[error("reassembled message exceeds the buffer limit of {max} bytes")]
    MessageTooLarge { max: usize },

    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    MessageInterleaved,

    #[error("text message payload is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    /// The close status code a session sends when it answers this error
    /// (RFC 6455 Section 7.4.1).
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MessageTooLarge { .. } | Self::FrameTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            Self::InvalidUtf8 => CloseCode::INVALID_PAYLOAD,
            _ => CloseCode::PROTOCOL_ERROR,
        }
    }
}

/// A failed HTTP upgrade (RFC 6455 Section 4.2.1).
///
/// Strictly one-pass: any of these fails the handshake, the container
/// answers `400 Bad Request`, and the connection is closed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    #[error("method {0:?} is not supported (must be GET)")]
    UnsupportedMethod(String),

    #[error("protocol version {0:?} is not supported (must be HTTP/1.1)")]
    UnsupportedVersion(String),

    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),

    #[error("connection closed before the upgrade request was complete")]
    UnexpectedEof,

    #[error("i/o failure during handshake: {0}")]
    Io(#[from] io::Error),
}

/// Endpoint registration failure. Does not affect running sessions.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("an endpoint is already registered at {0:?}")]
    DuplicateEndpoint(String),

    #[error("invalid endpoint path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

/// Top-level error type exposed at the crate boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("session is closed")]
    SessionClosed,
}
