//! Close handshake support (RFC 6455 Sections 5.5.1 and 7.4).
//!
//! Close frames carry an optional payload: a 2-byte big-endian status code
//! followed by a UTF-8 reason. This module owns the status-code constants
//! and the payload encode/decode, plus a helper to emit a close frame.

use std::io::Write;

use crate::frame::{write_frame, Opcode};

/// Well-known close status codes per RFC 6455 Section 7.4.1.
pub struct CloseCode;

impl CloseCode {
    /// Normal closure (1000).
    pub const NORMAL: u16 = 1000;
    /// Going away (1001) -- sent to every session on container shutdown.
    pub const GOING_AWAY: u16 = 1001;
    /// Protocol error (1002) -- malformed frames, reserved bits, unknown opcodes.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// No status code present (1005) -- never sent on the wire; reported
    /// when a peer's close frame had an empty payload.
    pub const NO_STATUS: u16 = 1005;
    /// Abnormal closure (1006) -- never sent on the wire; reported when the
    /// connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;
    /// Invalid frame payload data (1007) -- text frames that are not UTF-8.
    pub const INVALID_PAYLOAD: u16 = 1007;
    /// Message too big (1009) -- reassembly exceeded the session buffer limit.
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    /// Internal server error (1011) -- an endpoint callback panicked.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// The status code and reason attached to a session's closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::NORMAL, "")
    }

    pub fn going_away() -> Self {
        Self::new(CloseCode::GOING_AWAY, "server going down")
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CloseCode::ABNORMAL, reason)
    }
}

/// Decode a close frame payload into a [`CloseReason`].
///
/// A payload shorter than 2 bytes has no status code; per RFC 6455
/// Section 7.4.1 that is reported as 1005 with an empty reason.
pub fn decode_close_payload(payload: &[u8]) -> CloseReason {
    if payload.len() >= 2 {
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
        CloseReason { code, reason }
    } else {
        CloseReason::new(CloseCode::NO_STATUS, "")
    }
}

/// Encode a status code and reason as a close frame payload.
///
/// The reason is truncated at a character boundary so the total payload
/// stays within the 125-byte control frame limit (2 bytes code + 123
/// bytes reason).
pub fn encode_close_payload(code: u16, reason: &str) -> Vec<u8> {
    const MAX_REASON_LEN: usize = 123;
    let mut cut = reason.len().min(MAX_REASON_LEN);
    while !reason.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut payload = Vec::with_capacity(2 + cut);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..cut]);
    payload
}

/// Write a close frame with the given status code and reason.
pub fn send_close<W: Write + ?Sized>(writer: &mut W, code: u16, reason: &str) -> std::io::Result<()> {
    let payload = encode_close_payload(code, reason);
    write_frame(writer, Opcode::Close, &payload, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_frame;
    use std::io::Cursor;

    #[test]
    fn test_decode_code_and_reason() {
        let reason = decode_close_payload(&[0x03, 0xE8, b'o', b'k']);
        assert_eq!(reason.code, 1000);
        assert_eq!(reason.reason, "ok");
    }

    #[test]
    fn test_decode_empty_payload_is_1005() {
        let reason = decode_close_payload(&[]);
        assert_eq!(reason.code, CloseCode::NO_STATUS);
        assert_eq!(reason.reason, "");
    }

    #[test]
    fn test_decode_code_only() {
        let reason = decode_close_payload(&[0x03, 0xE9]);
        assert_eq!(reason.code, 1001);
        assert_eq!(reason.reason, "");
    }

    #[test]
    fn test_encode_roundtrip() {
        let payload = encode_close_payload(1000, "bye");
        assert_eq!(payload, vec![0x03, 0xE8, b'b', b'y', b'e']);
        let reason = decode_close_payload(&payload);
        assert_eq!(reason, CloseReason::new(1000, "bye"));
    }

    #[test]
    fn test_encode_truncates_long_reason() {
        let long = "x".repeat(200);
        let payload = encode_close_payload(1000, &long);
        assert_eq!(payload.len(), 125, "2-byte code + 123-byte reason cap");
    }

    #[test]
    fn test_encode_truncates_at_char_boundary() {
        // 62 two-byte chars = 124 bytes of reason; the 123-byte cap falls
        // mid-character and must back off to 122.
        let reason = "é".repeat(62);
        let payload = encode_close_payload(1000, &reason);
        assert_eq!(payload.len(), 124);
        assert!(String::from_utf8(payload[2..].to_vec()).is_ok());
    }

    #[test]
    fn test_send_close_writes_close_frame() {
        let mut buf = Vec::new();
        send_close(&mut buf, CloseCode::GOING_AWAY, "server going down").unwrap();
        let frame = read_frame(&mut Cursor::new(buf), 1024).unwrap();
        assert_eq!(frame.opcode, crate::frame::Opcode::Close);
        let reason = decode_close_payload(&frame.payload);
        assert_eq!(reason.code, 1001);
        assert_eq!(reason.reason, "server going down");
    }
}
