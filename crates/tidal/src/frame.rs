//! WebSocket frame codec (RFC 6455 Section 5.2-5.3).
//!
//! The lowest layer of the engine: parses and writes single frames over any
//! blocking byte stream. Fragmentation reassembly lives one layer up in the
//! session; this module only enforces per-frame rules.
//!
//! - [`read_frame`]: Parse one frame, unmasking client payloads in place
//! - [`write_frame`]: Write one unmasked server frame with minimal length encoding
//! - [`apply_mask`]: Symmetric XOR masking per RFC 6455 Section 5.3

use std::io::{Read, Write};

use crate::error::{Error, ProtocolError, Result};

/// Frame opcodes per RFC 6455 Section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse a 4-bit opcode value. Reserved opcodes (0x3-0x7, 0xB-0xF) are
    /// a protocol error answered with close code 1002.
    pub fn from_u8(byte: u8) -> std::result::Result<Opcode, ProtocolError> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    /// Close, ping and pong are control opcodes (high bit of the nibble set).
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Text and binary open a new message; continuation extends one.
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

/// One parsed frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit -- `true` if this is the final fragment of a message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Whether the wire frame carried a masking key. Client-to-server
    /// frames must; the session enforces it (RFC 6455 Section 5.1).
    pub masked: bool,
    /// Unmasked payload bytes; length always equals the declared length.
    pub payload: Vec<u8>,
}

/// Apply or remove the 4-byte XOR mask (RFC 6455 Section 5.3).
///
/// Symmetric: applying the mask twice restores the original bytes.
pub fn apply_mask(payload: &mut [u8], key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Parse one frame from the stream.
///
/// Handles all three payload length encodings (7-bit, 16-bit, 64-bit) and
/// XOR unmasking of client-to-server frames. `max_frame_size` caps the
/// declared length before any allocation happens, so a hostile 64-bit
/// length cannot exhaust memory. Uses `read_exact` throughout -- the
/// declared length must be fully read before a frame is yielded.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_frame_size: usize) -> Result<Frame> {
    // Byte 0: FIN(1) RSV(3) Opcode(4)
    // Byte 1: MASK(1) Payload-Length(7)
    let mut header = [0u8; 2];
    reader.read_exact(&mut header)?;

    let fin = (header[0] & 0x80) != 0;
    let rsv = (header[0] >> 4) & 0x07;
    if rsv != 0 {
        return Err(ProtocolError::ReservedBits.into());
    }
    let opcode = Opcode::from_u8(header[0] & 0x0F).map_err(Error::Protocol)?;

    let masked = (header[1] & 0x80) != 0;
    let length_byte = header[1] & 0x7F;

    let payload_len: u64 = match length_byte {
        0..=125 => u64::from(length_byte),
        126 => {
            let mut buf = [0u8; 2];
            reader.read_exact(&mut buf)?;
            u64::from(u16::from_be_bytes(buf))
        }
        127 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            let len = u64::from_be_bytes(buf);
            if len >> 63 != 0 {
                return Err(ProtocolError::LengthMsbSet.into());
            }
            len
        }
        _ => unreachable!(),
    };

    if payload_len > max_frame_size as u64 {
        return Err(ProtocolError::FrameTooLarge {
            len: payload_len,
            max: max_frame_size,
        }
        .into());
    }

    // Control frames must not be fragmented and carry at most 125 bytes
    // (RFC 6455 Section 5.5).
    if opcode.is_control() {
        if !fin {
            return Err(ProtocolError::FragmentedControl.into());
        }
        if payload_len > 125 {
            return Err(ProtocolError::OversizedControl(payload_len as usize).into());
        }
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload)?;
    }

    if let Some(key) = mask_key {
        apply_mask(&mut payload, &key);
    }

    Ok(Frame {
        fin,
        opcode,
        masked,
        payload,
    })
}

/// Write one server-to-client frame.
///
/// Server frames are never masked (RFC 6455 Section 5.1). The length field
/// uses the smallest encoding that fits the payload: 7-bit up to 125 bytes,
/// 16-bit up to 65535, 64-bit beyond.
pub fn write_frame<W: Write + ?Sized>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
    fin: bool,
) -> std::io::Result<()> {
    let byte0 = if fin { 0x80 } else { 0x00 } | (opcode as u8);

    let len = payload.len();
    if len <= 125 {
        writer.write_all(&[byte0, len as u8])?;
    } else if len <= 65535 {
        writer.write_all(&[byte0, 126])?;
        writer.write_all(&(len as u16).to_be_bytes())?;
    } else {
        writer.write_all(&[byte0, 127])?;
        writer.write_all(&(len as u64).to_be_bytes())?;
    }

    if !payload.is_empty() {
        writer.write_all(payload)?;
    }

    writer.flush()
}
