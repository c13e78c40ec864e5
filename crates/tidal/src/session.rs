//! One live, handshaken connection.
//!
//! A session binds the socket, the frame codec, and the owning endpoint
//! together. The receive loop runs on the connection's own thread and is the
//! sole owner of the read half and the reassembly buffer; `close()` may be
//! called from any thread and only flips the state machine and writes the
//! close frame.
//!
//! Reads carry a short poll timeout so the loop can observe a cross-thread
//! `close()` and enforce the close-handshake deadline. `WouldBlock` /
//! `TimedOut` wakeups simply re-enter the read; ordinary traffic is never
//! timed out.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::close::{
    decode_close_payload, encode_close_payload, send_close, CloseCode, CloseReason,
};
use crate::config::ServerConfig;
use crate::endpoint::{Endpoint, Message};
use crate::error::{Error, ProtocolError, Result};
use crate::frame::{read_frame, write_frame, Opcode};
use crate::server::StreamControl;

/// Session identifiers are process-wide monotonic and never reused.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Why the receive loop ended. Converted into callbacks and teardown by
/// [`Session::finish`]; keeping it a value guarantees each session reports
/// exactly once.
enum Outcome {
    /// Peer sent a close frame first; we echoed its status code.
    PeerClose(CloseReason),
    /// We initiated the close and the handshake completed (echo or EOF).
    LocalClose(CloseReason),
    /// The connection failed without a close handshake.
    Abnormal(CloseReason),
    /// The peer violated the framing rules.
    Protocol(ProtocolError),
    /// The peer never answered our close frame within the deadline.
    CloseTimeout,
}

/// A live WebSocket session.
pub struct Session {
    id: u64,
    endpoint: Arc<dyn Endpoint>,
    writer: Mutex<Box<dyn Write + Send>>,
    control: Box<dyn StreamControl>,
    state: AtomicU8,
    max_frame_size: usize,
    max_buffer_size: AtomicUsize,
    close_timeout: Duration,
    /// The reason passed to our own `close()`, reported once the handshake
    /// completes. Set before the close frame is written.
    initiated_reason: Mutex<Option<CloseReason>>,
    /// Set when `close()` starts the handshake; past this instant the
    /// receive loop stops waiting for the peer's echo.
    close_deadline: Mutex<Option<Instant>>,
}

/// Wraps the session reader for the duration of one frame.
///
/// Poll wakeups (`WouldBlock`/`TimedOut`) are surfaced only while no byte of
/// the current frame has been consumed. Once a frame has begun they are
/// absorbed and the read retried, so a peer may stall mid-frame for any
/// length of time without the frame being torn and its remaining bytes
/// parsed as a new header. While the session is closing, retries stop at
/// the close deadline.
struct FrameReader<'a, R: Read> {
    inner: &'a mut R,
    session: &'a Session,
    started: bool,
}

impl<R: Read> Read for FrameReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Ok(n) => {
                    if n > 0 {
                        self.started = true;
                    }
                    return Ok(n);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if !self.started || self.session.past_close_deadline() {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Session {
    /// Create a session over an upgraded connection. The write half and the
    /// control handle come from the container's socket factory; the read
    /// half is handed to [`Session::run`] separately so the receive loop
    /// owns it exclusively.
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        writer: Box<dyn Write + Send>,
        control: Box<dyn StreamControl>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            endpoint,
            writer: Mutex::new(writer),
            control,
            state: AtomicU8::new(STATE_OPEN),
            max_frame_size: config.max_frame_size,
            max_buffer_size: AtomicUsize::new(config.max_buffer_size),
            close_timeout: config.close_timeout,
            initiated_reason: Mutex::new(None),
            close_deadline: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.state() == STATE_CLOSED
    }

    pub fn is_closing(&self) -> bool {
        self.state() == STATE_CLOSING
    }

    /// Current bound on in-memory reassembly of fragmented messages.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.load(Ordering::SeqCst)
    }

    pub fn set_max_buffer_size(&self, limit: usize) {
        self.max_buffer_size.store(limit, Ordering::SeqCst);
    }

    /// Send a complete message as a single unmasked frame.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.state() != STATE_OPEN {
            return Err(Error::SessionClosed);
        }
        let opcode = message.opcode();
        let payload = message.into_payload();
        self.write(opcode, &payload)?;
        Ok(())
    }

    /// Send a ping. The peer's pong is surfaced via
    /// [`Endpoint::on_pong`](crate::endpoint::Endpoint::on_pong).
    pub fn send_ping(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > 125 {
            return Err(ProtocolError::OversizedControl(payload.len()).into());
        }
        if self.state() != STATE_OPEN {
            return Err(Error::SessionClosed);
        }
        self.write(Opcode::Ping, payload)?;
        Ok(())
    }

    /// Begin the close handshake: send one close frame and mark the session
    /// closing. Safe to call from any thread; calls after the first are
    /// no-ops. The receive loop completes the handshake when the peer's
    /// echo arrives (or forces teardown after the close timeout).
    pub fn close(&self, reason: CloseReason) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_OPEN,
                STATE_CLOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(());
        }
        *self.initiated_reason.lock() = Some(reason.clone());
        *self.close_deadline.lock() = Some(Instant::now() + self.close_timeout);
        debug!(session = self.id, code = reason.code, "closing session");
        let mut writer = self.writer.lock();
        send_close(&mut **writer, reason.code, &reason.reason)?;
        Ok(())
    }

    /// Drive the receive loop to completion. Blocks until the session is
    /// torn down; callbacks fire on the calling thread.
    pub fn run<R: Read>(self: &Arc<Self>, mut reader: R) {
        let outcome = self.receive_loop(&mut reader);
        self.finish(outcome);
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    fn write(&self, opcode: Opcode, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock();
        write_frame(&mut **writer, opcode, payload, true)
    }

    fn past_close_deadline(&self) -> bool {
        self.close_deadline
            .lock()
            .map_or(false, |deadline| Instant::now() >= deadline)
    }

    fn initiated_reason(&self) -> CloseReason {
        self.initiated_reason
            .lock()
            .clone()
            .unwrap_or_else(CloseReason::normal)
    }

    fn receive_loop<R: Read>(self: &Arc<Self>, reader: &mut R) -> Outcome {
        let mut reassembly: Vec<u8> = Vec::new();
        let mut pending: Option<Opcode> = None;

        loop {
            match self.state() {
                STATE_CLOSED => return Outcome::LocalClose(self.initiated_reason()),
                STATE_CLOSING if self.past_close_deadline() => return Outcome::CloseTimeout,
                _ => {}
            }

            let mut frame_reader = FrameReader {
                inner: &mut *reader,
                session: self.as_ref(),
                started: false,
            };
            let result = read_frame(&mut frame_reader, self.max_frame_size);
            let mid_frame = frame_reader.started;

            let frame = match result {
                Ok(frame) => frame,
                Err(Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    if !mid_frame {
                        // Idle poll wakeup at a frame boundary: re-check
                        // state, then keep reading.
                        continue;
                    }
                    // FrameReader only lets a wakeup escape mid-frame once
                    // the close deadline has passed.
                    return Outcome::CloseTimeout;
                }
                Err(Error::Io(e)) => {
                    if self.state() == STATE_CLOSING {
                        // Peer dropped the connection instead of echoing our
                        // close frame; the close still completed.
                        return Outcome::LocalClose(self.initiated_reason());
                    }
                    return Outcome::Abnormal(CloseReason::abnormal(e.to_string()));
                }
                Err(Error::Protocol(violation)) => return Outcome::Protocol(violation),
                Err(other) => return Outcome::Abnormal(CloseReason::abnormal(other.to_string())),
            };

            trace!(session = self.id, opcode = ?frame.opcode, len = frame.payload.len(), "frame received");

            // Client-to-server frames must carry the mask (RFC 6455
            // Section 5.1).
            if !frame.masked {
                return Outcome::Protocol(ProtocolError::UnmaskedFrame);
            }

            match frame.opcode {
                Opcode::Ping => {
                    // Answered in place with the identical payload; the
                    // endpoint is not involved.
                    if self.state() == STATE_CLOSING {
                        continue;
                    }
                    if let Err(e) = self.write(Opcode::Pong, &frame.payload) {
                        return Outcome::Abnormal(CloseReason::abnormal(e.to_string()));
                    }
                }
                Opcode::Pong => {
                    self.endpoint.on_pong(self, &frame.payload);
                }
                Opcode::Close => {
                    if self.state() == STATE_CLOSING {
                        // The echo we were waiting for.
                        return Outcome::LocalClose(self.initiated_reason());
                    }
                    let peer = decode_close_payload(&frame.payload);
                    // Echo the peer's status code back (empty echo when the
                    // peer sent none), completing the handshake it started.
                    let echo = if peer.code == CloseCode::NO_STATUS {
                        Vec::new()
                    } else {
                        encode_close_payload(peer.code, "")
                    };
                    let _ = self.write(Opcode::Close, &echo);
                    return Outcome::PeerClose(peer);
                }
                Opcode::Text | Opcode::Binary => {
                    if self.state() == STATE_CLOSING {
                        continue;
                    }
                    if pending.is_some() {
                        return Outcome::Protocol(ProtocolError::MessageInterleaved);
                    }
                    let limit = self.max_buffer_size();
                    if frame.payload.len() > limit {
                        return Outcome::Protocol(ProtocolError::MessageTooLarge { max: limit });
                    }
                    if frame.fin {
                        if let Err(violation) = self.deliver(frame.opcode, frame.payload) {
                            return Outcome::Protocol(violation);
                        }
                    } else {
                        pending = Some(frame.opcode);
                        reassembly = frame.payload;
                    }
                }
                Opcode::Continuation => {
                    if self.state() == STATE_CLOSING {
                        continue;
                    }
                    let Some(opcode) = pending else {
                        return Outcome::Protocol(ProtocolError::UnexpectedContinuation);
                    };
                    let limit = self.max_buffer_size();
                    if reassembly.len() + frame.payload.len() > limit {
                        return Outcome::Protocol(ProtocolError::MessageTooLarge { max: limit });
                    }
                    reassembly.extend_from_slice(&frame.payload);
                    if frame.fin {
                        pending = None;
                        let payload = std::mem::take(&mut reassembly);
                        if let Err(violation) = self.deliver(opcode, payload) {
                            return Outcome::Protocol(violation);
                        }
                    }
                }
            }
        }
    }

    /// Hand a complete message to the endpoint. Text payloads must be valid
    /// UTF-8 (RFC 6455 Section 5.6).
    fn deliver(
        self: &Arc<Self>,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> std::result::Result<(), ProtocolError> {
        let message = match opcode {
            Opcode::Text => match String::from_utf8(payload) {
                Ok(text) => Message::Text(text),
                Err(_) => return Err(ProtocolError::InvalidUtf8),
            },
            _ => Message::Binary(payload),
        };
        self.endpoint.on_message(self, message);
        Ok(())
    }

    /// Turn the loop outcome into teardown plus exactly one report to the
    /// endpoint: `on_error` for protocol violations, `on_close` otherwise.
    fn finish(self: &Arc<Self>, outcome: Outcome) {
        match outcome {
            Outcome::Protocol(violation) => {
                let code = violation.close_code();
                {
                    let mut writer = self.writer.lock();
                    let _ = send_close(&mut **writer, code, &violation.to_string());
                }
                self.teardown();
                warn!(session = self.id, code, error = %violation, "protocol violation; session terminated");
                self.endpoint.on_error(self, &Error::Protocol(violation));
            }
            Outcome::PeerClose(reason) => {
                self.teardown();
                debug!(session = self.id, code = reason.code, "peer closed session");
                self.endpoint.on_close(self, &reason);
            }
            Outcome::LocalClose(reason) => {
                self.teardown();
                debug!(session = self.id, code = reason.code, "close handshake completed");
                self.endpoint.on_close(self, &reason);
            }
            Outcome::Abnormal(reason) => {
                self.teardown();
                debug!(session = self.id, detail = %reason.reason, "abnormal closure");
                self.endpoint.on_close(self, &reason);
            }
            Outcome::CloseTimeout => {
                self.teardown();
                warn!(session = self.id, "peer never answered close frame; forcing teardown");
                self.endpoint
                    .on_close(self, &CloseReason::abnormal("close handshake timed out"));
            }
        }
    }

    fn teardown(&self) {
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        self.control.shutdown();
    }

    /// Last-resort teardown after an endpoint callback panicked: best-effort
    /// close frame with 1011, then shut the socket.
    pub(crate) fn fail_internal(self: &Arc<Self>) {
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return;
        }
        {
            let mut writer = self.writer.lock();
            let _ = send_close(&mut **writer, CloseCode::INTERNAL_ERROR, "internal error");
        }
        self.control.shutdown();
        self.endpoint.on_close(
            self,
            &CloseReason::new(CloseCode::INTERNAL_ERROR, "internal error"),
        );
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state.load(Ordering::SeqCst))
            .finish()
    }
}
