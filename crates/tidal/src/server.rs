//! Container: listener, accept loop, and session lifecycle.
//!
//! The container owns the endpoint registry and the handshake handler, binds
//! a TCP listener, and runs one thread per connection. Each connection
//! thread performs the HTTP upgrade, then hands the socket to a
//! [`Session`] and drives its receive loop until teardown.
//!
//! Transport security is abstracted behind [`SocketFactory`]: the default
//! [`PlainSocketFactory`] splits a `TcpStream` into read/write halves, and a
//! TLS deployment supplies its own factory wrapping the accepted stream.

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::close::CloseReason;
use crate::config::ServerConfig;
use crate::endpoint::Endpoint;
use crate::error::{RegistryError, Result};
use crate::handshake::{read_request, write_bad_request, BasicHandshake, HandshakeHandler};
use crate::registry::EndpointRegistry;
use crate::session::Session;

// ── Stream abstraction ──────────────────────────────────────────────────

/// Out-of-band control over a connection's underlying socket. The session
/// holds this to force teardown and to arm the receive poll timeout.
pub trait StreamControl: Send + Sync {
    /// Shut the socket down in both directions. Must be callable from any
    /// thread while another thread is blocked reading.
    fn shutdown(&self);

    /// Arm or clear the read timeout used for receive polling.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;
}

impl StreamControl for TcpStream {
    fn shutdown(&self) {
        let _ = TcpStream::shutdown(self, Shutdown::Both);
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// An accepted connection split into independently owned halves. The reader
/// goes to the receive loop, the writer into the session's send path, and
/// the control handle serves cross-thread shutdown.
pub struct Duplex {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub control: Box<dyn StreamControl>,
}

/// Wraps freshly accepted TCP streams into [`Duplex`] halves. The seam for
/// TLS: a TLS factory performs its handshake here and returns encrypted
/// halves.
pub trait SocketFactory: Send + Sync {
    fn wrap(&self, stream: TcpStream) -> std::io::Result<Duplex>;
}

/// Plaintext factory: the halves are `try_clone`d handles onto one socket,
/// so a read timeout armed through the control handle applies to the
/// reader as well.
pub struct PlainSocketFactory;

impl SocketFactory for PlainSocketFactory {
    fn wrap(&self, stream: TcpStream) -> std::io::Result<Duplex> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Duplex {
            reader: Box::new(reader),
            writer: Box::new(writer),
            control: Box::new(stream),
        })
    }
}

// ── Container ───────────────────────────────────────────────────────────

/// A WebSocket server container.
///
/// Typical use: register endpoints, then call [`listen`](Container::listen)
/// from a dedicated thread (it blocks until [`close`](Container::close)).
pub struct Container {
    config: ServerConfig,
    registry: EndpointRegistry,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    handshake: RwLock<Arc<dyn HandshakeHandler>>,
    factory: Box<dyn SocketFactory>,
    shutdown: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Container {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_factory(config, Box::new(PlainSocketFactory))
    }

    /// Build a container over a custom transport (e.g. a TLS factory).
    pub fn with_factory(config: ServerConfig, factory: Box<dyn SocketFactory>) -> Self {
        Self {
            config,
            registry: EndpointRegistry::new(),
            sessions: Mutex::new(HashMap::new()),
            handshake: RwLock::new(Arc::new(BasicHandshake)),
            factory,
            shutdown: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind `endpoint` to `path`. Fails if the path is malformed or already
    /// bound. Callable before or after `listen()`.
    pub fn register_endpoint(
        &self,
        path: &str,
        endpoint: Arc<dyn Endpoint>,
    ) -> std::result::Result<(), RegistryError> {
        self.registry.register(path, endpoint)?;
        debug!(path, "endpoint registered");
        Ok(())
    }

    /// Remove the binding for `path`. Existing sessions on that endpoint
    /// are unaffected; new upgrades for the path are refused.
    pub fn unregister_endpoint(&self, path: &str) -> Option<Arc<dyn Endpoint>> {
        let removed = self.registry.unregister(path);
        if removed.is_some() {
            debug!(path, "endpoint unregistered");
        }
        removed
    }

    /// Replace the handshake handler. Connections accepted after this call
    /// negotiate through the new handler.
    pub fn register_handshake_handler(&self, handler: Arc<dyn HandshakeHandler>) {
        *self.handshake.write() = handler;
    }

    /// The bound listener address, once `listen()` has bound it. Useful
    /// with port 0 to discover the kernel-assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Listen on the configured port. Blocks until [`close`](Container::close).
    pub fn listen(self: &Arc<Self>) -> Result<()> {
        self.listen_on(self.config.port)
    }

    /// Listen on an explicit port (0 asks the kernel for a free one).
    /// Blocks the calling thread, accepting connections and spawning one
    /// handler thread per connection, until [`close`](Container::close).
    pub fn listen_on(self: &Arc<Self>, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        info!(%addr, "listening for websocket upgrades");

        loop {
            let (stream, peer) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            if self.shutdown.load(Ordering::SeqCst) {
                // The wakeup connection from close(); drop it and stop.
                break;
            }
            let container = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name(format!("tidal-conn-{peer}"))
                .spawn(move || container.handle_connection(stream, peer));
            if let Err(e) = spawned {
                warn!(%peer, error = %e, "failed to spawn connection thread");
            }
        }

        info!("accept loop stopped");
        Ok(())
    }

    /// Shut the container down: stop accepting, close every live session
    /// with 1001 (going away), and wait (bounded by the close timeout) for
    /// the session threads to finish their close handshakes. Idempotent.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("container shutting down");

        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.close(CloseReason::going_away()) {
                debug!(session = session.id(), error = %e, "close frame not delivered");
            }
        }

        // Unblock the accept loop with a throwaway connection.
        if let Some(addr) = self.local_addr() {
            let _ = TcpStream::connect(addr);
        }

        // Session threads fire on_close and unregister themselves; give
        // them until the close deadline before giving up the wait.
        let deadline = Instant::now() + self.config.close_timeout + Duration::from_secs(1);
        while !self.sessions.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if !self.sessions.lock().is_empty() {
            warn!(remaining = self.session_count(), "sessions still live after shutdown wait");
        }
    }

    /// Per-connection thread body: upgrade, session, receive loop, cleanup.
    fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let duplex = match self.factory.wrap(stream) {
            Ok(duplex) => duplex,
            Err(e) => {
                debug!(%peer, error = %e, "failed to prepare connection");
                return;
            }
        };
        let Duplex {
            reader,
            mut writer,
            control,
        } = duplex;

        // The BufReader stays with the session: bytes the peer sent right
        // after the headers may already be buffered here. No read timeout
        // is armed yet -- a client may dribble its request arbitrarily
        // slowly without the header read failing mid-line.
        let mut reader = BufReader::new(reader);
        let request = match read_request(&mut reader) {
            Ok(request) => request,
            Err(e) => {
                debug!(%peer, error = %e, "malformed upgrade request");
                let _ = write_bad_request(&mut writer, &e.to_string());
                return;
            }
        };

        let path = request.path().to_string();
        let Some(endpoint) = self.registry.lookup(&path) else {
            debug!(%peer, path, "no endpoint registered; dropping connection");
            return;
        };

        let handler = self.handshake.read().clone();
        if let Err(e) = handler.negotiate(&request, &mut *writer) {
            debug!(%peer, path, error = %e, "handshake refused");
            let _ = write_bad_request(&mut writer, &e.to_string());
            return;
        }

        // The poll timeout serves the session's receive loop only; frame
        // reads recover from it at frame boundaries.
        if let Err(e) = control.set_read_timeout(Some(self.config.read_poll_interval)) {
            debug!(%peer, error = %e, "failed to arm read timeout");
            return;
        }

        let session = Arc::new(Session::new(
            endpoint.clone(),
            writer,
            control,
            &self.config,
        ));
        let id = session.id();
        // Checked under the sessions lock: either close() snapshots this
        // session, or the flag is already visible here and the session
        // starts the going-away handshake itself.
        let shutting_down = {
            let mut sessions = self.sessions.lock();
            sessions.insert(id, session.clone());
            self.shutdown.load(Ordering::SeqCst)
        };
        if shutting_down {
            if let Err(e) = session.close(CloseReason::going_away()) {
                debug!(session = id, error = %e, "close frame not delivered");
            }
        }
        info!(%peer, path, session = id, "session opened");

        // Endpoint code runs on this thread; a panic must not take down
        // the container, only this session (closed with 1011).
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            endpoint.on_connect(&session);
            session.run(reader);
        }));
        if outcome.is_err() {
            error!(session = id, path, "endpoint panicked; session closed with internal error");
            session.fail_internal();
        }

        self.sessions.lock().remove(&id);
        debug!(%peer, session = id, "session finished");
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}
