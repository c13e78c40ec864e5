//! Embeddable RFC 6455 WebSocket server engine.
//!
//! Tidal accepts TCP connections, negotiates the HTTP/1.1 upgrade
//! handshake, and runs one blocking session per connection: frames are
//! decoded, fragmented messages reassembled, pings answered, and complete
//! messages handed to the [`Endpoint`] registered under the request path.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidal::{Container, Endpoint, Message, ServerConfig, Session};
//!
//! struct Echo;
//!
//! impl Endpoint for Echo {
//!     fn on_message(&self, session: &Arc<Session>, message: Message) {
//!         let _ = session.send(message);
//!     }
//! }
//!
//! let container = Arc::new(Container::with_config(ServerConfig::default()));
//! container.register_endpoint("/echo", Arc::new(Echo)).unwrap();
//! container.listen_on(9001).unwrap(); // blocks until container.close()
//! ```
//!
//! The engine is deliberately synchronous: one thread per connection, plain
//! `std::net` sockets, no async runtime. TLS slots in through
//! [`SocketFactory`] without touching the protocol code.

pub mod close;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod session;

pub use close::{CloseCode, CloseReason};
pub use config::ServerConfig;
pub use endpoint::{Endpoint, Message};
pub use error::{Error, HandshakeError, ProtocolError, RegistryError, Result};
pub use frame::{Frame, Opcode};
pub use handshake::{BasicHandshake, HandshakeHandler, HttpRequest};
pub use registry::EndpointRegistry;
pub use server::{Container, Duplex, PlainSocketFactory, SocketFactory, StreamControl};
pub use session::Session;
