//! TCP server side of the bus: accepts connections, runs the version-1
//! handshake over each, then attaches the negotiated peer to a bus (§4.7,
//! §4.8).

pub mod basic_connection;
pub mod bus_connection;
pub mod handshake;
pub mod socket;

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::bus::Bus;
use crate::error::TransportError;
use crate::handshake::HandshakeCodec;
use crate::message::registry::MessageRegistry;

pub use basic_connection::BasicServerConnection;
pub use bus_connection::NetworkBusConnection;
pub use handshake::HandshakeHandler;
pub use socket::{SocketListener, TcpSocketDataHandler};

/// Binds a listener and, for every accepted socket, runs the handshake and
/// attaches the resulting connection to `bus`. Each accepted socket gets
/// exactly one [`BasicServerConnection`]/[`NetworkBusConnection`] pair built
/// once at handshake completion, so the "duplicate connect is a no-op"
/// invariant from the connection API holds by construction: there is no
/// code path that could call `connect` twice for the same socket.
pub struct ServerBus<P: HandshakeCodec> {
    bus: Arc<dyn Bus>,
    registry: Arc<MessageRegistry<P>>,
    read_buffer_size: usize,
    stop: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: HandshakeCodec + 'static> ServerBus<P> {
    pub fn new(bus: Arc<dyn Bus>, registry: Arc<MessageRegistry<P>>, read_buffer_size: usize) -> Self {
        Self {
            bus,
            registry,
            read_buffer_size,
            stop: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
        }
    }

    /// Binds `addr` and starts accepting in a background thread. May only
    /// be called once.
    pub fn start(self: &Arc<Self>, addr: &str) -> Result<std::net::SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr)?;
        let bound = listener.local_addr()?;
        info!(%bound, "server bus listening");
        let server = self.clone();
        let handle = thread::spawn(move || server.accept_loop(listener));
        *self.accept_thread.lock().unwrap() = Some(handle);
        Ok(bound)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    // `stop` only takes effect between accepted connections; a blocking
    // `accept()` with nothing incoming doesn't notice it until the next one
    // arrives. Acceptable for a bus that's expected to stay up for the
    // process lifetime; callers that need prompt shutdown should connect a
    // throwaway socket to unblock it.
    fn accept_loop(&self, listener: TcpListener) {
        for incoming in listener.incoming() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            match incoming {
                Ok(stream) => self.handle_accepted(stream),
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }
    }

    fn handle_accepted(&self, stream: TcpStream) {
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let result = HandshakeHandler::start(stream, self.read_buffer_size, registry.clone(), {
            move |client_type, client_instance, socket| {
                let node = BasicServerConnection::new(client_type, client_instance, registry.clone(), socket.clone());
                let attached = NetworkBusConnection::attach(node.clone(), bus.clone());
                socket.set_listener(Arc::new(AttachedSocketListener { node, attached }));
            }
        });
        if let Err(err) = result {
            warn!(error = %err, "failed to start handshake for accepted socket");
        }
    }
}

/// Bridges [`SocketListener`] events, once the handshake hands off, to the
/// pair that owns this socket's application traffic.
struct AttachedSocketListener<P: HandshakeCodec> {
    node: Arc<BasicServerConnection<P>>,
    attached: Arc<NetworkBusConnection<P>>,
}

impl<P: HandshakeCodec + 'static> SocketListener for AttachedSocketListener<P> {
    fn data_received(&self, bytes: &[u8]) {
        self.node.data_received(bytes);
    }

    fn socket_closed(&self) {
        self.node.socket_closed();
        self.attached.detach();
    }
}
