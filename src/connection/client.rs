//! TCP client connection (§4.6): a node-side [`Connection`] over a socket.
//!
//! `Client` is a thin abstraction over the socket so the connection logic
//! (registry lookups, handshake interception, listener fan-out) can be unit
//! tested against a fake transport; [`TcpClient`] is the real implementation.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, warn};

use super::{Connection, MessageListener};
use crate::codec::Protocol;
use crate::error::{AddressingError, CommError, LifecycleError, TransportError};
use crate::handshake::{HandshakeResponseMessageV1, HANDSHAKE_INIT_TYPE, HANDSHAKE_RESPONSE_TYPE};
use crate::message::registry::MessageRegistry;
use crate::message::{DataMessage, Message, Packet};

/// A socket-like transport: send bytes, report whether it's still alive, and
/// be told to stop. Implemented by [`TcpClient`] for real use and by fakes
/// in tests.
pub trait Client: Send + Sync {
    fn is_connected(&self) -> bool;
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;
    fn close(&self);
}

/// Blocking-read TCP transport. The reader thread uses a bounded read
/// timeout plus a stop flag rather than signal-based interruption, so it
/// notices a close request within one timeout interval (§9).
pub struct TcpClient {
    stream: TcpStream,
    stop: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl TcpClient {
    /// Connects to `addr` and spawns a dedicated reader thread that invokes
    /// `on_receive` once per read (one read, one message, per §6 framing).
    pub fn connect(
        addr: SocketAddr,
        read_buffer_size: usize,
        on_receive: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        let reader_stream = stream.try_clone()?;

        let stop = Arc::new(AtomicBool::new(false));
        let client = Arc::new(Self {
            stream,
            stop: stop.clone(),
            reader: Mutex::new(None),
        });

        let handle = thread::spawn(move || {
            Self::read_loop(reader_stream, read_buffer_size, stop, on_receive);
        });
        *client.reader.lock().unwrap() = Some(handle);
        Ok(client)
    }

    fn read_loop(
        mut stream: TcpStream,
        buffer_size: usize,
        stop: Arc<AtomicBool>,
        on_receive: impl Fn(&[u8]),
    ) {
        let mut buf = vec![0u8; buffer_size];
        while !stop.load(Ordering::SeqCst) {
            match stream.read(&mut buf) {
                Ok(0) => {
                    // End-of-stream is a transport-level close (§4.8).
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(n) => on_receive(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "transport read failed, closing connection");
                    stop.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }
}

impl Client for TcpClient {
    fn is_connected(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        (&self.stream).write_all(bytes)?;
        Ok(())
    }

    fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

enum State {
    Unregistered,
    Disconnected(SocketAddr),
    Connected(SocketAddr, Arc<dyn Client>),
}

/// Node-side TCP connection. `(conn_type, conn_instance)` are the
/// coordinates this client asks the server to assign it during the
/// handshake, sent back in `HandshakeResponseMessageV1`.
pub struct ClientConnection<P: Protocol> {
    conn_type: i32,
    conn_instance: i32,
    registry: Arc<MessageRegistry<P>>,
    read_buffer_size: usize,
    state: Mutex<State>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    self_handle: Weak<ClientConnection<P>>,
}

impl<P: Protocol> ClientConnection<P> {
    pub fn new(
        conn_type: i32,
        conn_instance: i32,
        registry: Arc<MessageRegistry<P>>,
        read_buffer_size: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            conn_type,
            conn_instance,
            registry,
            read_buffer_size,
            state: Mutex::new(State::Unregistered),
            listeners: Mutex::new(Vec::new()),
            self_handle: weak.clone(),
        })
    }

    /// Records the server address this connection will dial on `connect()`.
    /// May only be called once per connection.
    pub fn register_endpoint(&self, addr: SocketAddr) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Unregistered => {
                *state = State::Disconnected(addr);
                Ok(())
            }
            _ => Err(LifecycleError::AlreadyRegistered),
        }
    }

    fn handle_inbound(&self, bytes: &[u8]) {
        let packet = match self.registry.deserialize_packet(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "dropping inbound packet that failed to decode");
                return;
            }
        };

        if packet.message().message_type() == HANDSHAKE_INIT_TYPE {
            let response = HandshakeResponseMessageV1 {
                client_type: self.conn_type,
                client_instance: self.conn_instance,
            };
            if let Err(err) = self.send_message(
                Box::new(DataMessage::new(HANDSHAKE_RESPONSE_TYPE, response)),
                0,
                0,
            ) {
                error!(error = %err, "failed to send handshake response");
            }
            return;
        }

        for listener in self.listeners.lock().unwrap().iter() {
            listener.message_received(&packet);
        }
    }

    fn send_internal(&self, packet: Packet) -> Result<bool, CommError> {
        // Unlike the local connection, a disconnected client connection is a
        // transport error, not a quiet `Ok(false)` (§4.6).
        let client = match &*self.state.lock().unwrap() {
            State::Connected(_, client) => client.clone(),
            _ => return Err(TransportError::NotConnected.into()),
        };
        let message_type = packet.message().message_type();
        if !self.registry.is_registered(message_type) {
            return Err(AddressingError::UnregisteredType(message_type.to_string()).into());
        }
        let out = self.registry.serialize_packet(&packet)?;
        client.send(out.as_bytes())?;
        Ok(true)
    }
}

impl<P: Protocol> Connection for ClientConnection<P> {
    fn connection_type(&self) -> i32 {
        self.conn_type
    }

    fn connection_instance(&self) -> i32 {
        self.conn_instance
    }

    fn is_connected(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Connected(_, _))
    }

    fn connect(&self) -> Result<bool, CommError> {
        let addr = match &*self.state.lock().unwrap() {
            State::Unregistered => return Err(LifecycleError::NotRegistered.into()),
            State::Connected(_, _) => return Ok(true),
            State::Disconnected(addr) => *addr,
        };

        let weak = self.self_handle.clone();
        let client = TcpClient::connect(addr, self.read_buffer_size, move |bytes| {
            if let Some(strong) = weak.upgrade() {
                strong.handle_inbound(bytes);
            }
        })?;
        *self.state.lock().unwrap() = State::Connected(addr, client);
        Ok(true)
    }

    fn disconnect(&self) -> Result<bool, CommError> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, State::Unregistered) {
            State::Unregistered => {
                *state = State::Unregistered;
                Err(LifecycleError::NotRegistered.into())
            }
            State::Connected(addr, client) => {
                client.close();
                *state = State::Disconnected(addr);
                Ok(true)
            }
            disconnected @ State::Disconnected(_) => {
                *state = disconnected;
                Ok(true)
            }
        }
    }

    fn send_message(
        &self,
        message: Box<dyn Message>,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Result<bool, CommError> {
        self.send_internal(Packet::new(message, recipient_type, recipient_instance))
    }

    fn send_packet(&self, packet: Packet) -> Result<bool, CommError> {
        self.send_internal(packet)
    }

    fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(pos) = listeners.iter().position(|l| Arc::ptr_eq(l, listener)) {
            listeners.remove(pos);
        }
    }
}
