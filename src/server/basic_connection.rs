//! The `IConnection` wrapper around an already-connected server-side socket
//! (§4.8, first half: "wraps the socket as an `IConnection`").

use std::sync::{Arc, Mutex};

use tracing::warn;

use super::socket::{SocketListener, TcpSocketDataHandler};
use crate::codec::Protocol;
use crate::connection::client::Client;
use crate::connection::{Connection, MessageListener};
use crate::error::{AddressingError, CommError, TransportError};
use crate::message::registry::MessageRegistry;
use crate::message::{Message, Packet};

/// A `Connection` whose transport is a socket the server already accepted
/// (and already handshook): there is no separate dial step, so `connect`/
/// `disconnect` only toggle whether sends are accepted, they never touch the
/// socket itself.
pub struct BasicServerConnection<P: Protocol> {
    conn_type: i32,
    conn_instance: i32,
    registry: Arc<MessageRegistry<P>>,
    socket: Arc<TcpSocketDataHandler>,
    active: Mutex<bool>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
}

impl<P: Protocol> BasicServerConnection<P> {
    pub fn new(
        conn_type: i32,
        conn_instance: i32,
        registry: Arc<MessageRegistry<P>>,
        socket: Arc<TcpSocketDataHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            conn_type,
            conn_instance,
            registry,
            socket,
            active: Mutex::new(true),
            listeners: Mutex::new(Vec::new()),
        })
    }
}

impl<P: Protocol> Connection for BasicServerConnection<P> {
    fn connection_type(&self) -> i32 {
        self.conn_type
    }

    fn connection_instance(&self) -> i32 {
        self.conn_instance
    }

    fn is_connected(&self) -> bool {
        *self.active.lock().unwrap() && self.socket.is_connected()
    }

    fn connect(&self) -> Result<bool, CommError> {
        *self.active.lock().unwrap() = true;
        Ok(true)
    }

    fn disconnect(&self) -> Result<bool, CommError> {
        *self.active.lock().unwrap() = false;
        self.socket.close();
        Ok(true)
    }

    fn send_message(
        &self,
        message: Box<dyn Message>,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Result<bool, CommError> {
        self.send_packet(Packet::new(message, recipient_type, recipient_instance))
    }

    fn send_packet(&self, packet: Packet) -> Result<bool, CommError> {
        if !*self.active.lock().unwrap() {
            return Err(TransportError::NotConnected.into());
        }
        let message_type = packet.message().message_type();
        if !self.registry.is_registered(message_type) {
            return Err(AddressingError::UnregisteredType(message_type.to_string()).into());
        }
        let out = self.registry.serialize_packet(&packet)?;
        self.socket.send(out.as_bytes())?;
        Ok(true)
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

impl<P: Protocol> SocketListener for BasicServerConnection<P> {
    fn data_received(&self, bytes: &[u8]) {
        let packet = match self.registry.deserialize_packet(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "dropping inbound packet that failed to decode");
                return;
            }
        };
        for listener in self.listeners.lock().unwrap().iter() {
            listener.message_received(&packet);
        }
    }

    fn socket_closed(&self) {
        *self.active.lock().unwrap() = false;
    }
}
