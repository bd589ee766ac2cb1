//! Server-side version-1 handshake state machine (§4.7).
//!
//! The handler sends `HandshakeInit` immediately, then on a matching
//! `HandshakeResponseV1` sends `HandshakeComplete` and invokes the caller's
//! completion callback with the negotiated `(type, instance)` and the
//! socket. There is no separate terminator/cleanup bookkeeping: the socket's
//! listener slot holds the only strong reference to the handler; once the
//! completion callback swaps that slot to the network bus connection, the
//! handler is reclaimed like any other value (§9).

use std::net::TcpStream;
use std::sync::{Arc, Mutex, Weak};

use tracing::{info, warn};

use super::socket::{PreparedSocket, SocketListener, TcpSocketDataHandler};
use crate::connection::client::Client;
use crate::error::{CommError, HandshakeError};
use crate::handshake::{
    HandshakeCodec, HandshakeCompleteMessage, HandshakeInitMessage, HandshakeResponseMessageV1,
    HANDSHAKE_COMPLETE_TYPE, HANDSHAKE_INIT_TYPE, HANDSHAKE_RESPONSE_TYPE, PROTOCOL_VERSION_1,
};
use crate::message::registry::MessageRegistry;
use crate::message::{downcast, DataMessage, Message, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    InitSent,
    ResponseReceived,
    Complete,
}

impl HandshakeState {
    fn name(self) -> &'static str {
        match self {
            HandshakeState::InitSent => "init_sent",
            HandshakeState::ResponseReceived => "response_received",
            HandshakeState::Complete => "complete",
        }
    }
}

struct ProtocolHandshake<P: HandshakeCodec> {
    registry: Arc<MessageRegistry<P>>,
    state: Mutex<HandshakeState>,
}

impl<P: HandshakeCodec> ProtocolHandshake<P> {
    fn new(registry: Arc<MessageRegistry<P>>) -> Self {
        Self {
            registry,
            state: Mutex::new(HandshakeState::InitSent),
        }
    }

    fn send_init(&self, socket: &TcpSocketDataHandler) -> Result<(), CommError> {
        let packet = Packet::new(
            Box::new(DataMessage::new(
                HANDSHAKE_INIT_TYPE,
                HandshakeInitMessage {
                    max_version: PROTOCOL_VERSION_1,
                },
            )),
            0,
            0,
        );
        let out = self.registry.serialize_packet(&packet)?;
        socket.send(out.as_bytes())?;
        Ok(())
    }

    /// Feeds one inbound frame. Returns `Some((type, instance))` once the
    /// exchange completes; malformed or out-of-order input is a
    /// [`HandshakeError`].
    fn advance(
        &self,
        bytes: &[u8],
        socket: &TcpSocketDataHandler,
    ) -> Result<Option<(i32, i32)>, CommError> {
        let mut state = self.state.lock().unwrap();
        if *state != HandshakeState::InitSent {
            return Err(HandshakeError::OutOfOrder { state: state.name() }.into());
        }

        let packet = self.registry.deserialize_packet(bytes)?;
        if packet.message().message_type() != HANDSHAKE_RESPONSE_TYPE {
            return Err(HandshakeError::OutOfOrder { state: state.name() }.into());
        }
        let response = downcast::<HandshakeResponseMessageV1>(packet.message())
            .ok_or_else(|| HandshakeError::Failed("malformed handshake response".into()))?;
        let (client_type, client_instance) = (response.data().client_type, response.data().client_instance);
        *state = HandshakeState::ResponseReceived;

        let complete = Packet::new(
            Box::new(DataMessage::new(
                HANDSHAKE_COMPLETE_TYPE,
                HandshakeCompleteMessage {
                    version: PROTOCOL_VERSION_1,
                },
            )),
            0,
            0,
        );
        let out = self.registry.serialize_packet(&complete)?;
        socket.send(out.as_bytes())?;
        *state = HandshakeState::Complete;

        Ok(Some((client_type, client_instance)))
    }
}

/// Owns the handshake state machine and the socket it's running over.
pub struct HandshakeHandler<P: HandshakeCodec> {
    socket: Arc<TcpSocketDataHandler>,
    handshake: ProtocolHandshake<P>,
    on_complete: Box<dyn Fn(i32, i32, Arc<TcpSocketDataHandler>) + Send + Sync>,
}

impl<P: HandshakeCodec> HandshakeHandler<P> {
    /// Spawns the reader thread for `stream`, sends `HandshakeInit`, and
    /// arranges for `on_complete` to run exactly once, with the negotiated
    /// coordinates and the live socket, when the exchange finishes.
    pub fn start(
        stream: TcpStream,
        read_buffer_size: usize,
        registry: Arc<MessageRegistry<P>>,
        on_complete: impl Fn(i32, i32, Arc<TcpSocketDataHandler>) + Send + Sync + 'static,
    ) -> Result<(), CommError> {
        let prepared = TcpSocketDataHandler::prepare(stream)?;
        let handshake = ProtocolHandshake::new(registry);

        let handler = Arc::new_cyclic(|weak: &Weak<Self>| {
            let socket = prepared.spawn(read_buffer_size, Arc::new(HandshakeListener { target: weak.clone() }));
            Self {
                socket,
                handshake,
                on_complete: Box::new(on_complete),
            }
        });

        handler.handshake.send_init(&handler.socket)?;
        Ok(())
    }

    fn on_data(&self, bytes: &[u8]) {
        match self.handshake.advance(bytes, &self.socket) {
            Ok(Some((client_type, client_instance))) => {
                info!(client_type, client_instance, "handshake complete");
                (self.on_complete)(client_type, client_instance, self.socket.clone());
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "handshake failed, dropping connection");
                self.socket.close();
            }
        }
    }

    fn on_closed(&self) {
        warn!("socket closed before handshake completed");
    }
}

/// Forwards socket events to a [`HandshakeHandler`] without the handler
/// needing to exist yet at the point the socket is spawned.
struct HandshakeListener<P: HandshakeCodec> {
    target: Weak<HandshakeHandler<P>>,
}

impl<P: HandshakeCodec> SocketListener for HandshakeListener<P> {
    fn data_received(&self, bytes: &[u8]) {
        if let Some(handler) = self.target.upgrade() {
            handler.on_data(bytes);
        }
    }

    fn socket_closed(&self) {
        if let Some(handler) = self.target.upgrade() {
            handler.on_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::binary::BinaryProtocol;
    use crate::handshake::register_handshake_messages;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::sync::mpsc;
    use std::time::Duration;

    fn registry() -> Arc<MessageRegistry<BinaryProtocol>> {
        let mut registry = MessageRegistry::new();
        register_handshake_messages(&mut registry).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn completes_on_a_real_loopback_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client_thread = std::thread::spawn(move || {
            let mut client = StdTcpStream::connect(addr).unwrap();
            client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

            // Read HandshakeInit (ignore contents, just drain one frame).
            let mut buf = [0u8; 256];
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0);

            let client_registry = registry();
            let response = Packet::new(
                Box::new(DataMessage::new(
                    HANDSHAKE_RESPONSE_TYPE,
                    HandshakeResponseMessageV1 {
                        client_type: 4,
                        client_instance: 2,
                    },
                )),
                0,
                0,
            );
            let out = client_registry.serialize_packet(&response).unwrap();
            client.write_all(out.as_bytes()).unwrap();

            let n = client.read(&mut buf).unwrap();
            let completed = client_registry.deserialize_packet(&buf[..n]).unwrap();
            assert_eq!(completed.message().message_type(), HANDSHAKE_COMPLETE_TYPE);
        });

        let (accepted, _) = listener.accept().unwrap();
        let (tx, rx) = mpsc::channel();
        HandshakeHandler::start(accepted, 256, registry(), move |t, i, socket| {
            tx.send((t, i, socket)).unwrap();
        })
        .unwrap();

        let (client_type, client_instance, _socket) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((client_type, client_instance), (4, 2));
        client_thread.join().unwrap();
    }
}
