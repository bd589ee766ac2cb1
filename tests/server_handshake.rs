//! A client dials a `ServerBus`, completes the version-1 handshake, and ends
//! up exchanging application traffic with a peer already sitting on the
//! server's internal bus (§8 scenario 6).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use commbus::codec::binary::{BinaryCodecFactory, BinaryProtocol};
use commbus::handshake::register_handshake_messages;
use commbus::message::{DataMessage, MessageRegistry};
use commbus::{Bus, ClientConnection, Connection, LocalBasicBus, LocalConnection, MessageListener, Packet, ServerBus};

fn registry() -> Arc<MessageRegistry<BinaryProtocol>> {
    let mut registry = MessageRegistry::new();
    register_handshake_messages(&mut registry).unwrap();
    registry
        .register(
            Box::new(DataMessage::new("Echo", 0u32)),
            Box::new(BinaryCodecFactory::<u32>::new()),
        )
        .unwrap();
    Arc::new(registry)
}

struct CollectingListener {
    received: Mutex<Vec<u32>>,
}

impl MessageListener for CollectingListener {
    fn message_received(&self, packet: &Packet) {
        let value = *commbus::message::downcast::<u32>(packet.message()).unwrap().data();
        self.received.lock().unwrap().push(value);
    }
}

fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("condition never became true");
}

#[test]
fn client_handshake_completes_and_joins_the_server_bus() -> Result<()> {
    let bus: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
    let server: Arc<ServerBus<BinaryProtocol>> = Arc::new(ServerBus::new(bus.clone(), registry(), 4096));
    let addr = server.start("127.0.0.1:0")?;

    // A peer already on the server's internal bus, at the coordinates the
    // client will ask to be assigned during the handshake.
    let peer = LocalConnection::new(5, 5, registry());
    peer.register_with_bus(bus)?;
    peer.connect()?;
    let peer_listener = Arc::new(CollectingListener {
        received: Mutex::new(Vec::new()),
    });
    peer.add_message_listener(peer_listener.clone());

    let client = ClientConnection::<BinaryProtocol>::new(7, 9, registry(), 4096);
    client.register_endpoint(addr)?;
    client.connect()?;

    // Give the handshake a moment to complete before addressing the peer.
    std::thread::sleep(Duration::from_millis(150));

    client.send_message(Box::new(DataMessage::new("Echo", 42u32)), 5, 5)?;

    wait_for(|| !peer_listener.received.lock().unwrap().is_empty());
    assert_eq!(*peer_listener.received.lock().unwrap(), vec![42]);

    let count = AtomicUsize::new(peer_listener.received.lock().unwrap().len());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    client.disconnect()?;
    server.stop();
    Ok(())
}
