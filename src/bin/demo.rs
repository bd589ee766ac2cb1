//! Wires up a local bus demo and a TCP server/client handshake demo, in that
//! order, against the same message type. Not part of the library surface;
//! `cargo run --bin commbus-demo` is for kicking the tires by hand.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};

use commbus::codec::binary::{BinaryCodecFactory, BinaryProtocol};
use commbus::handshake::register_handshake_messages;
use commbus::logging;
use commbus::message::{DataMessage, Message, MessageRegistry};
use commbus::{
    Bus, ClientConnection, Connection, LocalBasicBus, LocalConnection, Node, Processor, ServerBus, ThreadPool,
    ThreadedBus,
};

#[derive(Debug, Clone, PartialEq)]
struct Ping {
    count: u32,
}

impl commbus::codec::BinaryEncode for Ping {
    fn binary_size(&self) -> usize {
        self.count.binary_size()
    }
    fn binary_write(&self, out: &mut commbus::OutputBuffer) -> Result<(), commbus::CodecError> {
        self.count.binary_write(out)
    }
    fn binary_read(input: &mut commbus::InputBuffer<'_>) -> Result<Self, commbus::CodecError> {
        Ok(Ping {
            count: u32::binary_read(input)?,
        })
    }
}

struct PrintingProcessor;

impl Processor for PrintingProcessor {
    fn message_type(&self) -> &'static str {
        "Ping"
    }

    fn process(&self, message: &dyn Message) {
        let ping = commbus::message::downcast::<Ping>(message).unwrap();
        info!(count = ping.data().count, "node received ping");
    }
}

fn registry() -> Arc<MessageRegistry<BinaryProtocol>> {
    let mut registry = MessageRegistry::new();
    register_handshake_messages(&mut registry).unwrap();
    registry
        .register(
            Box::new(DataMessage::new("Ping", Ping { count: 0 })),
            Box::new(BinaryCodecFactory::<Ping>::new()),
        )
        .unwrap();
    Arc::new(registry)
}

fn local_bus_demo() {
    info!("--- local bus demo ---");
    let bus: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
    let registry = registry();

    let sender = LocalConnection::new(1, 1, registry.clone());
    sender.register_with_bus(bus.clone()).unwrap();
    sender.connect().unwrap();

    let receiver = LocalConnection::new(1, 2, registry);
    receiver.register_with_bus(bus).unwrap();
    receiver.connect().unwrap();

    let node = Node::new(receiver);
    node.add_processor(Arc::new(PrintingProcessor));

    sender
        .send_message(Box::new(DataMessage::new("Ping", Ping { count: 7 })), 1, 2)
        .unwrap();
}

fn threaded_bus_demo() {
    info!("--- threaded bus demo ---");
    let pool = ThreadPool::for_available_parallelism(true).unwrap();
    let bus: Arc<dyn Bus> = Arc::new(ThreadedBus::new(pool));
    let registry = registry();

    let sender = LocalConnection::new(1, 1, registry.clone());
    sender.register_with_bus(bus.clone()).unwrap();
    sender.connect().unwrap();

    let receiver = LocalConnection::new(1, 2, registry);
    receiver.register_with_bus(bus).unwrap();
    receiver.connect().unwrap();

    let node = Node::new(receiver);
    node.add_processor(Arc::new(PrintingProcessor));

    sender
        .send_message(Box::new(DataMessage::new("Ping", Ping { count: 99 })), 1, 2)
        .unwrap();
    // The pool fans this out asynchronously; give it a moment before the
    // process exits so the demo actually prints the delivery.
    std::thread::sleep(Duration::from_millis(50));
}

fn tcp_handshake_demo() {
    info!("--- tcp handshake demo ---");
    let server_bus: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
    let server: Arc<ServerBus<BinaryProtocol>> = Arc::new(ServerBus::new(server_bus, registry(), 4096));
    let bound = server.start("127.0.0.1:0").expect("bind the demo listener");

    let client = ClientConnection::<BinaryProtocol>::new(2, 1, registry(), 4096);
    client.register_endpoint(bound).unwrap();
    client.connect().unwrap();

    // Give the handshake a moment to complete before sending application
    // traffic over the now-negotiated connection.
    std::thread::sleep(Duration::from_millis(100));
    client
        .send_message(Box::new(DataMessage::new("Ping", Ping { count: 1 })), -1, -1)
        .ok();

    std::thread::sleep(Duration::from_millis(50));
    client.disconnect().ok();
    server.stop();
}

fn main() {
    logging::init_console(Level::INFO);
    local_bus_demo();
    threaded_bus_demo();
    tcp_handshake_demo();
}
