//! Node (§4.11): one connection plus a `message_type -> processor` map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::{Connection, MessageListener};
use crate::error::CommError;
use crate::message::{Message, Packet, Processor};

/// Binds one [`Connection`] to a set of [`Processor`]s keyed by message
/// type. Registers itself as the connection's sole listener at construction.
pub struct Node {
    connection: Arc<dyn Connection>,
    processors: Mutex<HashMap<&'static str, Arc<dyn Processor>>>,
}

impl Node {
    pub fn new(connection: Arc<dyn Connection>) -> Arc<Self> {
        let node = Arc::new(Self {
            connection: connection.clone(),
            processors: Mutex::new(HashMap::new()),
        });
        connection.add_message_listener(node.clone());
        node
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connect(&self) -> Result<bool, CommError> {
        self.connection.connect()
    }

    pub fn disconnect(&self) -> Result<bool, CommError> {
        self.connection.disconnect()
    }

    pub fn send_message(
        &self,
        message: Box<dyn Message>,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Result<bool, CommError> {
        self.connection
            .send_message(message, recipient_type, recipient_instance)
    }

    /// Registers `processor` for its own `message_type()`, replacing any
    /// processor previously registered for that type.
    pub fn add_processor(&self, processor: Arc<dyn Processor>) {
        self.processors
            .lock()
            .unwrap()
            .insert(processor.message_type(), processor);
    }

    /// Removes `processor` only if the currently registered processor for
    /// its type is the same instance (identity, not just matching type).
    pub fn remove_processor(&self, processor: &Arc<dyn Processor>) {
        let mut processors = self.processors.lock().unwrap();
        if let Some(existing) = processors.get(processor.message_type()) {
            if Arc::ptr_eq(existing, processor) {
                processors.remove(processor.message_type());
            }
        }
    }
}

impl MessageListener for Node {
    fn message_received(&self, packet: &Packet) {
        let processors = self.processors.lock().unwrap();
        if let Some(processor) = processors.get(packet.message().message_type()) {
            processor.process(packet.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, LocalBasicBus};
    use crate::codec::binary::BinaryCodecFactory;
    use crate::connection::LocalConnection;
    use crate::message::{DataMessage, MessageRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        message_type: &'static str,
        count: AtomicUsize,
    }

    impl Processor for CountingProcessor {
        fn message_type(&self) -> &'static str {
            self.message_type
        }
        fn process(&self, _message: &dyn Message) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry_with_ping() -> Arc<MessageRegistry<crate::codec::binary::BinaryProtocol>> {
        let mut registry = MessageRegistry::new();
        registry
            .register(
                Box::new(DataMessage::new("Ping", 0u32)),
                Box::new(BinaryCodecFactory::<u32>::new()),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn dispatches_to_the_processor_matching_message_type() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
        let registry = registry_with_ping();
        let a = LocalConnection::new(1, 1, registry.clone());
        let b = LocalConnection::new(1, 2, registry);
        a.register_with_bus(bus.clone()).unwrap();
        b.register_with_bus(bus).unwrap();
        a.connect().unwrap();
        b.connect().unwrap();

        let node_b = Node::new(b);
        let processor = Arc::new(CountingProcessor {
            message_type: "Ping",
            count: AtomicUsize::new(0),
        });
        node_b.add_processor(processor.clone());

        let node_a = Node::new(a);
        node_a
            .send_message(Box::new(DataMessage::new("Ping", 7u32)), 1, 2)
            .unwrap();

        assert_eq!(processor.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_processor_only_removes_on_identity_match() {
        let bus: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
        let registry = registry_with_ping();
        let conn = LocalConnection::new(1, 1, registry);
        conn.register_with_bus(bus).unwrap();
        conn.connect().unwrap();
        let node = Node::new(conn);

        let p1 = Arc::new(CountingProcessor {
            message_type: "Ping",
            count: AtomicUsize::new(0),
        });
        let p2 = Arc::new(CountingProcessor {
            message_type: "Ping",
            count: AtomicUsize::new(0),
        });
        node.add_processor(p1.clone());
        node.add_processor(p2.clone());
        // p2 replaced p1 for "Ping"; removing p1 now (wrong identity) is a no-op.
        node.remove_processor(&p1);
        node.message_received(&Packet::new(Box::new(DataMessage::new("Ping", 1u32)), 1, 1));
        assert_eq!(p2.count.load(Ordering::SeqCst), 1);

        node.remove_processor(&p2);
        node.message_received(&Packet::new(Box::new(DataMessage::new("Ping", 1u32)), 1, 1));
        assert_eq!(p2.count.load(Ordering::SeqCst), 1, "removed processor stops receiving");
    }
}
