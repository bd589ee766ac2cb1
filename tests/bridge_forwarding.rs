//! Two independently-addressed buses joined by a bridge, exercised through
//! `Node` rather than bare connections, to cover the bridge from the
//! node-facing API a real caller would use (§8 scenario 7).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use commbus::codec::binary::BinaryCodecFactory;
use commbus::codec::binary::BinaryProtocol;
use commbus::message::{DataMessage, Message, MessageRegistry, Processor};
use commbus::{Bridge, Bus, Connection, LocalBasicBus, LocalConnection, Node, RoutingRule};

fn registry() -> Arc<MessageRegistry<BinaryProtocol>> {
    let mut registry = MessageRegistry::new();
    registry
        .register(
            Box::new(DataMessage::new("M1", 0u32)),
            Box::new(BinaryCodecFactory::<u32>::new()),
        )
        .unwrap();
    registry
        .register(
            Box::new(DataMessage::new("M2", 0u32)),
            Box::new(BinaryCodecFactory::<u32>::new()),
        )
        .unwrap();
    Arc::new(registry)
}

struct CountingProcessor {
    message_type: &'static str,
    count: Arc<std::sync::atomic::AtomicUsize>,
}

impl Processor for CountingProcessor {
    fn message_type(&self) -> &'static str {
        self.message_type
    }
    fn process(&self, _message: &dyn Message) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn only_the_ruled_type_reaches_the_node_on_the_far_bus() -> Result<()> {
    let bus1: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
    let bus2: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
    let registry = registry();

    let source = LocalConnection::new(1, 1, registry.clone());
    source.register_with_bus(bus1.clone())?;
    source.connect()?;

    let internal = LocalConnection::new(9, 9, registry.clone());
    internal.register_with_bus(bus1)?;
    internal.connect()?;
    let external = LocalConnection::new(9, 9, registry.clone());
    external.register_with_bus(bus2.clone())?;
    external.connect()?;
    let bridge = Bridge::new(internal, external);
    bridge.forward_internal_to_external(
        "M1",
        RoutingRule {
            recipient_type: 2,
            recipient_instance: 1,
        },
    );

    let far_connection = LocalConnection::new(2, 1, registry);
    far_connection.register_with_bus(bus2)?;
    far_connection.connect()?;
    let far_node = Node::new(far_connection);
    let m1_count = Arc::new(AtomicUsize::new(0));
    let m2_count = Arc::new(AtomicUsize::new(0));
    far_node.add_processor(Arc::new(CountingProcessor {
        message_type: "M1",
        count: m1_count.clone(),
    }));
    far_node.add_processor(Arc::new(CountingProcessor {
        message_type: "M2",
        count: m2_count.clone(),
    }));

    source.send_message(Box::new(DataMessage::new("M1", 1u32)), -1, -1)?;
    source.send_message(Box::new(DataMessage::new("M2", 1u32)), -1, -1)?;

    assert_eq!(m1_count.load(Ordering::SeqCst), 1);
    assert_eq!(m2_count.load(Ordering::SeqCst), 0, "unmapped type never crosses the bridge");
    Ok(())
}
