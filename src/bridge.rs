//! Bridge (§4.10): selective, rule-driven forwarding between two buses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::connection::{Connection, MessageListener};
use crate::message::Packet;

/// Where a forwarded message type should be re-addressed to on the far side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingRule {
    pub recipient_type: i32,
    pub recipient_instance: i32,
}

/// Listens on one connection and forwards packets whose message type has a
/// rule to the other connection, re-addressed per the rule. No cloning: the
/// packet's message is handed to the destination's `send_message` directly,
/// so the forwarder assumes sole ownership for the duration of the call.
pub struct Forwarder {
    destination: Arc<dyn Connection>,
    rules: Mutex<HashMap<&'static str, RoutingRule>>,
}

impl Forwarder {
    pub fn new(destination: Arc<dyn Connection>) -> Self {
        Self {
            destination,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Adds or overwrites the rule for `message_type`. Only the most recent
    /// rule for a given type is kept.
    pub fn add_rule(&self, message_type: &'static str, rule: RoutingRule) {
        debug!(message_type, recipient_type = rule.recipient_type, recipient_instance = rule.recipient_instance, "bridge rule registered");
        self.rules.lock().unwrap().insert(message_type, rule);
    }
}

impl MessageListener for Forwarder {
    fn message_received(&self, packet: &Packet) {
        let rule = self
            .rules
            .lock()
            .unwrap()
            .get(packet.message().message_type())
            .copied();
        let Some(rule) = rule else {
            return;
        };
        let message = packet.message().clone_message();
        let _ = self
            .destination
            .send_message(message, rule.recipient_type, rule.recipient_instance);
    }
}

/// Two connections joined by two independent, unidirectional forwarders.
/// There is no feedback-loop protection beyond whatever addressing the rules
/// themselves encode; rule authors must not create cycles.
pub struct Bridge {
    internal_to_external: Arc<Forwarder>,
    external_to_internal: Arc<Forwarder>,
}

impl Bridge {
    pub fn new(internal: Arc<dyn Connection>, external: Arc<dyn Connection>) -> Self {
        let internal_to_external = Arc::new(Forwarder::new(external.clone()));
        let external_to_internal = Arc::new(Forwarder::new(internal.clone()));
        internal.add_message_listener(internal_to_external.clone());
        external.add_message_listener(external_to_internal.clone());
        Self {
            internal_to_external,
            external_to_internal,
        }
    }

    /// Forwards `message_type` seen on the internal connection to `rule` on
    /// the external connection.
    pub fn forward_internal_to_external(&self, message_type: &'static str, rule: RoutingRule) {
        self.internal_to_external.add_rule(message_type, rule);
    }

    /// Forwards `message_type` seen on the external connection to `rule` on
    /// the internal connection.
    pub fn forward_external_to_internal(&self, message_type: &'static str, rule: RoutingRule) {
        self.external_to_internal.add_rule(message_type, rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, LocalBasicBus};
    use crate::codec::binary::BinaryCodecFactory;
    use crate::connection::LocalConnection;
    use crate::message::{DataMessage, Message, MessageRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: AtomicUsize,
    }

    impl MessageListener for CountingListener {
        fn message_received(&self, _packet: &Packet) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry_with(types: &[&'static str]) -> Arc<MessageRegistry<crate::codec::binary::BinaryProtocol>> {
        let mut registry = MessageRegistry::new();
        for &t in types {
            registry
                .register(
                    Box::new(DataMessage::new(t, 0u32)),
                    Box::new(BinaryCodecFactory::<u32>::new()),
                )
                .unwrap();
        }
        Arc::new(registry)
    }

    #[test]
    fn forwards_only_the_ruled_type_to_the_mapped_recipient() {
        let bus1: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
        let bus2: Arc<dyn Bus> = Arc::new(LocalBasicBus::new());
        let registry = registry_with(&["M1", "M2"]);

        // bus1 node that broadcasts.
        let sender = LocalConnection::new(1, 1, registry.clone());
        sender.register_with_bus(bus1.clone()).unwrap();
        sender.connect().unwrap();

        // bridge's internal leg, also on bus1.
        let internal: Arc<dyn Connection> = LocalConnection::new(9, 9, registry.clone());
        internal.register_with_bus(bus1).unwrap();
        internal.connect().unwrap();

        // bridge's external leg, on bus2.
        let external: Arc<dyn Connection> = LocalConnection::new(9, 9, registry.clone());
        external.register_with_bus(bus2.clone()).unwrap();
        external.connect().unwrap();

        let bridge = Bridge::new(internal, external);
        bridge.forward_internal_to_external(
            "M1",
            RoutingRule {
                recipient_type: 2,
                recipient_instance: 1,
            },
        );

        // bus2 node at (2,1), the mapped recipient.
        let target: Arc<dyn Connection> = LocalConnection::new(2, 1, registry.clone());
        target.register_with_bus(bus2.clone()).unwrap();
        target.connect().unwrap();
        let target_listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        target.add_message_listener(target_listener.clone());

        // another bus2 node not targeted by the rule.
        let bystander: Arc<dyn Connection> = LocalConnection::new(5, 5, registry);
        bystander.register_with_bus(bus2).unwrap();
        bystander.connect().unwrap();
        let bystander_listener = Arc::new(CountingListener {
            count: AtomicUsize::new(0),
        });
        bystander.add_message_listener(bystander_listener.clone());

        sender
            .send_message(Box::new(DataMessage::new("M1", 1u32)), -1, -1)
            .unwrap();
        assert_eq!(target_listener.count.load(Ordering::SeqCst), 1);
        assert_eq!(bystander_listener.count.load(Ordering::SeqCst), 0);

        sender
            .send_message(Box::new(DataMessage::new("M2", 1u32)), -1, -1)
            .unwrap();
        assert_eq!(
            target_listener.count.load(Ordering::SeqCst),
            1,
            "unmapped type is not forwarded"
        );
    }

    #[test]
    fn later_rule_for_the_same_type_overwrites_the_earlier_one() {
        let conn: Arc<dyn Connection> = LocalConnection::new(1, 1, registry_with(&["M1"]));
        let forwarder = Forwarder::new(conn);
        forwarder.add_rule(
            "M1",
            RoutingRule {
                recipient_type: 1,
                recipient_instance: 1,
            },
        );
        forwarder.add_rule(
            "M1",
            RoutingRule {
                recipient_type: 2,
                recipient_instance: 2,
            },
        );
        let rule = *forwarder.rules.lock().unwrap().get("M1").unwrap();
        assert_eq!(rule.recipient_type, 2);
        assert_eq!(rule.recipient_instance, 2);
    }
}
