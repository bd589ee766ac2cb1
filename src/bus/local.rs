//! Synchronous, in-process bus (§4.2): no cloning, direct delivery.

use std::sync::Arc;

use super::{Bus, BusConnection, RoutingTable};
use crate::message::Packet;

/// Delivers synchronously: `send_message` has completed delivery to every
/// matching recipient by the time it returns.
#[derive(Default)]
pub struct LocalBasicBus {
    routing: RoutingTable,
}

impl LocalBasicBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bus for LocalBasicBus {
    fn connected(&self, connection: Arc<dyn BusConnection>) {
        self.routing.connected(connection);
    }

    fn disconnected(&self, connection: &Arc<dyn BusConnection>) {
        self.routing.disconnected(connection);
    }

    fn send_message(&self, sender: &Arc<dyn BusConnection>, packet: Packet) {
        self.routing.route(sender, &packet, |recipient, packet| {
            recipient.receive_from_bus(sender, packet);
        });
    }
}
