//! The addressing and routing engine (§4.1) and its two concrete variants.

pub mod local;
pub mod threaded;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::message::Packet;

pub use local::LocalBasicBus;
pub use threaded::ThreadedBus;

/// The bus-side peer of a connection: one per attached node. Identity for
/// routing-table membership (duplicate detection, sender-skip, removal) is
/// `Arc` pointer identity — see the design notes on replacing pointer-heavy
/// bookkeeping with ordinary reference counting.
pub trait BusConnection: Send + Sync {
    fn connection_type(&self) -> i32;
    fn connection_instance(&self) -> i32;

    /// Invoked by the bus with the packet to deliver and the sender's own
    /// handle (so a bus-connection can recognize delivery to itself, though
    /// the routing engine already filters that out).
    fn receive_from_bus(&self, sender: &Arc<dyn BusConnection>, packet: &Packet);
}

/// A routing engine: given `(sender, packet)`, delivers to every matching
/// connection except the sender.
pub trait Bus: Send + Sync {
    fn connected(&self, connection: Arc<dyn BusConnection>);
    fn disconnected(&self, connection: &Arc<dyn BusConnection>);
    fn send_message(&self, sender: &Arc<dyn BusConnection>, packet: Packet);
}

/// Shared routing table: `type -> instance -> [connections]`, used by both
/// bus variants. Resolution logic lives here once; the variants differ only
/// in *when* and *how* (sync vs. scheduled) they invoke delivery.
#[derive(Default)]
pub struct RoutingTable {
    table: Mutex<HashMap<i32, HashMap<i32, Vec<Arc<dyn BusConnection>>>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self, connection: Arc<dyn BusConnection>) {
        let mut table = self.table.lock().unwrap();
        table
            .entry(connection.connection_type())
            .or_default()
            .entry(connection.connection_instance())
            .or_default()
            .push(connection);
    }

    pub fn disconnected(&self, connection: &Arc<dyn BusConnection>) {
        let mut table = self.table.lock().unwrap();
        if let Some(by_instance) = table.get_mut(&connection.connection_type()) {
            if let Some(bucket) = by_instance.get_mut(&connection.connection_instance()) {
                if let Some(pos) = bucket.iter().position(|c| Arc::ptr_eq(c, connection)) {
                    bucket.remove(pos);
                }
            }
        }
    }

    /// Resolves the candidate recipients for `packet` per the address table
    /// in §4.1. The sender is filtered out by the caller, not here, since
    /// callers differ in whether they still hold the sender handle locally
    /// or inside a scheduled closure.
    pub fn resolve(&self, packet: &Packet) -> Vec<Arc<dyn BusConnection>> {
        let table = self.table.lock().unwrap();
        let type_broadcast = packet.is_type_broadcast();
        let instance_broadcast = packet.is_instance_broadcast();

        let mut result = Vec::new();
        match (type_broadcast, instance_broadcast) {
            (false, false) => {
                if let Some(by_instance) = table.get(&packet.recipient_type()) {
                    if let Some(bucket) = by_instance.get(&packet.recipient_instance()) {
                        result.extend(bucket.iter().cloned());
                    }
                }
            }
            (false, true) => {
                if let Some(by_instance) = table.get(&packet.recipient_type()) {
                    for bucket in by_instance.values() {
                        result.extend(bucket.iter().cloned());
                    }
                }
            }
            (true, false) => {
                for by_instance in table.values() {
                    if let Some(bucket) = by_instance.get(&packet.recipient_instance()) {
                        result.extend(bucket.iter().cloned());
                    }
                }
            }
            (true, true) => {
                for by_instance in table.values() {
                    for bucket in by_instance.values() {
                        result.extend(bucket.iter().cloned());
                    }
                }
            }
        }
        trace!(
            recipient_type = packet.recipient_type(),
            recipient_instance = packet.recipient_instance(),
            matched = result.len(),
            "resolved routing table"
        );
        result
    }

    /// Resolves recipients and invokes `deliver` for each one that is not
    /// the sender, by pointer identity.
    pub fn route(
        &self,
        sender: &Arc<dyn BusConnection>,
        packet: &Packet,
        deliver: impl Fn(&Arc<dyn BusConnection>, &Packet),
    ) {
        for recipient in self.resolve(packet) {
            if !Arc::ptr_eq(&recipient, sender) {
                deliver(&recipient, packet);
            }
        }
    }
}
