//! The bus-facing wrapper around a [`BasicServerConnection`] (§4.8, second
//! half: "wraps that `IConnection` in a network bus connection").
//!
//! Mirrors [`crate::connection::local::LocalConnection`]'s split between a
//! node-facing [`Connection`] and a bus-facing [`BusConnection`], except here
//! the two halves are separate objects rather than one: `BasicServerConnection`
//! already exists as its own `Connection` before a bus is known, so the
//! bus-facing half is a thin object that listens on it and forwards into a
//! bus, instead of folding both roles into a single type.

use std::sync::{Arc, Weak};

use crate::bus::{Bus, BusConnection};
use crate::codec::Protocol;
use crate::connection::{Connection, MessageListener};
use crate::message::Packet;

use super::basic_connection::BasicServerConnection;

/// Registers `connection` as a listener on `node` and forwards every message
/// it sees into `bus`, addressed as coming from `node`'s own coordinates.
/// On the matching side, bus deliveries are handed back out over `node`.
pub struct NetworkBusConnection<P: Protocol> {
    node: Arc<BasicServerConnection<P>>,
    bus: Arc<dyn Bus>,
    self_handle: Weak<NetworkBusConnection<P>>,
}

impl<P: Protocol + 'static> NetworkBusConnection<P> {
    /// Wraps `node` and registers it with `bus`, returning the live handle.
    /// The node is left exactly as connected/disconnected as the caller
    /// already made it; this only adds the bus-facing leg.
    pub fn attach(node: Arc<BasicServerConnection<P>>, bus: Arc<dyn Bus>) -> Arc<Self> {
        let wrapper = Arc::new_cyclic(|weak| Self {
            node: node.clone(),
            bus: bus.clone(),
            self_handle: weak.clone(),
        });
        node.add_message_listener(wrapper.clone());
        bus.connected(wrapper.as_bus_connection());
        wrapper
    }

    fn as_bus_connection(&self) -> Arc<dyn BusConnection> {
        self.self_handle
            .upgrade()
            .expect("NetworkBusConnection outlived its own self-handle")
    }

    /// Detaches from the bus. Called once the underlying socket closes;
    /// there is no separate cleanup registry to consult, see module notes.
    pub fn detach(&self) {
        self.bus.disconnected(&self.as_bus_connection());
    }
}

impl<P: Protocol + 'static> BusConnection for NetworkBusConnection<P> {
    fn connection_type(&self) -> i32 {
        self.node.connection_type()
    }

    fn connection_instance(&self) -> i32 {
        self.node.connection_instance()
    }

    fn receive_from_bus(&self, _sender: &Arc<dyn BusConnection>, packet: &Packet) {
        let _ = self.node.send_packet(packet.clone_deep());
    }
}

impl<P: Protocol + 'static> MessageListener for NetworkBusConnection<P> {
    fn message_received(&self, packet: &Packet) {
        self.bus.send_message(&self.as_bus_connection(), packet.clone_deep());
    }
}
