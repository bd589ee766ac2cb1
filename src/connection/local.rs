//! In-process connection: simultaneously a [`Connection`] (node-facing) and
//! a [`BusConnection`] (bus-facing) over the same [`LocalBasicBus`] or
//! [`ThreadedBus`].

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use super::{Connection, MessageListener};
use crate::bus::{Bus, BusConnection};
use crate::codec::Protocol;
use crate::error::{AddressingError, CommError, LifecycleError};
use crate::message::registry::MessageRegistry;
use crate::message::{Message, Packet};

enum State {
    Unregistered,
    Disconnected(Arc<dyn Bus>),
    Connected(Arc<dyn Bus>),
}

/// Three-state lifecycle: unregistered -> registered/disconnected ->
/// registered/connected. A connection may only be registered with one bus
/// for its lifetime; connect/disconnect toggle against that bus.
///
/// Holds a weak handle to its own `Arc` (set up via [`Arc::new_cyclic`]) so
/// that `connect`/`disconnect`, which only ever see `&self`, can still hand
/// collaborators a live `Arc<dyn BusConnection>` of themselves.
pub struct LocalConnection<P: Protocol> {
    conn_type: i32,
    conn_instance: i32,
    registry: Arc<MessageRegistry<P>>,
    state: Mutex<State>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
    self_handle: Weak<LocalConnection<P>>,
}

impl<P: Protocol + 'static> LocalConnection<P> {
    pub fn new(conn_type: i32, conn_instance: i32, registry: Arc<MessageRegistry<P>>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            conn_type,
            conn_instance,
            registry,
            state: Mutex::new(State::Unregistered),
            listeners: Mutex::new(Vec::new()),
            self_handle: weak.clone(),
        })
    }

    /// Attaches this connection to a bus, in the disconnected sub-state.
    /// May only be called once per connection.
    pub fn register_with_bus(&self, bus: Arc<dyn Bus>) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            State::Unregistered => {
                *state = State::Disconnected(bus);
                Ok(())
            }
            _ => Err(LifecycleError::AlreadyRegistered),
        }
    }

    fn as_bus_connection(&self) -> Arc<dyn BusConnection> {
        self.self_handle
            .upgrade()
            .expect("LocalConnection outlived its own self-handle")
    }

    fn send_internal(&self, packet: Packet) -> Result<bool, CommError> {
        let bus = {
            match &*self.state.lock().unwrap() {
                State::Connected(bus) => bus.clone(),
                _ => return Ok(false),
            }
        };
        let message_type = packet.message().message_type();
        if !self.registry.is_registered(message_type) {
            return Err(AddressingError::UnregisteredType(message_type.to_string()).into());
        }
        bus.send_message(&self.as_bus_connection(), packet);
        Ok(true)
    }
}

impl<P: Protocol + 'static> Connection for LocalConnection<P> {
    fn connection_type(&self) -> i32 {
        self.conn_type
    }

    fn connection_instance(&self) -> i32 {
        self.conn_instance
    }

    fn is_connected(&self) -> bool {
        matches!(&*self.state.lock().unwrap(), State::Connected(_))
    }

    fn connect(&self) -> Result<bool, CommError> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, State::Unregistered) {
            State::Unregistered => {
                *state = State::Unregistered;
                Err(LifecycleError::NotRegistered.into())
            }
            State::Disconnected(bus) => {
                bus.connected(self.as_bus_connection());
                *state = State::Connected(bus);
                Ok(true)
            }
            connected @ State::Connected(_) => {
                *state = connected;
                Ok(true)
            }
        }
    }

    fn disconnect(&self) -> Result<bool, CommError> {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, State::Unregistered) {
            State::Unregistered => {
                *state = State::Unregistered;
                Err(LifecycleError::NotRegistered.into())
            }
            State::Connected(bus) => {
                bus.disconnected(&self.as_bus_connection());
                *state = State::Disconnected(bus);
                Ok(true)
            }
            disconnected @ State::Disconnected(_) => {
                *state = disconnected;
                Ok(true)
            }
        }
    }

    fn send_message(
        &self,
        message: Box<dyn Message>,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Result<bool, CommError> {
        self.send_internal(Packet::new(message, recipient_type, recipient_instance))
    }

    fn send_packet(&self, packet: Packet) -> Result<bool, CommError> {
        self.send_internal(packet)
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

impl<P: Protocol + 'static> BusConnection for LocalConnection<P> {
    fn connection_type(&self) -> i32 {
        self.conn_type
    }

    fn connection_instance(&self) -> i32 {
        self.conn_instance
    }

    fn receive_from_bus(&self, _sender: &Arc<dyn BusConnection>, packet: &Packet) {
        let message_type = packet.message().message_type();
        if !self.registry.is_registered(message_type) {
            warn!(message_type, "dropping packet for unregistered type");
            return;
        }
        for listener in self.listeners.lock().unwrap().iter() {
            listener.message_received(packet);
        }
    }
}
