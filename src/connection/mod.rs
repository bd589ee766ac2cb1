//! Node-side connection handles: local (in-process) and client (TCP).

pub mod client;
pub mod local;

use std::sync::Arc;

use crate::error::CommError;
use crate::message::{Message, Packet};

pub use client::ClientConnection;
pub use local::LocalConnection;

/// The node-side handle to a bus. May be local (in-process, and
/// simultaneously a [`crate::bus::BusConnection`]) or networked (a TCP
/// client).
pub trait Connection: Send + Sync {
    fn connection_type(&self) -> i32;
    fn connection_instance(&self) -> i32;
    fn is_connected(&self) -> bool;

    /// `Ok(true)` on success or already-connected no-op; errors only on a
    /// connection that was never registered with a bus.
    fn connect(&self) -> Result<bool, CommError>;
    fn disconnect(&self) -> Result<bool, CommError>;

    /// `Ok(false)` if not connected (no error, nothing sent); `Err` if the
    /// message type isn't registered with this connection's codec factory or
    /// the transport fails.
    fn send_message(
        &self,
        message: Box<dyn Message>,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Result<bool, CommError>;

    fn send_packet(&self, packet: Packet) -> Result<bool, CommError>;

    fn add_message_listener(&self, listener: Arc<dyn MessageListener>);
    fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>);
}

/// Notified whenever a connection delivers an inbound packet, from either
/// the bus (local) or the socket reader thread (networked).
pub trait MessageListener: Send + Sync {
    fn message_received(&self, packet: &Packet);
}
