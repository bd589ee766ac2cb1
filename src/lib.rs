//! # commbus
//!
//! An addressable, threadable in-process message bus with a TCP bridging
//! server. Nodes address each other by `(recipient_type, recipient_instance)`
//! coordinates, with negative values denoting broadcast; a bus fans packets
//! out either synchronously (in-process) or via a worker pool, and a server
//! bridges remote TCP clients onto an internal bus after a short handshake.

pub mod bridge;
pub mod bus;
pub mod codec;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod message;
pub mod node;
pub mod server;
pub mod thread_pool;

mod buffer;

pub use bridge::{Bridge, Forwarder, RoutingRule};
pub use bus::{Bus, BusConnection, LocalBasicBus, RoutingTable, ThreadedBus};
pub use buffer::{InputBuffer, OutputBuffer};
pub use connection::{ClientConnection, Connection, LocalConnection, MessageListener};
pub use error::{
    AddressingError, CodecError, CommError, ConfigError, HandshakeError, LifecycleError,
    TransportError,
};
pub use message::{DataMessage, Message, MessageData, MessageRegistry, Packet, Processor};
pub use node::Node;
pub use server::ServerBus;
pub use thread_pool::ThreadPool;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
