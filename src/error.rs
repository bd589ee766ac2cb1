//! Error taxonomy shared by every layer of the bus.
//!
//! Each kind below corresponds to one failure category the core distinguishes.
//! Call sites that span layers (e.g. a connection's `send`, which can fail for
//! lifecycle, addressing, or codec reasons) return [`CommError`], which wraps
//! whichever specific kind actually occurred.

use thiserror::Error;

/// Invalid construction parameters: zero-size thread pool, duplicate message
/// registration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("thread pool requires at least one worker thread")]
    ZeroThreads,
    #[error("message type '{0}' is already registered")]
    DuplicateMessageType(String),
}

/// An operation was attempted in the wrong lifecycle state.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("connection is already registered with a bus")]
    AlreadyRegistered,
    #[error("connection is not registered with a bus")]
    NotRegistered,
    #[error("operation requires a connected state")]
    NotConnected,
}

/// A message type is not known to the factory/registry in use.
#[derive(Debug, Error)]
pub enum AddressingError {
    #[error("message type '{0}' is not registered")]
    UnregisteredType(String),
}

/// Serializer/deserializer failure: buffer bounds, unsupported payload,
/// malformed JSON.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer overflow: attempted to write {attempted} bytes with {remaining} remaining")]
    BufferOverflow { attempted: usize, remaining: usize },
    #[error("buffer underflow: attempted to read {attempted} bytes with {remaining} remaining")]
    BufferUnderflow { attempted: usize, remaining: usize },
    #[error("message type '{0}' has no registered codec")]
    UnsupportedType(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Socket send/receive failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    Closed,
}

/// Malformed or out-of-order handshake messages.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake message received out of order in state {state}")]
    OutOfOrder { state: &'static str },
    #[error("handshake failed: {0}")]
    Failed(String),
}

/// Top-level error aggregating every kind above, for call sites that don't
/// care which layer failed.
#[derive(Debug, Error)]
pub enum CommError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Addressing(#[from] AddressingError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}
