//! Wire payloads for the version-1 handshake (§4.7) and the registration
//! glue that lets both the binary and JSON protocols carry them.
//!
//! The handshake messages ride the same factory a client or server already
//! uses for its own application traffic — there is no handshake-private
//! registry (§9, resolved open questions).

use serde::{Deserialize, Serialize};

use crate::buffer::{InputBuffer, OutputBuffer};
use crate::codec::binary::{BinaryCodecFactory, BinaryProtocol};
use crate::codec::json::{JsonCodecFactory, JsonProtocol};
use crate::codec::{BinaryEncode, Protocol, SerializerFactory};
use crate::error::{CodecError, ConfigError};
use crate::message::registry::MessageRegistry;
use crate::message::DataMessage;

pub const HANDSHAKE_INIT_TYPE: &str = "HandshakeInitMessage";
pub const HANDSHAKE_RESPONSE_TYPE: &str = "HandshakeResponseMessageV1";
pub const HANDSHAKE_COMPLETE_TYPE: &str = "HandshakeCompleteMessage";

pub const PROTOCOL_VERSION_1: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeInitMessage {
    pub max_version: u32,
}

impl BinaryEncode for HandshakeInitMessage {
    fn binary_size(&self) -> usize {
        self.max_version.binary_size()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        self.max_version.binary_write(out)
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            max_version: u32::binary_read(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponseMessageV1 {
    pub client_type: i32,
    pub client_instance: i32,
}

impl BinaryEncode for HandshakeResponseMessageV1 {
    fn binary_size(&self) -> usize {
        self.client_type.binary_size() + self.client_instance.binary_size()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        self.client_type.binary_write(out)?;
        self.client_instance.binary_write(out)
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_type: i32::binary_read(input)?,
            client_instance: i32::binary_read(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeCompleteMessage {
    pub version: u32,
}

impl BinaryEncode for HandshakeCompleteMessage {
    fn binary_size(&self) -> usize {
        self.version.binary_size()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        self.version.binary_write(out)
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: u32::binary_read(input)?,
        })
    }
}

/// Supplies the three codec factories needed to register the handshake
/// messages under a given wire protocol.
pub trait HandshakeCodec: Protocol {
    fn init_factory() -> Box<dyn SerializerFactory<Self>>;
    fn response_factory() -> Box<dyn SerializerFactory<Self>>;
    fn complete_factory() -> Box<dyn SerializerFactory<Self>>;
}

impl HandshakeCodec for BinaryProtocol {
    fn init_factory() -> Box<dyn SerializerFactory<BinaryProtocol>> {
        Box::new(BinaryCodecFactory::<HandshakeInitMessage>::new())
    }
    fn response_factory() -> Box<dyn SerializerFactory<BinaryProtocol>> {
        Box::new(BinaryCodecFactory::<HandshakeResponseMessageV1>::new())
    }
    fn complete_factory() -> Box<dyn SerializerFactory<BinaryProtocol>> {
        Box::new(BinaryCodecFactory::<HandshakeCompleteMessage>::new())
    }
}

impl HandshakeCodec for JsonProtocol {
    fn init_factory() -> Box<dyn SerializerFactory<JsonProtocol>> {
        Box::new(JsonCodecFactory::<HandshakeInitMessage>::new())
    }
    fn response_factory() -> Box<dyn SerializerFactory<JsonProtocol>> {
        Box::new(JsonCodecFactory::<HandshakeResponseMessageV1>::new())
    }
    fn complete_factory() -> Box<dyn SerializerFactory<JsonProtocol>> {
        Box::new(JsonCodecFactory::<HandshakeCompleteMessage>::new())
    }
}

/// Registers all three handshake message types on `registry`. Callers
/// should do this before registering their own application types, on both
/// the client and server side.
pub fn register_handshake_messages<P: HandshakeCodec>(
    registry: &mut MessageRegistry<P>,
) -> Result<(), ConfigError> {
    registry.register(
        Box::new(DataMessage::new(
            HANDSHAKE_INIT_TYPE,
            HandshakeInitMessage {
                max_version: PROTOCOL_VERSION_1,
            },
        )),
        P::init_factory(),
    )?;
    registry.register(
        Box::new(DataMessage::new(
            HANDSHAKE_RESPONSE_TYPE,
            HandshakeResponseMessageV1 {
                client_type: 0,
                client_instance: 0,
            },
        )),
        P::response_factory(),
    )?;
    registry.register(
        Box::new(DataMessage::new(
            HANDSHAKE_COMPLETE_TYPE,
            HandshakeCompleteMessage {
                version: PROTOCOL_VERSION_1,
            },
        )),
        P::complete_factory(),
    )?;
    Ok(())
}
