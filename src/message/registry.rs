//! Message type registry and codec façade (§4.9).

use std::collections::HashMap;
use std::marker::PhantomData;

use super::{Message, Packet};
use crate::buffer::{InputBuffer, OutputBuffer};
use crate::codec::{HeaderInfo, Protocol, SerializerFactory};
use crate::error::{AddressingError, CodecError, ConfigError};

/// Maps message type names to a prototype (for cloning on deserialize) and a
/// codec factory (for building serializers / populating clones), for one
/// wire protocol `P`.
///
/// Registration happens once at setup time via `&mut self`; afterwards the
/// registry is typically shared behind an `Arc` and only read from, so
/// lookups need no locking.
pub struct MessageRegistry<P: Protocol> {
    prototypes: HashMap<&'static str, Box<dyn Message>>,
    factories: HashMap<&'static str, Box<dyn SerializerFactory<P>>>,
    /// When set, every serialized packet is written into a buffer of this
    /// fixed size rather than one sized exactly to the serializer's report.
    buffer_size: Option<usize>,
    _protocol: PhantomData<P>,
}

impl<P: Protocol> MessageRegistry<P> {
    pub fn new() -> Self {
        Self {
            prototypes: HashMap::new(),
            factories: HashMap::new(),
            buffer_size: None,
            _protocol: PhantomData,
        }
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let mut registry = Self::new();
        registry.buffer_size = Some(buffer_size);
        registry
    }

    /// Registers a message type. Fails if the type is already registered.
    pub fn register(
        &mut self,
        prototype: Box<dyn Message>,
        factory: Box<dyn SerializerFactory<P>>,
    ) -> Result<(), ConfigError> {
        let message_type = prototype.message_type();
        if self.prototypes.contains_key(message_type) {
            return Err(ConfigError::DuplicateMessageType(message_type.to_string()));
        }
        self.prototypes.insert(message_type, prototype);
        self.factories.insert(message_type, factory);
        Ok(())
    }

    pub fn is_registered(&self, message_type: &str) -> bool {
        self.prototypes.contains_key(message_type)
    }

    /// Clones the registered prototype for `message_type`.
    pub fn create(&self, message_type: &str) -> Result<Box<dyn Message>, AddressingError> {
        self.prototypes
            .get(message_type)
            .map(|prototype| prototype.clone_message())
            .ok_or_else(|| AddressingError::UnregisteredType(message_type.to_string()))
    }

    /// Serializes a packet's message plus recipient coordinates into a fresh
    /// output buffer.
    pub fn serialize_packet(&self, packet: &Packet) -> Result<OutputBuffer, CodecError> {
        let message_type = packet.message().message_type();
        let factory = self
            .factories
            .get(message_type)
            .ok_or_else(|| CodecError::UnsupportedType(message_type.to_string()))?;

        let serializer =
            factory.build_serializer(packet.message(), packet.recipient_type(), packet.recipient_instance());
        let capacity = self.buffer_size.unwrap_or_else(|| serializer.size());
        let mut out = OutputBuffer::new(capacity);
        serializer.serialize(&mut out)?;
        Ok(out)
    }

    /// Parses a header from `bytes`, clones the matching prototype, and
    /// populates it via the matching codec factory.
    pub fn deserialize_packet(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        let mut deserializer = P::decode_header(InputBuffer::new(bytes))?;
        let message_type = deserializer.message_type().to_string();

        let prototype = self
            .prototypes
            .get(message_type.as_str())
            .ok_or_else(|| CodecError::UnsupportedType(message_type.clone()))?;
        let factory = self
            .factories
            .get(message_type.as_str())
            .expect("prototype and factory are always registered together");

        let mut message = prototype.clone_message();
        factory.deserialize_into(message.as_mut(), &mut deserializer)?;

        Ok(Packet::new(
            message,
            deserializer.recipient_type(),
            deserializer.recipient_instance(),
        ))
    }
}

impl<P: Protocol> Default for MessageRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::binary::{BinaryCodecFactory, BinaryProtocol};
    use crate::codec::BinaryEncode;
    use crate::message::DataMessage;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    impl BinaryEncode for Ping {
        fn binary_size(&self) -> usize {
            self.0.binary_size()
        }
        fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
            self.0.binary_write(out)
        }
        fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
            Ok(Ping(u32::binary_read(input)?))
        }
    }

    fn registry() -> MessageRegistry<BinaryProtocol> {
        let mut registry = MessageRegistry::new();
        registry
            .register(
                Box::new(DataMessage::new("Ping", Ping(0))),
                Box::new(BinaryCodecFactory::<Ping>::new()),
            )
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register(
                Box::new(DataMessage::new("Ping", Ping(0))),
                Box::new(BinaryCodecFactory::<Ping>::new()),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMessageType(_)));
    }

    #[test]
    fn unknown_type_create_fails() {
        let registry = registry();
        assert!(registry.create("Unknown").is_err());
    }

    #[test]
    fn serialize_then_deserialize_round_trips() {
        let registry = registry();
        let packet = Packet::new(Box::new(DataMessage::new("Ping", Ping(99))), 1, 2);
        let out = registry.serialize_packet(&packet).unwrap();
        let decoded = registry.deserialize_packet(out.as_bytes()).unwrap();

        assert_eq!(decoded.recipient_type(), 1);
        assert_eq!(decoded.recipient_instance(), 2);
        assert_eq!(
            crate::message::downcast::<Ping>(decoded.message()).unwrap().data(),
            &Ping(99)
        );
    }
}
