//! Protocol-agnostic (de)serialization façade.
//!
//! A [`Protocol`] knows how to parse the header shared by every message on
//! the wire (message type, recipient type, recipient instance) and hand back
//! a protocol-specific deserializer the payload-specific [`SerializerFactory`]
//! can then pull the payload out of. Two protocols are provided: [`binary`]
//! (hand-rolled field layout, in scope per the external interface spec) and
//! [`json`] (built on `serde_json`, since the JSON DOM/text parser itself is
//! an external collaborator).

pub mod binary;
pub mod json;

use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::CodecError;
use crate::message::Message;

/// Header fields every wire format exposes before the payload is parsed.
pub trait HeaderInfo {
    fn message_type(&self) -> &str;
    fn recipient_type(&self) -> i32;
    fn recipient_instance(&self) -> i32;
}

/// A wire format: parses the shared header and yields a protocol-specific
/// deserializer positioned at the payload.
pub trait Protocol: Send + Sync + 'static {
    type Deserializer<'a>: HeaderInfo;

    fn decode_header<'a>(input: InputBuffer<'a>) -> Result<Self::Deserializer<'a>, CodecError>;
}

/// Produced by a [`SerializerFactory`]; knows its own encoded size before
/// writing so the registry can size the output buffer exactly.
pub trait Serializer {
    fn size(&self) -> usize;
    fn serialize(&self, out: &mut OutputBuffer) -> Result<(), CodecError>;
}

/// Per-message-type, per-protocol object that builds serializers for
/// outbound messages and populates prototypes for inbound ones.
pub trait SerializerFactory<P: Protocol>: Send + Sync {
    fn build_serializer(
        &self,
        message: &dyn Message,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Box<dyn Serializer>;

    fn deserialize_into(
        &self,
        message: &mut dyn Message,
        deserializer: &mut P::Deserializer<'_>,
    ) -> Result<(), CodecError>;
}

/// Hand-rolled binary (de)serialization for a payload type, covering
/// scalars, strings, fixed arrays, dynamic sequences, and maps (§4.12).
pub trait BinaryEncode: Sized {
    fn binary_size(&self) -> usize;
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError>;
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError>;
}

/// JSON (de)serialization for a payload type. The DOM tree itself is an
/// opaque `serde_json::Value`; this crate never walks JSON text by hand.
pub trait JsonPayload: Sized {
    fn to_json(&self) -> serde_json::Value;
    fn from_json(value: &serde_json::Value) -> Result<Self, CodecError>;
}

impl<T> JsonPayload for T
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn to_json(&self) -> serde_json::Value {
        // Payload types are plain data structs; serialization only fails for
        // types serde_json can't represent (e.g. non-string map keys), which
        // none of ours are.
        serde_json::to_value(self).expect("payload type is representable as JSON")
    }

    fn from_json(value: &serde_json::Value) -> Result<Self, CodecError> {
        serde_json::from_value(value.clone()).map_err(CodecError::from)
    }
}
