//! JSON wire format (§6): a single flattened root object written as
//! null-terminated UTF-8 text. The JSON text itself is produced by
//! `serde_json`, which this crate treats as the opaque string-to-tree-to-value
//! service the core spec calls for; no hand-rolled JSON parsing happens here.

use std::marker::PhantomData;

use serde_json::{Map, Value};

use super::{HeaderInfo, JsonPayload, Protocol, Serializer, SerializerFactory};
use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::CodecError;
use crate::message::{downcast, downcast_mut, DataMessage, Message, MessageData};

/// Marker type selecting the JSON wire format.
pub struct JsonProtocol;

pub struct JsonDeserializer {
    message_type: String,
    recipient_type: i32,
    recipient_instance: i32,
    data: Value,
}

impl JsonDeserializer {
    pub fn read_payload<T: JsonPayload>(&self) -> Result<T, CodecError> {
        T::from_json(&self.data)
    }
}

impl HeaderInfo for JsonDeserializer {
    fn message_type(&self) -> &str {
        &self.message_type
    }
    fn recipient_type(&self) -> i32 {
        self.recipient_type
    }
    fn recipient_instance(&self) -> i32 {
        self.recipient_instance
    }
}

impl Protocol for JsonProtocol {
    // The deserializer doesn't borrow from the input (it owns a parsed
    // `Value`), so the lifetime parameter required by the `Protocol` trait
    // goes unused here.
    type Deserializer<'a> = JsonDeserializer;

    fn decode_header<'a>(input: InputBuffer<'a>) -> Result<JsonDeserializer, CodecError> {
        let bytes = input.peek_remaining();
        // Strip the trailing null terminator if present.
        let text_bytes = match bytes.split_last() {
            Some((0, rest)) => rest,
            _ => bytes,
        };
        let text =
            std::str::from_utf8(text_bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let root: Value = serde_json::from_str(text)?;

        let message_type = root
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::Malformed("missing 'message' field".into()))?
            .to_string();
        let recipient_type = root
            .get("type")
            .and_then(Value::as_i64)
            .ok_or_else(|| CodecError::Malformed("missing 'type' field".into()))? as i32;
        let recipient_instance = root
            .get("instance")
            .and_then(Value::as_i64)
            .ok_or_else(|| CodecError::Malformed("missing 'instance' field".into()))?
            as i32;
        let data = root.get("data").cloned().unwrap_or(Value::Null);

        Ok(JsonDeserializer {
            message_type,
            recipient_type,
            recipient_instance,
            data,
        })
    }
}

/// Serializer for one outbound message. The encoded bytes are built eagerly
/// so `size()` is exact.
struct JsonSerializer {
    encoded: Vec<u8>,
}

impl Serializer for JsonSerializer {
    fn size(&self) -> usize {
        self.encoded.len()
    }

    fn serialize(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&self.encoded)
    }
}

fn build_root(message_type: &str, recipient_type: i32, recipient_instance: i32, data: Value) -> Vec<u8> {
    // serde_json's `Map` (without the `preserve_order` feature) is backed by
    // a `BTreeMap`, so keys serialize in lexicographic order: data, instance,
    // message, type — matching the wire layout in §6 without needing to
    // hand-assemble the text.
    let mut root = Map::new();
    root.insert("data".to_string(), data);
    root.insert("instance".to_string(), Value::from(recipient_instance));
    root.insert("message".to_string(), Value::from(message_type));
    root.insert("type".to_string(), Value::from(recipient_type));

    let mut encoded = serde_json::to_vec(&Value::Object(root)).expect("root object is valid JSON");
    encoded.push(0);
    encoded
}

/// Codec factory for `DataMessage<T>` under the JSON protocol.
pub struct JsonCodecFactory<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodecFactory<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodecFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageData + JsonPayload> SerializerFactory<JsonProtocol> for JsonCodecFactory<T> {
    fn build_serializer(
        &self,
        message: &dyn Message,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Box<dyn Serializer> {
        let data = downcast::<T>(message)
            .expect("codec factory registered for a type it cannot downcast")
            .data()
            .to_json();
        let encoded = build_root(message.message_type(), recipient_type, recipient_instance, data);
        Box::new(JsonSerializer { encoded })
    }

    fn deserialize_into(
        &self,
        message: &mut dyn Message,
        deserializer: &mut JsonDeserializer,
    ) -> Result<(), CodecError> {
        let payload = deserializer.read_payload::<T>()?;
        downcast_mut::<T>(message)
            .expect("codec factory registered for a type it cannot downcast")
            .set_data(payload);
        Ok(())
    }
}
