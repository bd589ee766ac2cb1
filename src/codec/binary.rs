//! Hand-rolled binary wire format (§6): a length-prefixed type name followed
//! by the recipient coordinates, followed by the payload.

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;

use super::{BinaryEncode, HeaderInfo, Protocol, Serializer, SerializerFactory};
use crate::buffer::{InputBuffer, OutputBuffer};
use crate::error::CodecError;
use crate::message::{downcast, downcast_mut, DataMessage, Message, MessageData};

/// Marker type selecting the binary wire format.
pub struct BinaryProtocol;

pub struct BinaryDeserializer<'a> {
    message_type: String,
    recipient_type: i32,
    recipient_instance: i32,
    input: InputBuffer<'a>,
}

impl<'a> BinaryDeserializer<'a> {
    /// Reads one more payload value using the remaining bytes after the
    /// header. Codec factories call this exactly once per payload type.
    pub fn read_payload<T: BinaryEncode>(&mut self) -> Result<T, CodecError> {
        T::binary_read(&mut self.input)
    }
}

impl HeaderInfo for BinaryDeserializer<'_> {
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

impl Protocol for BinaryProtocol {
    type Deserializer<'a> = BinaryDeserializer<'a>;

    fn decode_header<'a>(mut input: InputBuffer<'a>) -> Result<BinaryDeserializer<'a>, CodecError> {
        let len_bytes = input.take(8)?;
        let type_len = u64::from_ne_bytes(len_bytes.try_into().unwrap()) as usize;
        let type_bytes = input.take(type_len)?;
        let message_type = String::from_utf8(type_bytes.to_vec())
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        let recipient_type = i32::from_ne_bytes(input.take(4)?.try_into().unwrap());
        let recipient_instance = i32::from_ne_bytes(input.take(4)?.try_into().unwrap());
        Ok(BinaryDeserializer {
            message_type,
            recipient_type,
            recipient_instance,
            input,
        })
    }
}

/// Serializer for one outbound message: the header plus its payload.
struct BinarySerializer<T: BinaryEncode> {
    message_type: &'static str,
    recipient_type: i32,
    recipient_instance: i32,
    payload: T,
}

impl<T: BinaryEncode> Serializer for BinarySerializer<T> {
    fn size(&self) -> usize {
        8 + self.message_type.len() + 4 + 4 + self.payload.binary_size()
    }

    fn serialize(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&(self.message_type.len() as u64).to_ne_bytes())?;
        out.append(self.message_type.as_bytes())?;
        out.append(&self.recipient_type.to_ne_bytes())?;
        out.append(&self.recipient_instance.to_ne_bytes())?;
        self.payload.binary_write(out)
    }
}

/// Codec factory for `DataMessage<T>` under the binary protocol.
pub struct BinaryCodecFactory<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BinaryCodecFactory<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BinaryCodecFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MessageData + BinaryEncode> SerializerFactory<BinaryProtocol> for BinaryCodecFactory<T> {
    fn build_serializer(
        &self,
        message: &dyn Message,
        recipient_type: i32,
        recipient_instance: i32,
    ) -> Box<dyn Serializer> {
        let data = downcast::<T>(message)
            .expect("codec factory registered for a type it cannot downcast")
            .data()
            .clone();
        Box::new(BinarySerializer {
            message_type: message.message_type(),
            recipient_type,
            recipient_instance,
            payload: data,
        })
    }

    fn deserialize_into(
        &self,
        message: &mut dyn Message,
        deserializer: &mut BinaryDeserializer<'_>,
    ) -> Result<(), CodecError> {
        let payload = deserializer.read_payload::<T>()?;
        downcast_mut::<T>(message)
            .expect("codec factory registered for a type it cannot downcast")
            .set_data(payload);
        Ok(())
    }
}

// --- primitive BinaryEncode specializations (§4.12) ---

macro_rules! impl_binary_encode_int {
    ($t:ty) => {
        impl BinaryEncode for $t {
            fn binary_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }
            fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
                out.append(&self.to_ne_bytes())
            }
            fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
                let bytes = input.take(std::mem::size_of::<$t>())?;
                Ok(<$t>::from_ne_bytes(bytes.try_into().unwrap()))
            }
        }
    };
}

impl_binary_encode_int!(u8);
impl_binary_encode_int!(i8);
impl_binary_encode_int!(u16);
impl_binary_encode_int!(i16);
impl_binary_encode_int!(u32);
impl_binary_encode_int!(i32);
impl_binary_encode_int!(u64);
impl_binary_encode_int!(i64);

impl BinaryEncode for bool {
    fn binary_size(&self) -> usize {
        1
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&[*self as u8])
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        Ok(input.take(1)?[0] != 0)
    }
}

/// Length-prefixed UTF-8 string.
impl BinaryEncode for String {
    fn binary_size(&self) -> usize {
        8 + self.len()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&(self.len() as u64).to_ne_bytes())?;
        out.append(self.as_bytes())
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        let len = u64::from_ne_bytes(input.take(8)?.try_into().unwrap()) as usize;
        let bytes = input.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Length-prefixed dynamic sequence.
impl<T: BinaryEncode> BinaryEncode for Vec<T> {
    fn binary_size(&self) -> usize {
        8 + self.iter().map(BinaryEncode::binary_size).sum::<usize>()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&(self.len() as u64).to_ne_bytes())?;
        for item in self {
            item.binary_write(out)?;
        }
        Ok(())
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        let len = u64::from_ne_bytes(input.take(8)?.try_into().unwrap()) as usize;
        (0..len).map(|_| T::binary_read(input)).collect()
    }
}

/// Unprefixed concatenation: the length is fixed by the type, not the wire.
impl<T: BinaryEncode, const N: usize> BinaryEncode for [T; N] {
    fn binary_size(&self) -> usize {
        self.iter().map(BinaryEncode::binary_size).sum()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        for item in self {
            item.binary_write(out)?;
        }
        Ok(())
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::binary_read(input)?);
        }
        match items.try_into() {
            Ok(array) => Ok(array),
            Err(_) => unreachable!("exactly N items were pushed above"),
        }
    }
}

/// Length-prefixed concatenation of key-value pairs.
impl<K: BinaryEncode + Eq + Hash, V: BinaryEncode> BinaryEncode for HashMap<K, V> {
    fn binary_size(&self) -> usize {
        8 + self
            .iter()
            .map(|(k, v)| k.binary_size() + v.binary_size())
            .sum::<usize>()
    }
    fn binary_write(&self, out: &mut OutputBuffer) -> Result<(), CodecError> {
        out.append(&(self.len() as u64).to_ne_bytes())?;
        for (k, v) in self {
            k.binary_write(out)?;
            v.binary_write(out)?;
        }
        Ok(())
    }
    fn binary_read(input: &mut InputBuffer<'_>) -> Result<Self, CodecError> {
        let len = u64::from_ne_bytes(input.take(8)?.try_into().unwrap()) as usize;
        let mut map = HashMap::with_capacity(len);
        for _ in 0..len {
            let k = K::binary_read(input)?;
            let v = V::binary_read(input)?;
            map.insert(k, v);
        }
        Ok(map)
    }
}
