//! The array codec.
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::Value,
};

/// A 1-dimensional array of one element type.
///
/// The wire protocol restricts argument arrays to scalar elements, and the
/// client only ever sees 1-dimensional arrays.
#[derive(Debug)]
pub(crate) struct ArrayCodec {
    tid: Uuid,
    sub: [Arc<dyn Codec>; 1],
    /// Fixed length declared by the type descriptor, `-1` when dynamic.
    length: i32,
}

impl ArrayCodec {
    pub(crate) fn new(tid: Uuid, sub: Arc<dyn Codec>, length: i32) -> Arc<dyn Codec> {
        Arc::new(Self { tid, sub: [sub], length })
    }

    fn sub(&self) -> &dyn Codec {
        &*self.sub[0]
    }
}

impl Codec for ArrayCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Array
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.sub
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        if !matches!(self.sub().kind(), CodecKind::Scalar | CodecKind::Enum) {
            return Err(EncodeError::CompositeArrayElement);
        }
        let Value::Array(items) = value else {
            return Err(EncodeError::Unexpected { expected: "array", got: value.kind_name() });
        };
        if items.len() > i32::MAX as usize {
            return Err(EncodeError::TooManyElements);
        }

        let mut elems = WriteBuffer::new();
        for item in items {
            match item {
                Value::Null => elems.write_i32(-1),
                item => self.sub().encode(&mut elems, item)?,
            }
        }
        let elems = elems.take();

        buf.write_i32(12 + 8 + elems.len() as i32);
        buf.write_i32(1); // number of dimensions
        buf.write_i32(0); // flags
        buf.write_i32(0); // reserved
        buf.write_i32(items.len() as i32);
        buf.write_i32(1); // lower bound
        buf.write_raw(&elems);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let ndims = buf.read_i32()?;
        buf.discard(4)?; // flags
        buf.discard(4)?; // reserved

        if ndims == 0 {
            return Ok(Value::Array(Vec::new()));
        }
        if ndims != 1 {
            return Err(DecodeError::MultiDimensional);
        }

        let len = buf.read_u32()?;
        if self.length != -1 && len != self.length as u32 {
            return Err(DecodeError::InvalidArraySize {
                expected: self.length as u32,
                got: len,
            });
        }
        buf.discard(4)?; // lower bound

        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            match buf.read_i32()? {
                -1 => items.push(Value::Null),
                elem_len => {
                    let mut elem = buf.slice(elem_len as usize)?;
                    items.push(self.sub().decode(&mut elem)?);
                    elem.finish()?;
                },
            }
        }
        Ok(Value::Array(items))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codecs::base_scalar;
    use bytes::Bytes;

    fn int32_array() -> Arc<dyn Codec> {
        let sub = base_scalar(Uuid::from_u128(0x104)).unwrap();
        ArrayCodec::new(Uuid::from_u128(0xa1), sub, -1)
    }

    fn decode_payload(codec: &dyn Codec, buf: &mut WriteBuffer) -> Result<Value, DecodeError> {
        let mut read = ReadBuf::new(buf.take());
        let len = read.read_i32().unwrap() as usize;
        let mut payload = read.slice(len).unwrap();
        let value = codec.decode(&mut payload)?;
        payload.finish()?;
        Ok(value)
    }

    #[test]
    fn array_round_trip() {
        let codec = int32_array();
        let value = Value::Array(vec![
            Value::Int32(1),
            Value::Null,
            Value::Int32(-3),
        ]);
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        assert_eq!(decode_payload(&*codec, &mut buf).unwrap(), value);
    }

    #[test]
    fn empty_array_round_trip() {
        let codec = int32_array();
        let value = Value::Array(Vec::new());
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        assert_eq!(decode_payload(&*codec, &mut buf).unwrap(), value);
    }

    #[test]
    fn rejects_multiple_dimensions() {
        let codec = int32_array();
        let mut raw = Vec::new();
        raw.extend_from_slice(&2i32.to_be_bytes()); // ndims
        raw.extend_from_slice(&0i32.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        let mut buf = ReadBuf::new(Bytes::from(raw));
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::MultiDimensional),
        ));
    }

    #[test]
    fn rejects_fixed_length_mismatch() {
        let sub = base_scalar(Uuid::from_u128(0x104)).unwrap();
        let codec = ArrayCodec::new(Uuid::from_u128(0xa1), sub, 2);
        let value = Value::Array(vec![Value::Int32(7)]);
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        assert!(matches!(
            decode_payload(&*codec, &mut buf),
            Err(DecodeError::InvalidArraySize { expected: 2, got: 1 }),
        ));
    }

    #[test]
    fn rejects_composite_elements_on_encode() {
        let inner = int32_array();
        let codec = ArrayCodec::new(Uuid::from_u128(0xa2), inner, -1);
        let mut buf = WriteBuffer::new();
        let err = codec
            .encode(&mut buf, &Value::Array(vec![Value::Array(vec![])]))
            .unwrap_err();
        assert!(matches!(err, EncodeError::CompositeArrayElement));
    }
}
