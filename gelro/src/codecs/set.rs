//! The set codec.
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::Value,
};

/// An unordered multi-element result, decode only.
///
/// Sets of arrays nest each inner array inside a single-field record
/// envelope on the wire, that envelope is unwrapped here.
#[derive(Debug)]
pub(crate) struct SetCodec {
    tid: Uuid,
    sub: [Arc<dyn Codec>; 1],
}

impl SetCodec {
    pub(crate) fn new(tid: Uuid, sub: Arc<dyn Codec>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, sub: [sub] })
    }

    fn sub(&self) -> &dyn Codec {
        &*self.sub[0]
    }

    fn decode_set_of_arrays(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let ndims = buf.read_i32()?;
        if ndims == 0 {
            return Ok(Value::Set(Vec::new()));
        }
        if ndims != 1 {
            return Err(DecodeError::MultiDimensional);
        }
        buf.discard(4)?; // flags
        let len = buf.read_u32()?;
        buf.discard(4)?; // lower bound

        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            buf.discard(4)?; // array element size
            let rec_size = buf.read_u32()?;
            if rec_size != 1 {
                return Err(DecodeError::SetEnvelope);
            }
            let elem_len = buf.read_i32()?;
            if elem_len == -1 {
                return Err(DecodeError::NullSetElement);
            }
            let mut elem = buf.slice(elem_len as usize)?;
            items.push(self.sub().decode(&mut elem)?);
            elem.finish()?;
        }
        Ok(Value::Set(items))
    }

    fn decode_set(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let ndims = buf.read_i32()?;
        if ndims == 0 {
            return Ok(Value::Set(Vec::new()));
        }
        if ndims != 1 {
            return Err(DecodeError::MultiDimensional);
        }
        buf.discard(4)?; // flags
        let len = buf.read_u32()?;
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
        Ok(Value::Set(items))
    }
}

impl Codec for SetCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Set
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.sub
    }

    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotArgument("sets"))
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        match self.sub().kind() {
            CodecKind::Array => self.decode_set_of_arrays(buf),
            _ => self.decode_set(buf),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codecs::{ArrayCodec, base_scalar};
    use bytes::Bytes;

    #[test]
    fn set_decode() {
        let sub = base_scalar(Uuid::from_u128(0x104)).unwrap();
        let codec = SetCodec::new(Uuid::from_u128(0xd0), sub);

        let mut raw = WriteBuffer::new();
        raw.write_i32(1); // ndims
        raw.write_i32(0); // flags
        raw.write_u32(2); // length
        raw.write_i32(1); // lower bound
        raw.write_i32(4);
        raw.write_i32(10);
        raw.write_i32(-1);

        let mut buf = ReadBuf::new(raw.take());
        let decoded = codec.decode(&mut buf).unwrap();
        buf.finish().unwrap();
        assert_eq!(decoded, Value::Set(vec![Value::Int32(10), Value::Null]));
    }

    #[test]
    fn set_of_arrays_unwraps_envelope() {
        let int32 = base_scalar(Uuid::from_u128(0x104)).unwrap();
        let array = ArrayCodec::new(Uuid::from_u128(0xa1), int32, -1);
        let codec = SetCodec::new(Uuid::from_u128(0xd1), array.clone());

        // one inner array [7] wrapped in a single-field record
        let mut inner = WriteBuffer::new();
        array.encode(&mut inner, &Value::Array(vec![Value::Int32(7)])).unwrap();
        let inner = inner.take();

        let mut raw = WriteBuffer::new();
        raw.write_i32(1); // ndims
        raw.write_i32(0); // flags
        raw.write_u32(1); // length
        raw.write_i32(1); // lower bound
        raw.write_i32(4 + 4 + inner.len() as i32); // array element size
        raw.write_u32(1); // record size
        raw.write_raw(&inner);

        let mut buf = ReadBuf::new(raw.take());
        let decoded = codec.decode(&mut buf).unwrap();
        buf.finish().unwrap();
        assert_eq!(decoded, Value::Set(vec![Value::Array(vec![Value::Int32(7)])]));
    }

    #[test]
    fn set_envelope_violation() {
        let int32 = base_scalar(Uuid::from_u128(0x104)).unwrap();
        let array = ArrayCodec::new(Uuid::from_u128(0xa1), int32, -1);
        let codec = SetCodec::new(Uuid::from_u128(0xd1), array);

        let mut raw = WriteBuffer::new();
        raw.write_i32(1);
        raw.write_i32(0);
        raw.write_u32(1);
        raw.write_i32(1);
        raw.write_i32(8);
        raw.write_u32(2); // record size must be exactly 1
        let mut buf = ReadBuf::new(raw.take());
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::SetEnvelope)));

        let empty = SetCodec::new(
            Uuid::from_u128(0xd2),
            base_scalar(Uuid::from_u128(0x104)).unwrap(),
        );
        let mut buf = ReadBuf::new(Bytes::copy_from_slice(&0i32.to_be_bytes()));
        assert_eq!(empty.decode(&mut buf).unwrap(), Value::Set(Vec::new()));
    }
}
