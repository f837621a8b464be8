//! The range codec.
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::{Range, Value},
};

/// Bit 0 of the range flag byte.
const INC_LOWER: u8 = 1 << 0;
/// Bit 1 of the range flag byte.
const INC_UPPER: u8 = 1 << 1;

/// A two-endpoint interval over one scalar type.
///
/// Wire layout: a 1-byte inclusivity bitmask followed by the
/// length-prefixed lower and upper bounds, `-1` for an unbounded end.
#[derive(Debug)]
pub(crate) struct RangeCodec {
    tid: Uuid,
    sub: [Arc<dyn Codec>; 1],
}

impl RangeCodec {
    pub(crate) fn new(tid: Uuid, sub: Arc<dyn Codec>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, sub: [sub] })
    }

    fn sub(&self) -> &dyn Codec {
        &*self.sub[0]
    }

    fn encode_bound(&self, buf: &mut WriteBuffer, bound: Option<&Value>) -> Result<(), EncodeError> {
        match bound {
            Some(value) => self.sub().encode(buf, value),
            None => {
                buf.write_i32(-1);
                Ok(())
            },
        }
    }

    fn decode_bound(&self, buf: &mut ReadBuf) -> Result<Option<Value>, DecodeError> {
        match buf.read_i32()? {
            -1 => Ok(None),
            len => {
                let mut elem = buf.slice(len as usize)?;
                let value = self.sub().decode(&mut elem)?;
                elem.finish()?;
                Ok(Some(value))
            },
        }
    }
}

impl Codec for RangeCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Range
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.sub
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::Range(range) = value else {
            return Err(EncodeError::Unexpected { expected: "range", got: value.kind_name() });
        };

        let mut elems = WriteBuffer::new();
        self.encode_bound(&mut elems, range.lower())?;
        self.encode_bound(&mut elems, range.upper())?;
        let elems = elems.take();

        buf.write_i32(1 + elems.len() as i32);
        let mut flags = 0;
        if range.inc_lower() {
            flags |= INC_LOWER;
        }
        if range.inc_upper() {
            flags |= INC_UPPER;
        }
        buf.write_u8(flags);
        buf.write_raw(&elems);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let flags = buf.read_u8()?;
        let lower = self.decode_bound(buf)?;
        let upper = self.decode_bound(buf)?;
        Ok(Value::Range(Box::new(Range::new(
            lower,
            upper,
            flags & INC_LOWER != 0,
            flags & INC_UPPER != 0,
        ))))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codecs::base_scalar;

    fn int32_range() -> Arc<dyn Codec> {
        let sub = base_scalar(Uuid::from_u128(0x104)).unwrap();
        RangeCodec::new(Uuid::from_u128(0xe0), sub)
    }

    fn round_trip(codec: &dyn Codec, value: Value) -> Value {
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        let mut read = ReadBuf::new(buf.take());
        let len = read.read_i32().unwrap() as usize;
        let mut payload = read.slice(len).unwrap();
        let decoded = codec.decode(&mut payload).unwrap();
        payload.finish().unwrap();
        decoded
    }

    #[test]
    fn range_round_trip() {
        let codec = int32_range();
        let value = Value::Range(Box::new(Range::new(
            Some(Value::Int32(1)),
            Some(Value::Int32(10)),
            true,
            false,
        )));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn unbounded_range_round_trip() {
        let codec = int32_range();
        let value = Value::Range(Box::new(Range::new(
            None,
            Some(Value::Int32(0)),
            false,
            true,
        )));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn flag_bits() {
        let codec = int32_range();
        let value = Value::Range(Box::new(Range::new(None, None, true, true)));
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        let mut read = ReadBuf::new(buf.take());
        read.read_i32().unwrap();
        assert_eq!(read.read_u8().unwrap(), 0b11);
    }
}
