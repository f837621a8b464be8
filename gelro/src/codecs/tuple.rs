//! Tuple family codecs.
use bytes::Bytes;
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::{NamedTupleShape, QueryArgs, Value},
};

/// Argument buffer for a pre-0.12 query without parameters.
pub(crate) const EMPTY_TUPLE_ARGS: [u8; 8] = [0, 0, 0, 4, 0, 0, 0, 0];

/// A positional heterogeneous product.
#[derive(Debug)]
pub(crate) struct TupleCodec {
    tid: Uuid,
    subs: Vec<Arc<dyn Codec>>,
}

impl TupleCodec {
    pub(crate) fn new(tid: Uuid, subs: Vec<Arc<dyn Codec>>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, subs })
    }
}

impl Codec for TupleCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Tuple
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.subs
    }

    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotArgument("tuples"))
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let els = buf.read_u32()? as usize;
        if els != self.subs.len() {
            return Err(DecodeError::ElementCount {
                kind: "Tuple",
                expected: self.subs.len(),
                got: els,
            });
        }

        let mut fields = Vec::with_capacity(els);
        for sub in &self.subs {
            buf.discard(4)?; // reserved
            match buf.read_i32()? {
                -1 => fields.push(Value::Null),
                elem_len => {
                    let mut elem = buf.slice(elem_len as usize)?;
                    fields.push(sub.decode(&mut elem)?);
                    elem.finish()?;
                },
            }
        }
        Ok(Value::Tuple(fields))
    }

    /// Positional argument encoding for the pre-0.12 protocol.
    fn encode_args(&self, args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        let values = match args {
            Some(QueryArgs::Positional(values)) => values.as_slice(),
            Some(QueryArgs::Named(_)) => {
                return Err(EncodeError::Unexpected {
                    expected: "positional arguments",
                    got: "named arguments",
                });
            },
            None => &[],
        };
        if values.len() != self.subs.len() {
            return Err(EncodeError::ArityMismatch {
                expected: self.subs.len(),
                got: values.len(),
            });
        }

        let mut elems = WriteBuffer::new();
        for (sub, value) in self.subs.iter().zip(values) {
            elems.write_i32(0); // reserved
            match value {
                Value::Null => elems.write_i32(-1),
                value => sub.encode(&mut elems, value)?,
            }
        }
        let elems = elems.take();

        let mut buf = WriteBuffer::new();
        buf.write_i32(4 + elems.len() as i32);
        buf.write_i32(self.subs.len() as i32);
        buf.write_raw(&elems);
        Ok(buf.take())
    }
}

/// A named heterogeneous product.
#[derive(Debug)]
pub(crate) struct NamedTupleCodec {
    tid: Uuid,
    shape: Arc<NamedTupleShape>,
    subs: Vec<Arc<dyn Codec>>,
}

impl NamedTupleCodec {
    pub(crate) fn new(tid: Uuid, names: Vec<String>, subs: Vec<Arc<dyn Codec>>) -> Arc<dyn Codec> {
        Arc::new(Self {
            tid,
            shape: Arc::new(NamedTupleShape::new(names)),
            subs,
        })
    }
}

impl Codec for NamedTupleCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::NamedTuple
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.subs
    }

    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotArgument("named tuples"))
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let els = buf.read_u32()? as usize;
        if els != self.subs.len() {
            return Err(DecodeError::ElementCount {
                kind: "NamedTuple",
                expected: self.subs.len(),
                got: els,
            });
        }

        let mut fields = Vec::with_capacity(els);
        for sub in &self.subs {
            buf.discard(4)?; // reserved
            match buf.read_i32()? {
                -1 => fields.push(Value::Null),
                elem_len => {
                    let mut elem = buf.slice(elem_len as usize)?;
                    fields.push(sub.decode(&mut elem)?);
                    elem.finish()?;
                },
            }
        }
        Ok(Value::NamedTuple { shape: self.shape.clone(), fields })
    }

    /// Named argument encoding for the pre-0.12 protocol.
    ///
    /// Argument keys must be exactly the declared names, unknown keys are
    /// rejected by name.
    fn encode_args(&self, args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        let pairs = match args {
            Some(QueryArgs::Named(pairs)) => pairs.as_slice(),
            Some(QueryArgs::Positional(_)) => {
                return Err(EncodeError::Unexpected {
                    expected: "named arguments",
                    got: "positional arguments",
                });
            },
            None if self.subs.is_empty() => &[],
            None => return Err(EncodeError::NamedArgumentsExpected),
        };

        let unknown: Vec<String> = pairs
            .iter()
            .filter(|(name, _)| !self.shape.contains(name))
            .map(|(name, _)| name.clone())
            .collect();
        if !unknown.is_empty() {
            return Err(EncodeError::UnknownArguments(unknown));
        }
        if pairs.len() != self.subs.len() {
            return Err(EncodeError::ArityMismatch {
                expected: self.subs.len(),
                got: pairs.len(),
            });
        }
        if self.subs.is_empty() {
            return Ok(Bytes::from_static(&EMPTY_TUPLE_ARGS));
        }

        let mut elems = WriteBuffer::new();
        for (name, sub) in self.shape.names().iter().zip(&self.subs) {
            let value = pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value)
                .unwrap_or(&Value::Null);
            match value {
                Value::Null => elems.write_i32(-1),
                value => sub.encode(&mut elems, value)?,
            }
        }
        let elems = elems.take();

        let mut buf = WriteBuffer::new();
        buf.write_i32(4 + elems.len() as i32);
        buf.write_i32(self.subs.len() as i32);
        buf.write_raw(&elems);
        Ok(buf.take())
    }
}

/// The zero-element tuple, a fixed 8-byte wire value.
#[derive(Debug)]
pub(crate) struct EmptyTupleCodec {
    tid: Uuid,
}

impl EmptyTupleCodec {
    pub(crate) fn new(tid: Uuid) -> Self {
        Self { tid }
    }

    pub(crate) fn arc(tid: Uuid) -> Arc<dyn Codec> {
        Arc::new(Self::new(tid))
    }
}

impl Codec for EmptyTupleCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::EmptyTuple
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Tuple(fields) if fields.is_empty() => {
                buf.write_i32(4);
                buf.write_i32(0);
                Ok(())
            },
            Value::Tuple(fields) => Err(EncodeError::ArityMismatch {
                expected: 0,
                got: fields.len(),
            }),
            other => Err(EncodeError::Unexpected {
                expected: "empty tuple",
                got: other.kind_name(),
            }),
        }
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let els = buf.read_i32()?;
        if els != 0 {
            return Err(DecodeError::ElementCount {
                kind: "empty Tuple",
                expected: 0,
                got: els as usize,
            });
        }
        Ok(Value::Tuple(Vec::new()))
    }

    fn encode_args(&self, args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        match args {
            None => Ok(Bytes::from_static(&EMPTY_TUPLE_ARGS)),
            Some(_) => Err(EncodeError::NoArgumentsExpected),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codecs::base_scalar;

    fn pair_codec() -> Arc<dyn Codec> {
        NamedTupleCodec::new(
            Uuid::from_u128(0xc0),
            vec!["a".into(), "b".into()],
            vec![
                base_scalar(Uuid::from_u128(0x105)).unwrap(),
                base_scalar(Uuid::from_u128(0x101)).unwrap(),
            ],
        )
    }

    #[test]
    fn named_tuple_args_round_trip_through_decode() {
        let codec = pair_codec();
        let args = QueryArgs::Named(vec![
            ("a".into(), Value::Int64(7)),
            ("b".into(), Value::Str("x".into())),
        ]);
        let encoded = codec.encode_args(Some(&args)).unwrap();

        let mut read = ReadBuf::new(encoded);
        let len = read.read_i32().unwrap() as usize;
        let mut payload = read.slice(len).unwrap();
        // argument tuples omit the per-element reserved word, pad it back
        // in so the decode side of the codec can be reused
        let mut withres = WriteBuffer::new();
        withres.write_i32(payload.read_i32().unwrap());
        for _ in 0..2 {
            withres.write_i32(0);
            let elen = payload.read_i32().unwrap();
            withres.write_i32(elen);
            withres.write_raw(&payload.read_bytes(elen as usize).unwrap());
        }
        let mut payload = ReadBuf::new(withres.take());
        let decoded = codec.decode(&mut payload).unwrap();
        let Value::NamedTuple { shape, fields } = decoded else {
            panic!("expected a named tuple");
        };
        assert_eq!(shape.names(), ["a", "b"]);
        assert_eq!(fields, [Value::Int64(7), Value::Str("x".into())]);
    }

    #[test]
    fn named_tuple_rejects_unknown_keys() {
        let codec = pair_codec();
        let args = QueryArgs::Named(vec![
            ("a".into(), Value::Int64(1)),
            ("z".into(), Value::Int64(2)),
        ]);
        let err = codec.encode_args(Some(&args)).unwrap_err();
        let EncodeError::UnknownArguments(names) = err else {
            panic!("expected unknown-arguments error, got {err:?}");
        };
        assert_eq!(names, ["z"]);
    }

    #[test]
    fn empty_tuple_args() {
        let codec = EmptyTupleCodec::arc(crate::codecs::EMPTY_TUPLE_ID);
        assert_eq!(codec.encode_args(None).unwrap(), &EMPTY_TUPLE_ARGS[..]);
        let args = QueryArgs::Positional(vec![Value::Int32(1)]);
        assert!(matches!(
            codec.encode_args(Some(&args)),
            Err(EncodeError::NoArgumentsExpected),
        ));
    }
}
