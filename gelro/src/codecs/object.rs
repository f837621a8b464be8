//! Object shape codecs.
use bytes::Bytes;
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::{ObjectShape, QueryArgs, Value},
};

/// An output object shape, also the 0.12+ argument codec.
///
/// Objects are never encoded as plain values, only as full argument sets
/// via [`Codec::encode_args`].
#[derive(Debug)]
pub(crate) struct ObjectCodec {
    tid: Uuid,
    shape: Arc<ObjectShape>,
    subs: Vec<Arc<dyn Codec>>,
}

impl ObjectCodec {
    pub(crate) fn new(tid: Uuid, shape: ObjectShape, subs: Vec<Arc<dyn Codec>>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, shape: Arc::new(shape), subs })
    }

    /// Argument shapes name positional parameters "0", "1", ...
    fn is_positional(&self) -> bool {
        self.shape.fields().first().is_none_or(|f| f.name == "0")
    }

    fn encode_positional(&self, values: &[Value]) -> Result<Bytes, EncodeError> {
        if values.len() != self.subs.len() {
            return Err(EncodeError::ArityMismatch {
                expected: self.subs.len(),
                got: values.len(),
            });
        }

        let mut elems = WriteBuffer::new();
        for ((field, sub), value) in self.shape.fields().iter().zip(&self.subs).zip(values) {
            elems.write_i32(0); // reserved
            match value {
                Value::Null if field.required => {
                    return Err(EncodeError::MissingArgument(field.name.clone()));
                },
                Value::Null => elems.write_i32(-1),
                value => sub.encode(&mut elems, value)?,
            }
        }
        Ok(wrap_args(elems, self.subs.len()))
    }

    fn encode_named(&self, pairs: &[(String, Value)]) -> Result<Bytes, EncodeError> {
        let unknown: Vec<String> = pairs
            .iter()
            .filter(|(name, _)| self.shape.position(name).is_none())
            .map(|(name, _)| name.clone())
            .collect();
        if !unknown.is_empty() {
            return Err(EncodeError::UnknownArguments(unknown));
        }

        let mut elems = WriteBuffer::new();
        for (field, sub) in self.shape.fields().iter().zip(&self.subs) {
            let value = pairs
                .iter()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| value)
                .unwrap_or(&Value::Null);
            elems.write_i32(0); // reserved
            match value {
                Value::Null if field.required => {
                    return Err(EncodeError::MissingArgument(field.name.clone()));
                },
                Value::Null => elems.write_i32(-1),
                value => sub.encode(&mut elems, value)?,
            }
        }
        Ok(wrap_args(elems, self.subs.len()))
    }
}

impl Codec for ObjectCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Object
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.subs
    }

    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NotArgument("objects"))
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let els = buf.read_u32()? as usize;
        if els != self.subs.len() {
            return Err(DecodeError::ElementCount {
                kind: "Object",
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
        Ok(Value::Object { shape: self.shape.clone(), fields })
    }

    fn encode_args(&self, args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        match args {
            Some(QueryArgs::Positional(values)) if self.is_positional() => {
                self.encode_positional(values)
            },
            Some(QueryArgs::Named(pairs)) if !self.is_positional() => {
                self.encode_named(pairs)
            },
            Some(QueryArgs::Positional(_)) => Err(EncodeError::Unexpected {
                expected: "named arguments",
                got: "positional arguments",
            }),
            Some(QueryArgs::Named(_)) => Err(EncodeError::Unexpected {
                expected: "positional arguments",
                got: "named arguments",
            }),
            None if self.subs.is_empty() => self.encode_positional(&[]),
            None if self.is_positional() => Err(EncodeError::ArityMismatch {
                expected: self.subs.len(),
                got: 0,
            }),
            None => Err(EncodeError::NamedArgumentsExpected),
        }
    }
}

fn wrap_args(elems: WriteBuffer, count: usize) -> Bytes {
    let mut elems = elems;
    let elems = elems.take();
    let mut buf = WriteBuffer::new();
    buf.write_i32(4 + elems.len() as i32);
    buf.write_i32(count as i32);
    buf.write_raw(&elems);
    buf.take()
}

/// A partial-input shape, only present fields travel, indexed by field
/// position. Used for patch/update style arguments such as session
/// configuration.
#[derive(Debug)]
pub(crate) struct SparseObjectCodec {
    tid: Uuid,
    names: Vec<String>,
    subs: Vec<Arc<dyn Codec>>,
}

impl SparseObjectCodec {
    pub(crate) fn new(tid: Uuid, names: Vec<String>, subs: Vec<Arc<dyn Codec>>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, names, subs })
    }
}

impl Codec for SparseObjectCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::SparseObject
    }

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &self.subs
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let Value::SparseObject(pairs) = value else {
            return Err(EncodeError::Unexpected {
                expected: "sparse object",
                got: value.kind_name(),
            });
        };

        let mut count = 0;
        let mut elems = WriteBuffer::new();
        for (name, value) in pairs {
            if value.is_null() {
                continue;
            }
            let Some(i) = self.names.iter().position(|n| n == name) else {
                return Err(EncodeError::UnknownArguments(vec![name.clone()]));
            };
            count += 1;
            elems.write_i32(i as i32);
            self.subs[i].encode(&mut elems, value)?;
        }
        let elems = elems.take();

        buf.write_i32(4 + elems.len() as i32);
        buf.write_i32(count);
        buf.write_raw(&elems);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        let els = buf.read_u32()? as usize;

        let mut pairs = Vec::with_capacity(els);
        for _ in 0..els {
            let i = buf.read_u32()? as usize;
            let (name, sub) = match (self.names.get(i), self.subs.get(i)) {
                (Some(name), Some(sub)) => (name, sub),
                _ => return Err(DecodeError::OutOfRange("sparse object field index")),
            };
            match buf.read_i32()? {
                -1 => pairs.push((name.clone(), Value::Null)),
                elem_len => {
                    let mut elem = buf.slice(elem_len as usize)?;
                    pairs.push((name.clone(), sub.decode(&mut elem)?));
                    elem.finish()?;
                },
            }
        }
        Ok(Value::SparseObject(pairs))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{codecs::base_scalar, model::ShapeField};

    fn field(name: &str, implicit: bool, required: bool) -> ShapeField {
        ShapeField {
            name: name.into(),
            implicit,
            link_property: false,
            required,
        }
    }

    fn named_args_codec() -> Arc<dyn Codec> {
        ObjectCodec::new(
            Uuid::from_u128(0xb0),
            ObjectShape::new(vec![
                field("a", false, true),
                field("b", false, false),
            ]),
            vec![
                base_scalar(Uuid::from_u128(0x105)).unwrap(),
                base_scalar(Uuid::from_u128(0x101)).unwrap(),
            ],
        )
    }

    #[test]
    fn object_decode_matches_shape() {
        let codec = named_args_codec();
        let mut raw = WriteBuffer::new();
        raw.write_u32(2);
        raw.write_i32(0);
        raw.write_i32(8);
        raw.write_i64(42);
        raw.write_i32(0);
        raw.write_i32(-1);

        let mut buf = ReadBuf::new(raw.take());
        let Value::Object { shape, fields } = codec.decode(&mut buf).unwrap() else {
            panic!("expected an object");
        };
        buf.finish().unwrap();
        assert_eq!(shape.fields().len(), 2);
        assert_eq!(fields, [Value::Int64(42), Value::Null]);
    }

    #[test]
    fn named_args_unknown_key() {
        let codec = named_args_codec();
        let args = QueryArgs::Named(vec![
            ("a".into(), Value::Int64(1)),
            ("z".into(), Value::Int64(2)),
        ]);
        let EncodeError::UnknownArguments(names) = codec.encode_args(Some(&args)).unwrap_err()
        else {
            panic!("expected unknown-arguments error");
        };
        assert_eq!(names, ["z"]);
    }

    #[test]
    fn named_args_required_null() {
        let codec = named_args_codec();
        let args = QueryArgs::Named(vec![("b".into(), Value::Str("x".into()))]);
        let EncodeError::MissingArgument(name) = codec.encode_args(Some(&args)).unwrap_err()
        else {
            panic!("expected missing-argument error");
        };
        assert_eq!(name, "a");
    }

    #[test]
    fn positional_args_arity() {
        let codec = ObjectCodec::new(
            Uuid::from_u128(0xb1),
            ObjectShape::new(vec![field("0", false, true)]),
            vec![base_scalar(Uuid::from_u128(0x105)).unwrap()],
        );
        let args = QueryArgs::Positional(vec![]);
        assert!(matches!(
            codec.encode_args(Some(&args)),
            Err(EncodeError::ArityMismatch { expected: 1, got: 0 }),
        ));
        let args = QueryArgs::Positional(vec![Value::Int64(5)]);
        codec.encode_args(Some(&args)).unwrap();
    }

    #[test]
    fn sparse_object_round_trip() {
        let codec = SparseObjectCodec::new(
            Uuid::from_u128(0xb2),
            vec!["x".into(), "y".into(), "z".into()],
            vec![
                base_scalar(Uuid::from_u128(0x105)).unwrap(),
                base_scalar(Uuid::from_u128(0x101)).unwrap(),
                base_scalar(Uuid::from_u128(0x105)).unwrap(),
            ],
        );
        // only present keys are serialized
        let value = Value::SparseObject(vec![
            ("z".into(), Value::Int64(3)),
            ("x".into(), Value::Null),
        ]);
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();

        let mut read = ReadBuf::new(buf.take());
        let len = read.read_i32().unwrap() as usize;
        let mut payload = read.slice(len).unwrap();
        let decoded = codec.decode(&mut payload).unwrap();
        payload.finish().unwrap();
        assert_eq!(
            decoded,
            Value::SparseObject(vec![("z".into(), Value::Int64(3))]),
        );
    }
}
