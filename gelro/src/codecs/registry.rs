//! Dynamic type-descriptor parser.
//!
//! The server describes types as a byte stream in dependency order, every
//! entry may only reference entries with a lower position. Walking the
//! stream builds a DAG of [`Codec`] instances, memoized by type id so
//! repeated queries referencing the same types skip reconstruction.
//!
//! The skip path must consume exactly the bytes the build path would,
//! the stream is not self-delimiting at entry granularity. Any new
//! type-class tag has to implement both paths identically.
use bytes::Bytes;
use lru::LruCache;
use std::{num::NonZeroUsize, sync::Arc};
use uuid::Uuid;

use super::{
    ArrayCodec, Codec, EMPTY_TUPLE_CODEC, EMPTY_TUPLE_ID, EnumCodec, NULL_CODEC,
    NULL_CODEC_ID, NamedTupleCodec, ObjectCodec, RangeCodec, SetCodec,
    SparseObjectCodec, TupleCodec, base_scalar, known_type_name, tuple::EmptyTupleCodec,
};
use crate::{
    buffer::ReadBuf,
    error::{ProtocolError, Result},
    model::{ObjectShape, ShapeField},
    protocol::Cardinality,
};

const CODECS_CACHE_SIZE: usize = 1000;
const CODECS_BUILD_CACHE_SIZE: usize = 200;

const CTYPE_SET: u8 = 0;
const CTYPE_SHAPE: u8 = 1;
const CTYPE_BASE_SCALAR: u8 = 2;
const CTYPE_SCALAR: u8 = 3;
const CTYPE_TUPLE: u8 = 4;
const CTYPE_NAMEDTUPLE: u8 = 5;
const CTYPE_ARRAY: u8 = 6;
const CTYPE_ENUM: u8 = 7;
const CTYPE_INPUT_SHAPE: u8 = 8;
const CTYPE_RANGE: u8 = 9;

/// Builds and memoizes codecs from server type descriptors.
pub struct CodecsRegistry {
    /// Long-lived resolved codecs, keyed by type id.
    codecs: LruCache<Uuid, Arc<dyn Codec>>,
    /// Scratch cache for codecs referenced twice within one stream.
    build_cache: LruCache<Uuid, Arc<dyn Codec>>,
}

impl CodecsRegistry {
    pub fn new() -> Self {
        Self {
            codecs: LruCache::new(NonZeroUsize::new(CODECS_CACHE_SIZE).unwrap()),
            build_cache: LruCache::new(NonZeroUsize::new(CODECS_BUILD_CACHE_SIZE).unwrap()),
        }
    }

    pub fn has_codec(&self, tid: &Uuid) -> bool {
        self.codecs.contains(tid) || *tid == NULL_CODEC_ID || *tid == EMPTY_TUPLE_ID
    }

    pub fn get_codec(&mut self, tid: &Uuid) -> Option<Arc<dyn Codec>> {
        if let Some(codec) = self.codecs.get(tid) {
            return Some(codec.clone());
        }
        if *tid == EMPTY_TUPLE_ID {
            return Some(EMPTY_TUPLE_CODEC.clone());
        }
        if *tid == NULL_CODEC_ID {
            return Some(NULL_CODEC.clone());
        }
        None
    }

    /// Parse a full descriptor stream, returns the root (last) codec.
    pub fn build_codec(&mut self, spec: Bytes) -> Result<Arc<dyn Codec>> {
        let mut buf = ReadBuf::new(spec);
        let mut list: Vec<Arc<dyn Codec>> = Vec::new();

        while buf.remaining() > 0 {
            let Some(codec) = self.build_one(&mut buf, &list)? else {
                continue;
            };
            self.codecs.put(codec.tid(), codec.clone());
            list.push(codec);
        }

        match list.last() {
            Some(codec) => Ok(codec.clone()),
            None => Err(ProtocolError::new("descriptor stream yielded no codec").into()),
        }
    }

    fn build_one(
        &mut self,
        buf: &mut ReadBuf,
        list: &[Arc<dyn Codec>],
    ) -> Result<Option<Arc<dyn Codec>>> {
        let t = buf.read_u8()?;

        // reserved extension range, generically skippable
        if (0xf0..=0xff).contains(&t) {
            buf.read_uuid()?;
            let len = buf.read_u32()?;
            buf.discard(len as usize)?;
            return Ok(None);
        }

        let tid = buf.read_uuid()?;

        let mut cached = self.codecs.get(&tid).cloned();
        if cached.is_none() {
            cached = self.build_cache.get(&tid).cloned();
        }
        if let Some(codec) = cached {
            // already have a codec for this tid, advance the cursor past
            // the payload exactly as the build path would
            self.skip_payload(t, buf)?;
            return Ok(Some(codec));
        }

        let codec = self.build_payload(t, tid, buf, list)?;
        self.build_cache.put(tid, codec.clone());
        Ok(Some(codec))
    }

    fn skip_payload(&self, t: u8, buf: &mut ReadBuf) -> Result<()> {
        match t {
            CTYPE_SET | CTYPE_SCALAR | CTYPE_RANGE => {
                buf.discard(2)?;
            },
            CTYPE_SHAPE | CTYPE_INPUT_SHAPE => {
                let els = buf.read_u16()?;
                for _ in 0..els {
                    buf.discard(5)?; // 4 (flags) + 1 (cardinality)
                    let name_len = buf.read_u32()?;
                    buf.discard(name_len as usize + 2)?;
                }
            },
            CTYPE_BASE_SCALAR => { },
            CTYPE_TUPLE => {
                let els = buf.read_u16()?;
                buf.discard(2 * els as usize)?;
            },
            CTYPE_NAMEDTUPLE => {
                let els = buf.read_u16()?;
                for _ in 0..els {
                    let name_len = buf.read_u32()?;
                    buf.discard(name_len as usize + 2)?;
                }
            },
            CTYPE_ARRAY => {
                buf.discard(2)?;
                let dims = buf.read_u16()?;
                if dims != 1 {
                    return Err(multi_dim());
                }
                buf.discard(4)?;
            },
            CTYPE_ENUM => {
                let els = buf.read_u16()?;
                for _ in 0..els {
                    let label_len = buf.read_u32()?;
                    buf.discard(label_len as usize)?;
                }
            },
            _ => return Err(ProtocolError::unknown_descriptor(t).into()),
        }
        Ok(())
    }

    fn build_payload(
        &mut self,
        t: u8,
        tid: Uuid,
        buf: &mut ReadBuf,
        list: &[Arc<dyn Codec>],
    ) -> Result<Arc<dyn Codec>> {
        let codec = match t {
            CTYPE_BASE_SCALAR => match base_scalar(tid) {
                Some(codec) => codec,
                None => return Err(no_base_codec(tid)),
            },

            CTYPE_SHAPE | CTYPE_INPUT_SHAPE => {
                let els = buf.read_u16()?;
                let mut fields = Vec::with_capacity(els as usize);
                let mut subs = Vec::with_capacity(els as usize);
                for _ in 0..els {
                    let flags = buf.read_u32()?;
                    let card = buf.read_u8()?;
                    let name = buf.read_string()?;

                    let pos = buf.read_u16()?;
                    let sub = subcodec(list, pos, "object")?;

                    let link_property = flags & 0b010 != 0;
                    fields.push(ShapeField {
                        name: match link_property {
                            true => format!("@{name}"),
                            false => name,
                        },
                        implicit: flags & 0b001 != 0,
                        link_property,
                        required: Cardinality::from_u8(card)
                            .is_some_and(Cardinality::is_required),
                    });
                    subs.push(sub);
                }

                if t == CTYPE_INPUT_SHAPE {
                    let names = fields.into_iter().map(|f| f.name).collect();
                    SparseObjectCodec::new(tid, names, subs)
                } else {
                    ObjectCodec::new(tid, ObjectShape::new(fields), subs)
                }
            },

            CTYPE_SET => {
                let pos = buf.read_u16()?;
                SetCodec::new(tid, subcodec(list, pos, "set")?)
            },

            CTYPE_SCALAR => {
                let pos = buf.read_u16()?;
                let base = subcodec(list, pos, "scalar")?;
                match base.derive(tid) {
                    Some(codec) => codec,
                    None => {
                        return Err(ProtocolError::new(
                            "could not build scalar codec: base scalar has a non-scalar codec",
                        )
                        .into());
                    },
                }
            },

            CTYPE_TUPLE => {
                let els = buf.read_u16()?;
                if els == 0 {
                    EmptyTupleCodec::arc(tid)
                } else {
                    let mut subs = Vec::with_capacity(els as usize);
                    for _ in 0..els {
                        let pos = buf.read_u16()?;
                        subs.push(subcodec(list, pos, "tuple")?);
                    }
                    TupleCodec::new(tid, subs)
                }
            },

            CTYPE_NAMEDTUPLE => {
                let els = buf.read_u16()?;
                let mut names = Vec::with_capacity(els as usize);
                let mut subs = Vec::with_capacity(els as usize);
                for _ in 0..els {
                    names.push(buf.read_string()?);
                    let pos = buf.read_u16()?;
                    subs.push(subcodec(list, pos, "namedtuple")?);
                }
                NamedTupleCodec::new(tid, names, subs)
            },

            CTYPE_ARRAY => {
                let pos = buf.read_u16()?;
                let dims = buf.read_u16()?;
                if dims != 1 {
                    return Err(multi_dim());
                }
                let dim_len = buf.read_i32()?;
                ArrayCodec::new(tid, subcodec(list, pos, "array")?, dim_len)
            },

            CTYPE_ENUM => {
                let els = buf.read_u16()?;
                let mut members = Vec::with_capacity(els as usize);
                for _ in 0..els {
                    members.push(buf.read_string()?);
                }
                EnumCodec::new(tid, members)
            },

            CTYPE_RANGE => {
                let pos = buf.read_u16()?;
                RangeCodec::new(tid, subcodec(list, pos, "range")?)
            },

            _ => return Err(ProtocolError::unknown_descriptor(t).into()),
        };
        Ok(codec)
    }
}

impl Default for CodecsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecsRegistry")
            .field("codecs", &self.codecs.len())
            .field("build_cache", &self.build_cache.len())
            .finish()
    }
}

fn subcodec(list: &[Arc<dyn Codec>], pos: u16, kind: &'static str) -> Result<Arc<dyn Codec>> {
    match list.get(pos as usize) {
        Some(codec) => Ok(codec.clone()),
        None => Err(ProtocolError::missing_subcodec(kind).into()),
    }
}

fn multi_dim() -> crate::Error {
    ProtocolError::new("cannot handle arrays with more than one dimension").into()
}

fn no_base_codec(tid: Uuid) -> crate::Error {
    match known_type_name(tid) {
        Some(name) => ProtocolError::new(format!("no codec for {name}")).into(),
        None => ProtocolError::new(format!("no codec for the type with ID {tid}")).into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::WriteBuffer;
    use crate::codecs::CodecKind;

    const STR_TID: Uuid = Uuid::from_u128(0x101);
    const INT64_TID: Uuid = Uuid::from_u128(0x105);

    fn base_scalar_entry(buf: &mut WriteBuffer, tid: Uuid) {
        buf.write_u8(CTYPE_BASE_SCALAR);
        buf.write_raw(tid.as_bytes());
    }

    fn named_tuple_entry(buf: &mut WriteBuffer, tid: Uuid, fields: &[(&str, u16)]) {
        buf.write_u8(CTYPE_NAMEDTUPLE);
        buf.write_raw(tid.as_bytes());
        buf.write_u16(fields.len() as u16);
        for (name, pos) in fields {
            buf.write_string(name);
            buf.write_u16(*pos);
        }
    }

    #[test]
    fn build_base_scalar() {
        let mut registry = CodecsRegistry::new();
        let mut buf = WriteBuffer::new();
        base_scalar_entry(&mut buf, INT64_TID);
        let codec = registry.build_codec(buf.take()).unwrap();
        assert_eq!(codec.tid(), INT64_TID);
        assert_eq!(codec.kind(), CodecKind::Scalar);
    }

    #[test]
    fn registry_idempotence() {
        let mut registry = CodecsRegistry::new();
        let mut buf = WriteBuffer::new();
        base_scalar_entry(&mut buf, INT64_TID);
        let stream = buf.take();

        let first = registry.build_codec(stream.clone()).unwrap();
        let second = registry.build_codec(stream).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn skip_build_symmetry() {
        // a stream where the same entries appear twice, the second pass
        // hits the cache and must consume exactly the same bytes
        let mut buf = WriteBuffer::new();
        base_scalar_entry(&mut buf, STR_TID);
        base_scalar_entry(&mut buf, INT64_TID);
        named_tuple_entry(&mut buf, Uuid::from_u128(0xc0), &[("a", 0), ("b", 1)]);
        let once = buf.take();

        let mut twice = WriteBuffer::new();
        twice.write_raw(&once);
        twice.write_raw(&once);

        let mut registry = CodecsRegistry::new();
        let root = registry.build_codec(twice.take()).unwrap();
        assert_eq!(root.kind(), CodecKind::NamedTuple);
        assert_eq!(root.subcodecs().len(), 2);
    }

    #[test]
    fn shape_stream() {
        let mut buf = WriteBuffer::new();
        base_scalar_entry(&mut buf, STR_TID);
        buf.write_u8(CTYPE_SHAPE);
        buf.write_raw(Uuid::from_u128(0xb0).as_bytes());
        buf.write_u16(2);
        // implicit id field
        buf.write_u32(0b001);
        buf.write_u8(b'A');
        buf.write_string("id");
        buf.write_u16(0);
        // link property
        buf.write_u32(0b010);
        buf.write_u8(b'o');
        buf.write_string("note");
        buf.write_u16(0);

        let mut registry = CodecsRegistry::new();
        let codec = registry.build_codec(buf.take()).unwrap();
        assert_eq!(codec.kind(), CodecKind::Object);

        // decode an object through it to observe the shape metadata
        let mut raw = WriteBuffer::new();
        raw.write_u32(2);
        raw.write_i32(0);
        raw.write_string("x");
        raw.write_i32(0);
        raw.write_i32(-1);
        let mut payload = ReadBuf::new(raw.take());
        let crate::model::Value::Object { shape, .. } = codec.decode(&mut payload).unwrap()
        else {
            panic!("expected an object");
        };
        assert!(shape.fields()[0].implicit);
        assert_eq!(shape.fields()[1].name, "@note");
    }

    #[test]
    fn array_and_range_stream() {
        let mut buf = WriteBuffer::new();
        base_scalar_entry(&mut buf, INT64_TID);
        buf.write_u8(CTYPE_ARRAY);
        buf.write_raw(Uuid::from_u128(0xa0).as_bytes());
        buf.write_u16(0); // subcodec pos
        buf.write_u16(1); // ndims
        buf.write_i32(-1);
        buf.write_u8(CTYPE_RANGE);
        buf.write_raw(Uuid::from_u128(0xe0).as_bytes());
        buf.write_u16(0);

        let mut registry = CodecsRegistry::new();
        let root = registry.build_codec(buf.take()).unwrap();
        assert_eq!(root.kind(), CodecKind::Range);
        assert!(registry.get_codec(&Uuid::from_u128(0xa0)).is_some());
    }

    #[test]
    fn annotation_entries_are_skipped() {
        let mut buf = WriteBuffer::new();
        buf.write_u8(0xf1);
        buf.write_raw(Uuid::from_u128(0xdead).as_bytes());
        buf.write_u32(3);
        buf.write_raw(b"abc");
        base_scalar_entry(&mut buf, INT64_TID);

        let mut registry = CodecsRegistry::new();
        let codec = registry.build_codec(buf.take()).unwrap();
        assert_eq!(codec.tid(), INT64_TID);
    }

    #[test]
    fn stream_must_yield_a_codec() {
        let mut buf = WriteBuffer::new();
        buf.write_u8(0xf0);
        buf.write_raw(Uuid::from_u128(1).as_bytes());
        buf.write_u32(0);

        let mut registry = CodecsRegistry::new();
        assert!(registry.build_codec(buf.take()).is_err());
    }

    #[test]
    fn well_known_ids_always_resolve() {
        let mut registry = CodecsRegistry::new();
        assert!(registry.get_codec(&NULL_CODEC_ID).is_some());
        assert!(registry.get_codec(&EMPTY_TUPLE_ID).is_some());
        assert!(registry.has_codec(&NULL_CODEC_ID));
        assert!(registry.get_codec(&Uuid::from_u128(0x7777)).is_none());
    }

    #[test]
    fn unknown_descriptor_tag() {
        let mut buf = WriteBuffer::new();
        buf.write_u8(0x42);
        buf.write_raw(Uuid::from_u128(2).as_bytes());
        let mut registry = CodecsRegistry::new();
        assert!(registry.build_codec(buf.take()).is_err());
    }
}
