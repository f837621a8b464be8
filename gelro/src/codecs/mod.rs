//! Wire type codecs.
//!
//! A [`Codec`] pairs an encode and a decode strategy for one server type.
//! Composite codecs own their subcodecs, mirroring the recursively
//! described type tree the server sends. Codecs are immutable after
//! construction and shared behind [`Arc`] across queries.
//!
//! Encode writes the value *including* its 4-byte length prefix, decode
//! receives the exact payload with the prefix already stripped.
use bytes::Bytes;
use std::{fmt, sync::{Arc, LazyLock}};
use uuid::Uuid;

use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::{QueryArgs, Value},
};

mod array;
mod datetime;
mod numbers;
mod numerics;
mod object;
mod range;
mod registry;
mod scalars;
mod set;
mod tuple;

pub use registry::CodecsRegistry;

pub(crate) use array::ArrayCodec;
pub(crate) use object::{ObjectCodec, SparseObjectCodec};
pub(crate) use range::RangeCodec;
pub(crate) use scalars::EnumCodec;
pub(crate) use set::SetCodec;
pub(crate) use tuple::{EmptyTupleCodec, NamedTupleCodec, TupleCodec};

/// The codec variants of the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Scalar,
    Array,
    Tuple,
    NamedTuple,
    Object,
    SparseObject,
    Set,
    Enum,
    Range,
    Null,
    EmptyTuple,
}

/// A paired encode/decode strategy for one wire type.
pub trait Codec: fmt::Debug + Send + Sync {
    /// Stable type id from the server's type catalog.
    fn tid(&self) -> Uuid;

    fn kind(&self) -> CodecKind;

    /// Encode `value` with its 4-byte length prefix.
    ///
    /// Validates the runtime shape of `value`, this is the client-side
    /// input validation boundary.
    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError>;

    /// Decode from the exact payload slice, length prefix stripped.
    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError>;

    fn subcodecs(&self) -> &[Arc<dyn Codec>] {
        &[]
    }

    /// Clone this codec under a derived scalar's type id.
    ///
    /// `None` for non-scalar codecs.
    fn derive(&self, _tid: Uuid) -> Option<Arc<dyn Codec>> {
        None
    }

    /// Encode a full argument set for this codec when it is a query input
    /// codec, returns the length-prefixed argument buffer.
    fn encode_args(&self, _args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        Err(EncodeError::InvalidArgumentCodec)
    }
}

/// Declare a base scalar codec.
macro_rules! scalar {
    (
        $(#[$meta:meta])*
        struct $name:ident;
        fn encode(&$self:ident, $buf:ident, $value:ident) $enc:block
        fn decode($dbuf:ident) $dec:block
    ) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub(crate) struct $name {
            tid: uuid::Uuid,
        }

        impl $name {
            pub(crate) fn new(tid: uuid::Uuid) -> std::sync::Arc<dyn crate::codecs::Codec> {
                std::sync::Arc::new(Self { tid })
            }
        }

        impl crate::codecs::Codec for $name {
            fn tid(&self) -> uuid::Uuid {
                self.tid
            }

            fn kind(&self) -> crate::codecs::CodecKind {
                crate::codecs::CodecKind::Scalar
            }

            fn derive(&self, tid: uuid::Uuid) -> Option<std::sync::Arc<dyn crate::codecs::Codec>> {
                Some(Self::new(tid))
            }

            fn encode(
                &$self,
                $buf: &mut crate::buffer::WriteBuffer,
                $value: &crate::model::Value,
            ) -> Result<(), crate::error::EncodeError> $enc

            fn decode(
                &self,
                $dbuf: &mut crate::buffer::ReadBuf,
            ) -> Result<crate::model::Value, crate::error::DecodeError> $dec
        }
    };
}

pub(crate) use scalar;

// ===== Well-known type ids =====

pub(crate) const NULL_CODEC_ID: Uuid = Uuid::from_u128(0);
pub(crate) const EMPTY_TUPLE_ID: Uuid = Uuid::from_u128(0xff);

/// Name of a well-known built-in type id.
pub fn known_type_name(tid: Uuid) -> Option<&'static str> {
    Some(match tid.as_u128() {
        0x001 => "anytype",
        0x002 => "anytuple",
        0x0f0 => "std",
        0x0ff => "empty-tuple",
        0x100 => "std::uuid",
        0x101 => "std::str",
        0x102 => "std::bytes",
        0x103 => "std::int16",
        0x104 => "std::int32",
        0x105 => "std::int64",
        0x106 => "std::float32",
        0x107 => "std::float64",
        0x108 => "std::decimal",
        0x109 => "std::bool",
        0x10a => "std::datetime",
        0x10b => "cal::local_datetime",
        0x10c => "cal::local_date",
        0x10d => "cal::local_time",
        0x10e => "std::duration",
        0x10f => "std::json",
        0x110 => "std::bigint",
        0x111 => "cal::relative_duration",
        0x112 => "cal::date_duration",
        0x130 => "cfg::memory",
        _ => return None,
    })
}

/// Codec for a well-known base scalar type id.
pub(crate) fn base_scalar(tid: Uuid) -> Option<Arc<dyn Codec>> {
    Some(match tid.as_u128() {
        0x100 => scalars::UuidCodec::new(tid),
        0x101 => scalars::StrCodec::new(tid),
        0x102 => scalars::BytesCodec::new(tid),
        0x103 => numbers::Int16Codec::new(tid),
        0x104 => numbers::Int32Codec::new(tid),
        0x105 => numbers::Int64Codec::new(tid),
        0x106 => numbers::Float32Codec::new(tid),
        0x107 => numbers::Float64Codec::new(tid),
        0x108 => numerics::DecimalCodec::new(tid),
        0x109 => scalars::BoolCodec::new(tid),
        0x10a => datetime::DatetimeCodec::new(tid),
        0x10b => datetime::LocalDatetimeCodec::new(tid),
        0x10c => datetime::LocalDateCodec::new(tid),
        0x10d => datetime::LocalTimeCodec::new(tid),
        0x10e => datetime::DurationCodec::new(tid),
        0x10f => scalars::JsonCodec::new(tid),
        0x110 => numerics::BigIntCodec::new(tid),
        0x111 => datetime::RelativeDurationCodec::new(tid),
        0x112 => datetime::DateDurationCodec::new(tid),
        0x130 => datetime::ConfigMemoryCodec::new(tid),
        _ => return None,
    })
}

// ===== Null codec =====

/// Placeholder codec for "no value here", cannot carry data.
#[derive(Debug)]
pub(crate) struct NullCodec {
    tid: Uuid,
}

/// Argument buffer for a query without parameters.
pub(crate) const NULL_ARGS: [u8; 4] = [0; 4];

impl Codec for NullCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Null
    }

    fn encode(&self, _: &mut WriteBuffer, _: &Value) -> Result<(), EncodeError> {
        Err(EncodeError::NullCodec)
    }

    fn decode(&self, _: &mut ReadBuf) -> Result<Value, DecodeError> {
        Err(DecodeError::NullCodec)
    }

    fn encode_args(&self, args: Option<&QueryArgs>) -> Result<Bytes, EncodeError> {
        if args.is_some() {
            return Err(EncodeError::NoArgumentsExpected);
        }
        Ok(Bytes::from_static(&NULL_ARGS))
    }
}

pub(crate) static NULL_CODEC: LazyLock<Arc<dyn Codec>> =
    LazyLock::new(|| Arc::new(NullCodec { tid: NULL_CODEC_ID }));

pub(crate) static EMPTY_TUPLE_CODEC: LazyLock<Arc<dyn Codec>> =
    LazyLock::new(|| Arc::new(EmptyTupleCodec::new(EMPTY_TUPLE_ID)));
