//! String-like base scalar codecs.
use std::sync::Arc;

use uuid::Uuid;

use super::{Codec, CodecKind, scalar};
use crate::{
    buffer::{ReadBuf, WriteBuffer},
    error::{DecodeError, EncodeError},
    model::Value,
};

scalar! {
    struct StrCodec;

    fn encode(&self, buf, value) {
        let Value::Str(v) = value else {
            return Err(EncodeError::Unexpected { expected: "str", got: value.kind_name() });
        };
        buf.write_string(v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Str(buf.consume_as_string()?))
    }
}

scalar! {
    struct BytesCodec;

    fn encode(&self, buf, value) {
        let Value::Bytes(v) = value else {
            return Err(EncodeError::Unexpected { expected: "bytes", got: value.kind_name() });
        };
        buf.write_bytes(v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Bytes(buf.consume_rest()))
    }
}

scalar! {
    struct UuidCodec;

    fn encode(&self, buf, value) {
        let Value::Uuid(v) = value else {
            return Err(EncodeError::Unexpected { expected: "uuid", got: value.kind_name() });
        };
        buf.write_i32(16);
        buf.write_raw(v.as_bytes());
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Uuid(buf.read_uuid()?))
    }
}

scalar! {
    struct BoolCodec;

    fn encode(&self, buf, value) {
        let Value::Bool(v) = value else {
            return Err(EncodeError::Unexpected { expected: "bool", got: value.kind_name() });
        };
        buf.write_i32(1);
        buf.write_u8(*v as u8);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Bool(buf.read_u8()? != 0))
    }
}

scalar! {
    /// `std::json`, a 1-byte format marker followed by the utf8 text.
    struct JsonCodec;

    fn encode(&self, buf, value) {
        let Value::Json(v) = value else {
            return Err(EncodeError::Unexpected { expected: "json", got: value.kind_name() });
        };
        let text = v.to_string();
        buf.write_i32(1 + text.len() as i32);
        buf.write_u8(1);
        buf.write_raw(text.as_bytes());
        Ok(())
    }

    fn decode(buf) {
        let format = buf.read_u8()?;
        if format != 1 {
            return Err(DecodeError::JsonFormat(format));
        }
        let text = buf.consume_as_string()?;
        Ok(Value::Json(serde_json::from_str(&text)?))
    }
}

/// An enumeration type, the wire value is one of the declared labels.
///
/// Server-side ordering customization is not reproduced, the label passes
/// through as a plain string.
#[derive(Debug)]
pub(crate) struct EnumCodec {
    tid: Uuid,
    members: Vec<String>,
}

impl EnumCodec {
    pub(crate) fn new(tid: Uuid, members: Vec<String>) -> Arc<dyn Codec> {
        Arc::new(Self { tid, members })
    }
}

impl Codec for EnumCodec {
    fn tid(&self) -> Uuid {
        self.tid
    }

    fn kind(&self) -> CodecKind {
        CodecKind::Enum
    }

    fn encode(&self, buf: &mut WriteBuffer, value: &Value) -> Result<(), EncodeError> {
        let label = match value {
            Value::Enum(v) => v,
            Value::Str(v) => v,
            other => {
                return Err(EncodeError::Unexpected {
                    expected: "enum label",
                    got: other.kind_name(),
                });
            },
        };
        if !self.members.is_empty() && !self.members.iter().any(|m| m == label) {
            return Err(EncodeError::Unexpected {
                expected: "declared enum label",
                got: "unknown label",
            });
        }
        buf.write_string(label);
        Ok(())
    }

    fn decode(&self, buf: &mut ReadBuf) -> Result<Value, DecodeError> {
        Ok(Value::Enum(buf.consume_as_string()?))
    }
}
