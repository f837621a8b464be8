//! Fixed-width numeric base scalar codecs, big-endian on the wire.
use super::scalar;
use crate::{error::EncodeError, model::Value};

scalar! {
    struct Int16Codec;

    fn encode(&self, buf, value) {
        let Value::Int16(v) = value else {
            return Err(EncodeError::Unexpected { expected: "int16", got: value.kind_name() });
        };
        buf.write_i32(2);
        buf.write_i16(*v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Int16(buf.read_i16()?))
    }
}

scalar! {
    struct Int32Codec;

    fn encode(&self, buf, value) {
        let v = match value {
            Value::Int32(v) => *v,
            Value::Int16(v) => *v as i32,
            other => {
                return Err(EncodeError::Unexpected {
                    expected: "int32",
                    got: other.kind_name(),
                });
            },
        };
        buf.write_i32(4);
        buf.write_i32(v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Int32(buf.read_i32()?))
    }
}

scalar! {
    /// Full-range `i64`, no precision caveats on this side of the wire.
    struct Int64Codec;

    fn encode(&self, buf, value) {
        let v = match value {
            Value::Int64(v) => *v,
            Value::Int32(v) => *v as i64,
            Value::Int16(v) => *v as i64,
            other => {
                return Err(EncodeError::Unexpected {
                    expected: "int64",
                    got: other.kind_name(),
                });
            },
        };
        buf.write_i32(8);
        buf.write_i64(v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Int64(buf.read_i64()?))
    }
}

scalar! {
    struct Float32Codec;

    fn encode(&self, buf, value) {
        let Value::Float32(v) = value else {
            return Err(EncodeError::Unexpected { expected: "float32", got: value.kind_name() });
        };
        buf.write_i32(4);
        buf.write_f32(*v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Float32(buf.read_f32()?))
    }
}

scalar! {
    struct Float64Codec;

    fn encode(&self, buf, value) {
        let v = match value {
            Value::Float64(v) => *v,
            Value::Float32(v) => *v as f64,
            other => {
                return Err(EncodeError::Unexpected {
                    expected: "float64",
                    got: other.kind_name(),
                });
            },
        };
        buf.write_i32(8);
        buf.write_f64(v);
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::Float64(buf.read_f64()?))
    }
}
