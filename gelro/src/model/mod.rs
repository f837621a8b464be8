//! Decoded values and their shape metadata.
//!
//! [`Value`] is the generic encode/decode target for every codec. Row
//! shapes are plain metadata ([`ObjectShape`]) shared behind an [`Arc`]
//! across all rows decoded through one codec, serialization walks that
//! metadata generically instead of specializing per shape.
use bytes::Bytes;
use std::sync::Arc;

mod bignum;
mod datetime;
mod memory;
mod range;

pub use bignum::{BigInt, Decimal, ParseNumberError};
pub use datetime::{DateDuration, Duration, MixedSigns, RelativeDuration};
pub use memory::ConfigMemory;
pub use range::Range;

pub use time::{Date as LocalDate, PrimitiveDateTime as LocalDatetime, Time as LocalTime, UtcDateTime as Datetime};
pub use uuid::Uuid;

/// A single decoded database value, or an encodable query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    BigInt(BigInt),
    Decimal(Decimal),
    Str(String),
    Bytes(Bytes),
    Uuid(Uuid),
    Json(serde_json::Value),
    Datetime(Datetime),
    LocalDatetime(LocalDatetime),
    LocalDate(LocalDate),
    LocalTime(LocalTime),
    Duration(Duration),
    RelativeDuration(RelativeDuration),
    DateDuration(DateDuration),
    ConfigMemory(ConfigMemory),
    Array(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    NamedTuple {
        shape: Arc<NamedTupleShape>,
        fields: Vec<Value>,
    },
    Object {
        shape: Arc<ObjectShape>,
        fields: Vec<Value>,
    },
    SparseObject(Vec<(String, Value)>),
    Enum(String),
    Range(Box<Range<Value>>),
}

impl Value {
    /// Human readable kind, used in argument validation errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::Float32(_) => "float32",
            Self::Float64(_) => "float64",
            Self::BigInt(_) => "bigint",
            Self::Decimal(_) => "decimal",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Json(_) => "json",
            Self::Datetime(_) => "datetime",
            Self::LocalDatetime(_) => "local_datetime",
            Self::LocalDate(_) => "local_date",
            Self::LocalTime(_) => "local_time",
            Self::Duration(_) => "duration",
            Self::RelativeDuration(_) => "relative_duration",
            Self::DateDuration(_) => "date_duration",
            Self::ConfigMemory(_) => "memory",
            Self::Array(_) => "array",
            Self::Set(_) => "set",
            Self::Tuple(_) => "tuple",
            Self::NamedTuple { .. } => "named_tuple",
            Self::Object { .. } => "object",
            Self::SparseObject(_) => "sparse_object",
            Self::Enum(_) => "enum",
            Self::Range(_) => "range",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// JSON-style serialization, implicit object fields filtered out.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_opt(false)
    }

    /// JSON-style serialization keeping implicit fields visible.
    pub fn to_json_with_hidden(&self) -> serde_json::Value {
        self.to_json_opt(true)
    }

    fn to_json_opt(&self, show_hidden: bool) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Null => Json::Null,
            Self::Bool(v) => Json::Bool(*v),
            Self::Int16(v) => Json::from(*v),
            Self::Int32(v) => Json::from(*v),
            Self::Int64(v) => Json::from(*v),
            Self::Float32(v) => Json::from(*v),
            Self::Float64(v) => Json::from(*v),
            Self::BigInt(v) => Json::String(v.to_string()),
            Self::Decimal(v) => Json::String(v.to_string()),
            Self::Str(v) => Json::String(v.clone()),
            Self::Bytes(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
            Self::Uuid(v) => Json::String(v.to_string()),
            Self::Json(v) => v.clone(),
            Self::Datetime(v) => Json::String(v.to_string()),
            Self::LocalDatetime(v) => Json::String(v.to_string()),
            Self::LocalDate(v) => Json::String(v.to_string()),
            Self::LocalTime(v) => Json::String(v.to_string()),
            Self::Duration(v) => Json::String(v.to_string()),
            Self::RelativeDuration(v) => Json::String(v.to_string()),
            Self::DateDuration(v) => Json::String(v.to_string()),
            Self::ConfigMemory(v) => Json::String(v.to_string()),
            Self::Enum(v) => Json::String(v.clone()),
            Self::Array(vs) | Self::Set(vs) | Self::Tuple(vs) => {
                Json::Array(vs.iter().map(|v| v.to_json_opt(show_hidden)).collect())
            },
            Self::NamedTuple { shape, fields } => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (name, value) in shape.names().iter().zip(fields) {
                    map.insert(name.clone(), value.to_json_opt(show_hidden));
                }
                Json::Object(map)
            },
            Self::Object { shape, fields } => {
                let mut map = serde_json::Map::new();
                for (field, value) in shape.fields().iter().zip(fields) {
                    if field.implicit && !show_hidden {
                        continue;
                    }
                    map.insert(field.name.clone(), value.to_json_opt(show_hidden));
                }
                Json::Object(map)
            },
            Self::SparseObject(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (name, value) in fields {
                    map.insert(name.clone(), value.to_json_opt(show_hidden));
                }
                Json::Object(map)
            },
            Self::Range(range) => {
                let mut map = serde_json::Map::with_capacity(4);
                let bound = |b: Option<&Value>| match b {
                    Some(v) => v.to_json_opt(show_hidden),
                    None => Json::Null,
                };
                map.insert("lower".into(), bound(range.lower()));
                map.insert("upper".into(), bound(range.upper()));
                map.insert("inc_lower".into(), Json::Bool(range.inc_lower()));
                map.insert("inc_upper".into(), Json::Bool(range.inc_upper()));
                Json::Object(map)
            },
        }
    }
}

/// A full argument set for one query, positional or named.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArgs {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

/// One field of an output object shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeField {
    /// Externally visible name, link properties carry an `@` prefix.
    pub name: String,
    /// Not requested by the query, injected to satisfy a dependency.
    /// Filtered from default JSON serialization.
    pub implicit: bool,
    pub link_property: bool,
    /// The field must be present when the shape encodes arguments.
    pub required: bool,
}

/// Ordered field metadata for one object output shape.
///
/// Shared behind an [`Arc`] by every row decoded through the same codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectShape {
    fields: Vec<ShapeField>,
}

impl ObjectShape {
    pub fn new(fields: Vec<ShapeField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[ShapeField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Ordered field names of a named tuple type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTupleShape {
    names: Vec<String>,
}

impl NamedTupleShape {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn object_json_filters_implicit_fields() {
        let shape = Arc::new(ObjectShape::new(vec![
            ShapeField { name: "id".into(), implicit: true, link_property: false, required: false },
            ShapeField { name: "name".into(), implicit: false, link_property: false, required: false },
        ]));
        let value = Value::Object {
            shape,
            fields: vec![
                Value::Uuid(Uuid::nil()),
                Value::Str("Alice".into()),
            ],
        };

        let json = value.to_json();
        assert_eq!(json, serde_json::json!({ "name": "Alice" }));

        let json = value.to_json_with_hidden();
        assert_eq!(json["id"], serde_json::json!("00000000-0000-0000-0000-000000000000"));
    }
}
