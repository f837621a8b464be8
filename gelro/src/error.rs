//! `gelro` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, io, sync::Arc};

use bytes::Bytes;

use crate::{buffer::BufferError, common::unit_error};

/// A specialized [`Result`] type for `gelro` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `gelro` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub(crate) fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `gelro` library.
pub enum ErrorKind {
    /// Framing or overread violation.
    Buffer(BufferError),
    /// The server sent something the protocol does not allow here.
    Protocol(ProtocolError),
    Io(io::Error),
    /// An error reported by the server.
    Database(ServerError),
    /// Argument validation failed before any bytes were sent.
    Encode(EncodeError),
    /// A row value could not be decoded.
    Decode(DecodeError),
    /// A required-single query returned no data.
    NoData(NoDataError),
    /// The server demands an authentication flow this core does not speak.
    UnsupportedAuth(UnsupportedAuth),
    /// The connection was torn down, the original failure is cached.
    Aborted(Aborted),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<BufferError>e => ErrorKind::Buffer(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<ServerError>e => ErrorKind::Database(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<NoDataError>e => ErrorKind::NoData(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<Aborted>e => ErrorKind::Aborted(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::NoData(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Aborted(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ===== ProtocolError =====

/// The server violated the wire protocol.
pub struct ProtocolError {
    message: Cow<'static, str>,
}

impl ProtocolError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self { message: message.into() }
    }

    pub(crate) fn unexpected(mtype: u8, phase: &'static str) -> Self {
        Self::new(format!("unexpected message {:?} while {phase}", mtype as char))
    }

    pub(crate) fn unknown_descriptor(tag: u8) -> Self {
        Self::new(format!("no codec implementation for server data class {tag}"))
    }

    pub(crate) fn missing_subcodec(kind: &'static str) -> Self {
        Self::new(format!("could not build {kind} codec: missing subcodec"))
    }
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ===== EncodeError =====

/// An argument failed client-side validation.
///
/// Raised before anything is written to the wire.
pub enum EncodeError {
    /// The runtime shape of the value does not match the codec.
    Unexpected { expected: &'static str, got: &'static str },
    /// This value kind can never appear as a query argument.
    NotArgument(&'static str),
    /// Named arguments not declared by the query.
    UnknownArguments(Vec<String>),
    /// A non-optional argument received null.
    MissingArgument(String),
    /// Argument count does not match the codec.
    ArityMismatch { expected: usize, got: usize },
    /// Arguments were provided to a query without parameters.
    NoArgumentsExpected,
    /// The query declares named parameters but got none.
    NamedArgumentsExpected,
    /// A `Duration` with calendar components hit the absolute codec.
    CalendarComponent(&'static str),
    /// Array encoding only supports scalar elements.
    CompositeArrayElement,
    /// Array length exceeds the wire limit.
    TooManyElements,
    /// The null codec can never carry a value.
    NullCodec,
    /// The negotiated protocol produced a codec that cannot encode
    /// arguments at all.
    InvalidArgumentCodec,
}

impl std::error::Error for EncodeError { }

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unexpected { expected, got } => {
                write!(f, "a {expected} was expected, got {got}")
            },
            Self::NotArgument(kind) => {
                write!(f, "{kind} cannot be passed in query arguments")
            },
            Self::UnknownArguments(names) => {
                write!(f, "unused named argument(s): \"{}\"", names.join("\", \""))
            },
            Self::MissingArgument(name) => {
                write!(f, "argument {name} is required, but received null")
            },
            Self::ArityMismatch { expected, got } => {
                write!(f, "expected {expected} argument(s), got {got}")
            },
            Self::NoArgumentsExpected => f.write_str(
                "this query does not contain any query parameters, \
                 but query arguments were provided",
            ),
            Self::NamedArgumentsExpected => {
                f.write_str("one or more named arguments expected, received none")
            },
            Self::CalendarComponent(field) => {
                write!(f, "cannot encode a Duration with a non-zero number of {field}")
            },
            Self::CompositeArrayElement => {
                f.write_str("only arrays of scalars are supported")
            },
            Self::TooManyElements => f.write_str("too many elements in array"),
            Self::NullCodec => f.write_str("null codec cannot be used to encode data"),
            Self::InvalidArgumentCodec => f.write_str("invalid input codec"),
        }
    }
}

impl fmt::Debug for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ===== DecodeError =====

/// A wire value could not be decoded.
pub enum DecodeError {
    Buffer(BufferError),
    /// Multi-dimensional arrays are not supported.
    MultiDimensional,
    /// Array length differs from the codec's declared fixed length.
    InvalidArraySize { expected: u32, got: u32 },
    /// Wire element count differs from the codec's subcodec count.
    ElementCount { kind: &'static str, expected: usize, got: usize },
    /// Nested array sets must wrap elements in single-field records.
    SetEnvelope,
    /// Null element inside a nested array set.
    NullSetElement,
    /// Unknown numeric sign marker.
    BadSign,
    /// `std::bigint` carrying a fractional part.
    FractionalBigInt,
    /// Reserved duration fields must be zero.
    ReservedDuration,
    /// Unknown json format marker.
    JsonFormat(u8),
    Json(serde_json::Error),
    /// The wire value does not fit the target domain type.
    OutOfRange(&'static str),
    /// The null codec can never carry a value.
    NullCodec,
}

impl From<BufferError> for DecodeError {
    fn from(e: BufferError) -> Self {
        Self::Buffer(e)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(e) => e.fmt(f),
            Self::MultiDimensional => {
                f.write_str("only 1-dimensional arrays are supported")
            },
            Self::InvalidArraySize { expected, got } => {
                write!(f, "invalid array size: received {got}, expected {expected}")
            },
            Self::ElementCount { kind, expected, got } => {
                write!(f, "cannot decode {kind}: expected {expected} elements, got {got}")
            },
            Self::SetEnvelope => f.write_str(
                "expected a record with a single element as an array set element envelope",
            ),
            Self::NullSetElement => {
                f.write_str("unexpected NULL value in array set element")
            },
            Self::BadSign => f.write_str("bad numeric sign data"),
            Self::FractionalBigInt => f.write_str("bigint data has fractional part"),
            Self::ReservedDuration => {
                f.write_str("non-zero reserved bytes in duration")
            },
            Self::JsonFormat(format) => {
                write!(f, "unexpected json format marker {format}")
            },
            Self::Json(e) => e.fmt(f),
            Self::OutOfRange(what) => write!(f, "value out of range for {what}"),
            Self::NullCodec => f.write_str("null codec cannot be used to decode data"),
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

// ===== ServerError =====

/// An error decoded from a server Error message.
///
/// Does not abort the connection, the server always returns to a known
/// state with Sync.
pub struct ServerError {
    code: u32,
    kind: ServerErrorKind,
    message: String,
    attributes: Vec<(u16, Bytes)>,
}

impl ServerError {
    pub(crate) fn new(code: u32, message: String, attributes: Vec<(u16, Bytes)>) -> Self {
        Self {
            kind: ServerErrorKind::resolve(code),
            code,
            message,
            attributes,
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn kind(&self) -> ServerErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Raw error attributes as sent by the server.
    pub fn attributes(&self) -> &[(u16, Bytes)] {
        &self.attributes
    }
}

impl std::error::Error for ServerError { }

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}Error: {}", self.kind, self.message)
    }
}

impl fmt::Debug for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Structured classification of server error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    InternalServer,
    UnsupportedFeature,
    Protocol,
    BinaryProtocol,
    UnsupportedProtocolVersion,
    TypeSpecNotFound,
    UnexpectedMessage,
    InputData,
    ResultCardinalityMismatch,
    Capability,
    UnsupportedCapability,
    DisabledCapability,
    Query,
    InvalidSyntax,
    InvalidType,
    InvalidReference,
    Schema,
    SchemaDefinition,
    QueryTimeout,
    Execution,
    InvalidValue,
    DivisionByZero,
    NumericOutOfRange,
    Integrity,
    ConstraintViolation,
    CardinalityViolation,
    MissingRequired,
    Transaction,
    TransactionConflict,
    TransactionSerialization,
    TransactionDeadlock,
    ParameterTypeMismatch,
    StateMismatch,
    Configuration,
    Access,
    Authentication,
    Unknown,
}

/// Pre-conflict-hierarchy codes still emitted by old servers.
const LEGACY_CODES: [(u32, u32); 2] = [
    (0x0503_0001, 0x0503_0101), // TransactionSerializationError
    (0x0503_0002, 0x0503_0102), // TransactionDeadlockError
];

impl ServerErrorKind {
    /// Resolve a numeric error code, walking up the code hierarchy when
    /// the exact code is unknown.
    pub fn resolve(code: u32) -> Self {
        let code = LEGACY_CODES
            .iter()
            .find(|(old, _)| *old == code)
            .map_or(code, |(_, new)| *new);

        for mask in [0xffff_ffff, 0xffff_ff00, 0xffff_0000, 0xff00_0000u32] {
            if let Some(kind) = Self::lookup(code & mask) {
                return kind;
            }
        }
        Self::Unknown
    }

    fn lookup(code: u32) -> Option<Self> {
        Some(match code {
            0x0100_0000 => Self::InternalServer,
            0x0200_0000 => Self::UnsupportedFeature,
            0x0300_0000 => Self::Protocol,
            0x0301_0000 => Self::BinaryProtocol,
            0x0301_0001 => Self::UnsupportedProtocolVersion,
            0x0301_0002 => Self::TypeSpecNotFound,
            0x0301_0003 => Self::UnexpectedMessage,
            0x0302_0000 => Self::InputData,
            0x0303_0000 => Self::ResultCardinalityMismatch,
            0x0304_0000 => Self::Capability,
            0x0304_0100 => Self::UnsupportedCapability,
            0x0304_0200 => Self::DisabledCapability,
            0x0400_0000 => Self::Query,
            0x0401_0000 => Self::InvalidSyntax,
            0x0402_0000 => Self::InvalidType,
            0x0403_0000 => Self::InvalidReference,
            0x0404_0000 => Self::Schema,
            0x0405_0000 => Self::SchemaDefinition,
            0x0406_0000 => Self::QueryTimeout,
            0x0500_0000 => Self::Execution,
            0x0501_0000 => Self::InvalidValue,
            0x0501_0001 => Self::DivisionByZero,
            0x0501_0002 => Self::NumericOutOfRange,
            0x0502_0000 => Self::Integrity,
            0x0502_0001 => Self::ConstraintViolation,
            0x0502_0002 => Self::CardinalityViolation,
            0x0502_0003 => Self::MissingRequired,
            0x0503_0000 => Self::Transaction,
            0x0503_0100 => Self::TransactionConflict,
            0x0503_0101 => Self::TransactionSerialization,
            0x0503_0102 => Self::TransactionDeadlock,
            0x0505_0000 => Self::ParameterTypeMismatch,
            0x0506_0000 => Self::StateMismatch,
            0x0600_0000 => Self::Configuration,
            0x0700_0000 => Self::Access,
            0x0701_0000 => Self::Authentication,
            _ => return None,
        })
    }
}

// ===== Leaf errors =====

unit_error! {
    /// A required-single query returned no data.
    pub struct NoDataError("query returned no data");
}

/// The server demands an authentication method this core does not speak.
pub struct UnsupportedAuth {
    pub method: u32,
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported authentication method {}", self.method)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// The connection is permanently closed.
///
/// The reason is captured once at abort time and replayed to every
/// subsequent call.
#[derive(Clone)]
pub struct Aborted {
    reason: Arc<str>,
}

impl Aborted {
    pub(crate) fn new(reason: impl fmt::Display) -> Self {
        Self { reason: reason.to_string().into() }
    }

    pub(crate) fn closed() -> Self {
        Self { reason: "client has been closed".into() }
    }
}

impl std::error::Error for Aborted { }

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection aborted: {}", self.reason)
    }
}

impl fmt::Debug for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_exact_and_parent() {
        assert_eq!(
            ServerErrorKind::resolve(0x0502_0001),
            ServerErrorKind::ConstraintViolation,
        );
        // unknown leaf resolves to its parent
        assert_eq!(
            ServerErrorKind::resolve(0x0501_00ff),
            ServerErrorKind::InvalidValue,
        );
        assert_eq!(ServerErrorKind::resolve(0x7700_0000), ServerErrorKind::Unknown);
    }

    #[test]
    fn resolve_legacy_remap() {
        assert_eq!(
            ServerErrorKind::resolve(0x0503_0001),
            ServerErrorKind::TransactionSerialization,
        );
        assert_eq!(
            ServerErrorKind::resolve(0x0503_0002),
            ServerErrorKind::TransactionDeadlock,
        );
    }
}
