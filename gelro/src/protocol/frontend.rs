//! Frontend protocol messages.
use uuid::Uuid;

use super::{Cardinality, OutputFormat, mtype};
use crate::buffer::WriteMessageBuffer;

/// A type which can be written as a framed frontend message.
pub trait FrontendMessage {
    /// Message type byte.
    const MSGTYPE: u8;

    /// Write the message body.
    fn encode(self, buf: &mut WriteMessageBuffer);
}

/// Frame and write a frontend message into `buf`.
pub fn write<F: FrontendMessage>(message: F, buf: &mut WriteMessageBuffer) {
    buf.begin_message(F::MSGTYPE);
    message.encode(buf);
    buf.end_message();
}

/// Opens the protocol, first message on a new connection.
pub struct ClientHandshake<'a> {
    pub major: u16,
    pub minor: u16,
    /// Connection parameters, typically `user` and `database`.
    pub params: &'a [(&'a str, &'a str)],
}

impl FrontendMessage for ClientHandshake<'_> {
    const MSGTYPE: u8 = mtype::CLIENT_HANDSHAKE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        buf.write_u16(self.major);
        buf.write_u16(self.minor);
        buf.write_u16(self.params.len() as u16);
        for (name, value) in self.params {
            buf.write_string(name);
            buf.write_string(value);
        }
        // no protocol extensions
        buf.write_u16(0);
    }
}

/// Fields shared between Parse and Execute.
pub struct ParseParams<'a> {
    pub allowed_capabilities: u64,
    pub compilation_flags: u64,
    pub implicit_limit: u64,
    pub output_format: OutputFormat,
    pub expect_one: bool,
    pub query: &'a str,
    pub state_typedesc_id: Uuid,
    /// Length-prefixed encoded session state, empty for the default state.
    pub state_data: &'a [u8],
}

impl ParseParams<'_> {
    fn write(&self, buf: &mut WriteMessageBuffer) {
        buf.write_headers(&[]);
        buf.write_u64(self.allowed_capabilities);
        buf.write_u64(self.compilation_flags);
        buf.write_u64(self.implicit_limit);
        buf.write_u8(self.output_format as u8);
        buf.write_u8(match self.expect_one {
            true => Cardinality::AtMostOne as u8,
            false => Cardinality::Many as u8,
        });
        buf.write_string(self.query);
        buf.write_raw(self.state_typedesc_id.as_bytes());
        if self.state_data.is_empty() {
            buf.write_i32(0);
        } else {
            buf.write_raw(self.state_data);
        }
    }
}

/// Compile a statement, response carries its type descriptors.
pub struct Parse<'a>(pub ParseParams<'a>);

impl FrontendMessage for Parse<'_> {
    const MSGTYPE: u8 = mtype::PARSE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        self.0.write(buf);
    }
}

/// Combined parse-and-execute carrying codec fingerprints.
///
/// If the fingerprints still match the server streams data directly,
/// otherwise it responds with a fresh CommandDataDescription first.
pub struct Execute<'a> {
    pub params: ParseParams<'a>,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
    /// Arguments already encoded by the input codec, with length prefix.
    pub arguments: &'a [u8],
}

impl FrontendMessage for Execute<'_> {
    const MSGTYPE: u8 = mtype::EXECUTE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        self.params.write(buf);
        buf.write_raw(self.input_typedesc_id.as_bytes());
        buf.write_raw(self.output_typedesc_id.as_bytes());
        buf.write_raw(self.arguments);
    }
}

/// Pre-1.0 Prepare message.
pub struct LegacyParse<'a> {
    pub output_format: OutputFormat,
    pub expect_one: bool,
    pub query: &'a str,
    /// 8-byte capability restriction mask.
    pub allow_capabilities: &'a [u8],
}

impl FrontendMessage for LegacyParse<'_> {
    const MSGTYPE: u8 = mtype::PARSE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        buf.write_headers(&[
            (super::header::EXPLICIT_OBJECTIDS, b"true"),
            (super::header::ALLOW_CAPABILITIES, self.allow_capabilities),
        ]);
        buf.write_u8(self.output_format as u8);
        buf.write_u8(match self.expect_one {
            true => Cardinality::AtMostOne as u8,
            false => Cardinality::Many as u8,
        });
        // statement name, always unnamed
        buf.write_string("");
        buf.write_string(self.query);
    }
}

/// Pre-1.0 Describe for the unnamed statement.
pub struct LegacyDescribe;

impl FrontendMessage for LegacyDescribe {
    const MSGTYPE: u8 = mtype::LEGACY_DESCRIBE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        buf.write_headers(&[]);
        buf.write_u8(b'T');
        buf.write_string("");
    }
}

/// Pre-1.0 Execute for the unnamed statement.
pub struct LegacyExecute<'a> {
    pub allow_capabilities: &'a [u8],
    /// Arguments already encoded by the input codec, with length prefix.
    pub arguments: &'a [u8],
}

impl FrontendMessage for LegacyExecute<'_> {
    const MSGTYPE: u8 = mtype::LEGACY_EXECUTE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        buf.write_headers(&[
            (super::header::ALLOW_CAPABILITIES, self.allow_capabilities),
        ]);
        buf.write_string("");
        buf.write_raw(self.arguments);
    }
}

/// Pre-1.0 combined parse-and-execute.
pub struct LegacyOptimisticExecute<'a> {
    pub output_format: OutputFormat,
    pub expect_one: bool,
    pub query: &'a str,
    pub input_typedesc_id: Uuid,
    pub output_typedesc_id: Uuid,
    pub arguments: &'a [u8],
    pub allow_capabilities: &'a [u8],
}

impl FrontendMessage for LegacyOptimisticExecute<'_> {
    const MSGTYPE: u8 = mtype::EXECUTE;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        buf.write_headers(&[
            (super::header::EXPLICIT_OBJECTIDS, b"true"),
            (super::header::ALLOW_CAPABILITIES, self.allow_capabilities),
        ]);
        buf.write_u8(self.output_format as u8);
        buf.write_u8(match self.expect_one {
            true => Cardinality::AtMostOne as u8,
            false => Cardinality::Many as u8,
        });
        buf.write_string(self.query);
        buf.write_raw(self.input_typedesc_id.as_bytes());
        buf.write_raw(self.output_typedesc_id.as_bytes());
        buf.write_raw(self.arguments);
    }
}

/// Pre-1.0 script execution, the only path allowing transaction control.
pub struct LegacyScript<'a> {
    pub query: &'a str,
    /// Capability restriction, `None` for the privileged path.
    pub allow_capabilities: Option<&'a [u8]>,
}

impl FrontendMessage for LegacyScript<'_> {
    const MSGTYPE: u8 = mtype::LEGACY_SCRIPT;

    fn encode(self, buf: &mut WriteMessageBuffer) {
        match self.allow_capabilities {
            Some(caps) => buf.write_headers(&[(super::header::ALLOW_CAPABILITIES, caps)]),
            None => buf.write_headers(&[]),
        };
        buf.write_string(self.query);
    }
}

/// Ask the server to return to a quiescent state.
pub struct Sync;

impl FrontendMessage for Sync {
    const MSGTYPE: u8 = mtype::SYNC;

    fn encode(self, _: &mut WriteMessageBuffer) { }
}

/// Gracefully close the protocol.
pub struct Terminate;

impl FrontendMessage for Terminate {
    const MSGTYPE: u8 = mtype::TERMINATE;

    fn encode(self, _: &mut WriteMessageBuffer) { }
}
