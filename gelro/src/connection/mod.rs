//! The connection state machine.
//!
//! A [`Connection`] drives the full protocol over an abstract
//! [`Transport`]: handshake, statement parse/describe/execute, codec cache
//! upkeep, transaction status tracking and error draining.
//!
//! One connection serves exactly one logical session and must not be
//! driven concurrently from two call sites. Every entry point runs the
//! whole flow to completion before returning, suspension happens only
//! inside [`Transport::recv`].
//!
//! Any unrecoverable I/O or protocol failure flips the connection into a
//! terminal aborted state, the original failure is cached and replayed to
//! every subsequent call.
use bytes::Bytes;
use std::{collections::HashMap, fmt, sync::Arc};

#[cfg(test)]
mod test;

use crate::{
    buffer::{BufferError, ReadBuf, ReadMessageBuffer, WriteBuffer, WriteMessageBuffer},
    codecs::{Codec, CodecKind, CodecsRegistry, NULL_CODEC, NULL_CODEC_ID},
    common::{span, verbose},
    error::{
        Aborted, EncodeError, Error, ErrorKind, NoDataError, ProtocolError, Result,
        ServerError, ServerErrorKind, UnsupportedAuth,
    },
    model::{QueryArgs, Value},
    protocol::{
        ArgsKind, Cardinality, OutputFormat, PROTO_VER, PROTO_VER_MIN, ProtocolVersion,
        QueryOptions, TransactionStatus, capability, frontend, header, mtype,
    },
    statement::{QueryCache, QueryEntry, QueryKey},
    transport::Transport,
};

/// Session establishment parameters.
///
/// Connection-string parsing is a caller concern, the core takes the
/// resolved values.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub user: String,
    pub database: String,
}

impl ConnectParams {
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self { user: user.into(), database: database.into() }
    }
}

/// Server-advertised settings, populated incrementally from
/// ParameterStatus messages.
#[derive(Default)]
pub struct ServerSettings {
    pub suggested_pool_concurrency: Option<usize>,
    pub system_config: Option<Value>,
    /// Settings the client does not interpret, raw value bytes.
    pub raw: HashMap<String, Bytes>,
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Raw<'a>(&'a HashMap<String, Bytes>);

        impl fmt::Debug for Raw<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                use crate::ext::FmtExt;
                let mut map = f.debug_map();
                for (name, value) in self.0 {
                    map.key(name).value(&value.lossy());
                }
                map.finish()
            }
        }

        f.debug_struct("ServerSettings")
            .field("suggested_pool_concurrency", &self.suggested_pool_concurrency)
            .field("system_config", &self.system_config)
            .field("raw", &Raw(&self.raw))
            .finish()
    }
}

/// Decoded outcome of a [`fetch`][Connection::fetch] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// All rows of a many-cardinality binary query.
    Rows(Vec<Value>),
    /// At most one row.
    Single(Option<Value>),
    /// A serialized JSON payload.
    Json(String),
    /// No output was requested.
    Nothing,
}

/// A single logical session over one transport.
pub struct Connection<T> {
    io: T,
    buf: ReadMessageBuffer,
    registry: CodecsRegistry,
    query_cache: QueryCache,

    connected: bool,
    aborted: Option<Aborted>,
    protocol_version: ProtocolVersion,
    xact_status: TransactionStatus,
    server_settings: ServerSettings,
    server_secret: Option<Bytes>,
    last_status: Option<String>,

    state_codec: Arc<dyn Codec>,
    /// Length-prefixed encoded session state, empty for the default state.
    state_data: Bytes,
}

/// Per-call parameters threaded through the message flows.
struct Flow<'a> {
    query: &'a str,
    args: Option<&'a QueryArgs>,
    output_format: OutputFormat,
    expected_cardinality: Cardinality,
    privileged: bool,
    options: QueryOptions,
}

impl Flow<'_> {
    fn expect_one(&self) -> bool {
        self.expected_cardinality.expect_one()
    }

    fn key(&self) -> QueryKey {
        QueryKey::new(self.query, self.output_format, self.expected_cardinality)
    }
}

/// Where decoded (or raw) data rows go.
enum RowSink<'a> {
    Decoded(&'a mut Vec<Value>),
    /// Undecoded Data messages re-framed for pass-through callers.
    Raw(&'a mut WriteBuffer),
}

/// Outcome of a CommandDataDescription message.
struct Describe {
    cardinality: Cardinality,
    in_codec: Arc<dyn Codec>,
    out_codec: Arc<dyn Codec>,
    capabilities: u64,
}

impl<T: Transport> Connection<T> {
    /// Open the protocol on `io` and run the handshake to completion.
    pub async fn connect(io: T, params: &ConnectParams) -> Result<Self> {
        Self::connect_with(io, params, CodecsRegistry::new()).await
    }

    /// Like [`connect`][Self::connect] with a caller-provided registry.
    pub async fn connect_with(
        io: T,
        params: &ConnectParams,
        registry: CodecsRegistry,
    ) -> Result<Self> {
        let mut conn = Self {
            io,
            buf: ReadMessageBuffer::new(),
            registry,
            query_cache: QueryCache::new(),
            connected: false,
            aborted: None,
            protocol_version: PROTO_VER,
            xact_status: TransactionStatus::Unknown,
            server_settings: ServerSettings::default(),
            server_secret: None,
            last_status: None,
            state_codec: NULL_CODEC.clone(),
            state_data: Bytes::new(),
        };
        conn.handshake(params).await?;
        Ok(conn)
    }

    // ===== Accessors =====

    pub fn is_closed(&self) -> bool {
        !self.connected
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.xact_status
    }

    pub fn server_settings(&self) -> &ServerSettings {
        &self.server_settings
    }

    /// Status line of the last completed command.
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// Capability bitmask recorded for a cached query, if any.
    pub fn query_capabilities(
        &mut self,
        query: &str,
        output_format: OutputFormat,
        expected_cardinality: Cardinality,
    ) -> Option<u64> {
        let key = QueryKey::new(query, output_format, expected_cardinality);
        self.query_cache.get(&key).map(|entry| entry.capabilities)
    }

    // ===== Lifecycle =====

    fn check_state(&self) -> Result<()> {
        if let Some(aborted) = &self.aborted {
            return Err(aborted.clone().into());
        }
        if !self.connected {
            return Err(Aborted::closed().into());
        }
        Ok(())
    }

    /// Flip into the terminal aborted state, caching the failure.
    fn abort_with(&mut self, reason: &dyn fmt::Display) -> Error {
        let aborted = match &self.aborted {
            Some(aborted) => aborted.clone(),
            None => Aborted::new(reason),
        };
        self.aborted = Some(aborted.clone());
        self.connected = false;
        aborted.into()
    }

    /// Tear the connection down immediately.
    pub fn abort(&mut self) {
        if self.aborted.is_none() {
            self.aborted = Some(Aborted::closed());
        }
        self.connected = false;
    }

    /// Gracefully close the protocol.
    pub async fn close(&mut self) -> Result<()> {
        if self.connected && self.aborted.is_none() {
            let mut wb = WriteMessageBuffer::new();
            frontend::write(frontend::Terminate, &mut wb);
            let _ = self.io.send(wb.take()).await;
        }
        self.abort();
        Ok(())
    }

    /// Best-effort rollback before the connection is handed back to a
    /// pool. Failure aborts the connection rather than risking handing
    /// back a session mid-transaction.
    pub async fn reset_state(&mut self) -> Result<()> {
        if self.connected && self.xact_status != TransactionStatus::Idle {
            let rolled_back = self
                .fetch_with(
                    "rollback",
                    None,
                    OutputFormat::None,
                    Cardinality::NoResult,
                    true,
                    QueryOptions::default(),
                )
                .await;
            if rolled_back.is_err() {
                self.abort_with(&"failed to reset state");
            }
        }
        Ok(())
    }

    /// Replace the encoded session state sent with every statement.
    ///
    /// `None` restores the default state.
    pub fn set_state(&mut self, state: Option<&Value>) -> Result<()> {
        match state {
            None => {
                self.state_data = Bytes::new();
            },
            Some(state) => {
                if self.state_codec.kind() == CodecKind::Null {
                    return Err(ProtocolError::new(
                        "cannot encode session state, \
                         did not receive a state codec from the server",
                    )
                    .into());
                }
                let mut buf = WriteBuffer::new();
                self.state_codec.encode(&mut buf, state)?;
                self.state_data = buf.take();
            },
        }
        Ok(())
    }

    // ===== Message plumbing =====

    async fn send(&mut self, data: Bytes) -> Result<()> {
        if let Err(e) = self.io.send(data).await {
            return Err(self.abort_with(&e));
        }
        Ok(())
    }

    /// The single suspension point: wait until a whole framed message is
    /// buffered.
    async fn wait_for_message(&mut self) -> Result<()> {
        loop {
            match self.buf.take_message() {
                Ok(true) => return Ok(()),
                Ok(false) => { },
                Err(e) => return Err(self.abort_with(&e)),
            }
            if let Err(e) = self.io.recv(&mut self.buf).await {
                return Err(self.abort_with(&e));
            }
        }
    }

    fn read_headers(&mut self) -> Result<Vec<(u16, Bytes)>, BufferError> {
        let count = self.buf.read_u16()?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push((self.buf.read_u16()?, self.buf.read_len_prefixed()?));
        }
        Ok(headers)
    }

    fn ignore_headers(&mut self) -> Result<(), BufferError> {
        let count = self.buf.read_u16()?;
        for _ in 0..count {
            self.buf.read_u16()?;
            self.buf.read_len_prefixed()?;
        }
        Ok(())
    }

    /// Messages every flow tolerates between its expected responses.
    fn fallthrough(&mut self) -> Result<()> {
        match self.buf.message_type() {
            mtype::PARAMETER_STATUS => self.handle_parameter_status(),
            mtype::LOG_MESSAGE => self.handle_log_message(),
            other => Err(ProtocolError::unexpected(other, "waiting for server response").into()),
        }
    }

    fn parse_sync_message(&mut self) -> Result<()> {
        self.ignore_headers()?;
        let status = self.buf.read_u8()?;
        self.xact_status = TransactionStatus::from_status(status);
        self.buf.finish_message()?;
        Ok(())
    }

    fn parse_error_message(&mut self) -> Result<ServerError> {
        self.buf.read_u8()?; // severity
        let code = self.buf.read_u32()?;
        let message = self.buf.read_string()?;
        let attributes = self.read_headers()?;
        self.buf.finish_message()?;
        Ok(ServerError::new(code, message, attributes))
    }

    fn parse_command_complete(&mut self) -> Result<String> {
        self.ignore_headers()?;
        let status = if self.protocol_version.is_legacy() {
            self.buf.read_string()?
        } else {
            self.buf.read_u64()?; // capabilities
            let status = self.buf.read_string()?;
            self.buf.read_uuid()?; // state typedesc id
            self.buf.read_len_prefixed()?; // state data
            status
        };
        self.buf.finish_message()?;
        Ok(status)
    }

    fn handle_parameter_status(&mut self) -> Result<()> {
        let name = self.buf.read_string()?;
        let value = self.buf.read_len_prefixed()?;
        self.buf.finish_message()?;
        verbose!(name = %name, "parameter status");

        match name.as_str() {
            "suggested_pool_concurrency" => {
                let text = std::str::from_utf8(&value).map_err(BufferError::from)?;
                self.server_settings.suggested_pool_concurrency = text.trim().parse().ok();
            },
            "system_config" => {
                let mut buf = ReadBuf::new(value);
                let typedesc_len = buf.read_i32()? as usize - 16;
                let typedesc_id = buf.read_uuid()?;
                let typedesc = buf.read_bytes(typedesc_len)?;

                let codec = match self.registry.get_codec(&typedesc_id) {
                    Some(codec) => codec,
                    None => self.registry.build_codec(typedesc)?,
                };

                buf.discard(4)?; // data length
                let config = codec.decode(&mut buf)?;
                buf.finish()?;
                self.server_settings.system_config = Some(config);
            },
            "state_description" => {
                let mut buf = ReadBuf::new(value);
                let typedesc_id = buf.read_uuid()?;
                let typedesc_len = buf.read_i32()? as usize;
                let typedesc = buf.read_bytes(typedesc_len)?;

                self.state_codec = match self.registry.get_codec(&typedesc_id) {
                    Some(codec) => codec,
                    None => self.registry.build_codec(typedesc)?,
                };
            },
            _ => {
                self.server_settings.raw.insert(name, value);
            },
        }
        Ok(())
    }

    fn handle_log_message(&mut self) -> Result<()> {
        let severity = self.buf.read_u8()?;
        let code = self.buf.read_u32()?;
        let text = self.buf.read_string()?;
        self.read_headers()?;
        self.buf.finish_message()?;

        #[cfg(feature = "log")]
        log::info!("server message [severity {severity}, code {code}]: {text}");
        verbose!(severity, code, message = %text, "server log message");
        let _ = (severity, code, text);
        Ok(())
    }

    // ===== Handshake =====

    async fn handshake(&mut self, params: &ConnectParams) -> Result<()> {
        span!("handshake");

        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::ClientHandshake {
                major: PROTO_VER.major,
                minor: PROTO_VER.minor,
                params: &[("user", &params.user), ("database", &params.database)],
            },
            &mut wb,
        );
        self.send(wb.take()).await?;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::SERVER_HANDSHAKE => {
                    let major = self.buf.read_u16()?;
                    let minor = self.buf.read_u16()?;
                    let extensions = self.buf.read_u16()?;
                    for _ in 0..extensions {
                        self.buf.read_string()?;
                        self.ignore_headers()?;
                    }
                    self.buf.finish_message()?;

                    let version = ProtocolVersion::new(major, minor);
                    if version < PROTO_VER_MIN || PROTO_VER < version {
                        return Err(ProtocolError::new(format!(
                            "the server requested an unsupported protocol version {version}",
                        ))
                        .into());
                    }
                    self.protocol_version = version;
                },
                mtype::AUTHENTICATION => {
                    let status = self.buf.read_u32()?;
                    if status != 0 {
                        self.buf.discard_message()?;
                        return Err(UnsupportedAuth { method: status }.into());
                    }
                    self.buf.finish_message()?;
                },
                mtype::SERVER_KEY_DATA => {
                    self.server_secret = Some(self.buf.read_buffer(32)?);
                    self.buf.finish_message()?;
                },
                mtype::PARAMETER_STATUS => self.handle_parameter_status()?,
                mtype::LOG_MESSAGE => self.handle_log_message()?,
                mtype::ERROR_RESPONSE => {
                    return Err(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    self.connected = true;
                    verbose!(version = %self.protocol_version, "connected");
                    return Ok(());
                },
                other => {
                    return Err(ProtocolError::unexpected(other, "handshake").into());
                },
            }
        }
    }

    // ===== Argument encoding =====

    /// Encode arguments against the codec family of the negotiated
    /// protocol version, failing fast on a codec that cannot represent
    /// arguments.
    fn encode_args(
        &self,
        codec: &Arc<dyn Codec>,
        args: Option<&QueryArgs>,
    ) -> Result<Bytes> {
        let valid = match self.protocol_version.args_kind() {
            ArgsKind::Object => {
                matches!(codec.kind(), CodecKind::Null | CodecKind::Object)
            },
            ArgsKind::Tuple => matches!(
                codec.kind(),
                CodecKind::EmptyTuple | CodecKind::Tuple | CodecKind::NamedTuple,
            ),
        };
        if !valid {
            return Err(EncodeError::InvalidArgumentCodec.into());
        }
        Ok(codec.encode_args(args)?)
    }

    fn parse_params<'b>(&'b self, flow: &'b Flow<'_>) -> frontend::ParseParams<'b> {
        frontend::ParseParams {
            allowed_capabilities: match flow.privileged {
                true => capability::ALL,
                false => capability::RESTRICTED,
            },
            compilation_flags: flow.options.compilation_flags(),
            implicit_limit: flow.options.implicit_limit,
            output_format: flow.output_format,
            expect_one: flow.expect_one(),
            query: flow.query,
            state_typedesc_id: match self.state_data.is_empty() {
                true => NULL_CODEC_ID,
                false => self.state_codec.tid(),
            },
            state_data: &self.state_data,
        }
    }

    // ===== Response pieces =====

    fn parse_describe(&mut self) -> Result<Describe> {
        let capabilities = if self.protocol_version.is_legacy() {
            let headers = self.read_headers()?;
            headers
                .iter()
                .find(|(code, _)| *code == header::CAPABILITIES)
                .and_then(|(_, value)| Some(u64::from_be_bytes(value[..].try_into().ok()?)))
                .unwrap_or(capability::ALL)
        } else {
            self.ignore_headers()?;
            self.buf.read_u64()?
        };

        let card = self.buf.read_u8()?;
        let cardinality = Cardinality::from_u8(card)
            .ok_or_else(|| ProtocolError::new(format!("unknown cardinality {card:#x}")))?;

        let in_tid = self.buf.read_uuid()?;
        let in_typedesc = self.buf.read_len_prefixed()?;
        let out_tid = self.buf.read_uuid()?;
        let out_typedesc = self.buf.read_len_prefixed()?;
        self.buf.finish_message()?;

        let in_codec = match self.registry.get_codec(&in_tid) {
            Some(codec) => codec,
            None => self.registry.build_codec(in_typedesc)?,
        };
        let out_codec = match self.registry.get_codec(&out_tid) {
            Some(codec) => codec,
            None => self.registry.build_codec(out_typedesc)?,
        };

        Ok(Describe { cardinality, in_codec, out_codec, capabilities })
    }

    /// Consume every buffered Data message through `codec` into `sink`.
    fn parse_data_messages(
        &mut self,
        codec: &dyn Codec,
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        while self.buf.take_message_type(mtype::DATA)? {
            let message = self.buf.consume_message()?;
            match sink {
                RowSink::Decoded(rows) => {
                    let mut frb = ReadBuf::new(message);
                    // element count (always one) and element length
                    frb.discard(6)?;
                    rows.push(codec.decode(&mut frb)?);
                    frb.finish()?;
                },
                RowSink::Raw(out) => {
                    out.write_u8(mtype::DATA);
                    out.write_i32(message.len() as i32 + 4);
                    out.write_raw(&message);
                },
            }
        }
        Ok(())
    }

    fn validate_cardinality(&self, cardinality: Cardinality, flow: &Flow<'_>) -> Result<()> {
        if flow.expected_cardinality == Cardinality::One
            && cardinality == Cardinality::NoResult
        {
            return Err(NoDataError.into());
        }
        Ok(())
    }

    // ===== 1.0 protocol flows =====

    /// Cold path: compile the statement, cache its codecs.
    async fn parse(&mut self, flow: &Flow<'_>) -> Result<QueryEntry> {
        span!("parse");

        let mut wb = WriteMessageBuffer::new();
        frontend::write(frontend::Parse(self.parse_params(flow)), &mut wb);
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let mut entry: Option<QueryEntry> = None;
        let mut error: Option<Error> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::COMMAND_DATA_DESCRIPTION => match self.parse_describe() {
                    Ok(describe) => {
                        let new = QueryEntry {
                            cardinality: describe.cardinality,
                            in_codec: describe.in_codec,
                            out_codec: describe.out_codec,
                            capabilities: describe.capabilities,
                        };
                        self.query_cache.set(flow.key(), new.clone());
                        entry = Some(new);
                    },
                    Err(e) => {
                        let _ = self.buf.discard_message();
                        error = Some(e);
                    },
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        if let Some(error) = error {
            return Err(error);
        }
        entry.ok_or_else(|| {
            ProtocolError::new(
                "failed to receive type information in response to a Parse message",
            )
            .into()
        })
    }

    /// Warm path: combined parse-and-execute against cached codec
    /// fingerprints.
    ///
    /// Returns a fresh [`QueryEntry`] when the server re-described the
    /// statement instead of executing, the caller re-issues the execute
    /// with the new codecs.
    async fn execute_flow(
        &mut self,
        flow: &Flow<'_>,
        entry: &QueryEntry,
        sink: &mut RowSink<'_>,
    ) -> Result<Option<QueryEntry>> {
        span!("execute");

        let arguments = self.encode_args(&entry.in_codec, flow.args)?;

        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::Execute {
                params: self.parse_params(flow),
                input_typedesc_id: entry.in_codec.tid(),
                output_typedesc_id: entry.out_codec.tid(),
                arguments: &arguments,
            },
            &mut wb,
        );
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let mut out_codec = entry.out_codec.clone();
        let mut redescribed: Option<QueryEntry> = None;
        let mut error: Option<Error> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::DATA => {
                    if error.is_none() {
                        if let Err(e) = self.parse_data_messages(&*out_codec, sink) {
                            error = Some(e);
                        }
                    } else {
                        self.buf.discard_message()?;
                    }
                },
                mtype::COMMAND_COMPLETE => {
                    self.last_status = Some(self.parse_command_complete()?);
                },
                mtype::COMMAND_DATA_DESCRIPTION => match self.parse_describe() {
                    Ok(describe) => {
                        let new = QueryEntry {
                            cardinality: describe.cardinality,
                            in_codec: describe.in_codec,
                            out_codec: describe.out_codec,
                            capabilities: describe.capabilities,
                        };
                        self.query_cache.set(flow.key(), new.clone());
                        out_codec = new.out_codec.clone();
                        redescribed = Some(new);
                    },
                    Err(e) => {
                        let _ = self.buf.discard_message();
                        error = Some(e);
                    },
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        if let Some(error) = error {
            return Err(error);
        }
        Ok(redescribed)
    }

    /// Execute with a bounded re-describe fallback.
    ///
    /// A stale codec fingerprint self-heals within the same logical call:
    /// the server re-describes, the cache is updated and the execute is
    /// re-issued exactly once. A second mismatch is a protocol error
    /// rather than unbounded recursion.
    async fn run_execute(
        &mut self,
        flow: &Flow<'_>,
        entry: QueryEntry,
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let mut current = entry;
        let mut reissued = false;
        loop {
            match self.execute_flow(flow, &current, sink).await? {
                None => return Ok(()),
                Some(new) => {
                    if reissued {
                        return Err(ProtocolError::new(
                            "codec mismatch persisted after re-describe",
                        )
                        .into());
                    }
                    reissued = true;
                    self.validate_cardinality(new.cardinality, flow)?;
                    current = new;
                },
            }
        }
    }

    // ===== Legacy (pre-1.0) protocol flows =====

    fn legacy_allow_capabilities(privileged: bool) -> [u8; 8] {
        match privileged {
            true => capability::ALL.to_be_bytes(),
            false => capability::RESTRICTED.to_be_bytes(),
        }
    }

    async fn legacy_parse(&mut self, flow: &Flow<'_>) -> Result<QueryEntry> {
        span!("legacy_parse");

        let caps = Self::legacy_allow_capabilities(flow.privileged);
        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::LegacyParse {
                output_format: flow.output_format,
                expect_one: flow.expect_one(),
                query: flow.query,
                allow_capabilities: &caps,
            },
            &mut wb,
        );
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let sends_typedesc = self.protocol_version.parse_sends_typedesc();
        let mut error: Option<Error> = None;
        let mut capabilities = capability::ALL;
        let mut cardinality: Option<Cardinality> = None;
        let mut in_tid = None;
        let mut out_tid = None;
        let mut in_typedesc: Option<Bytes> = None;
        let mut out_typedesc: Option<Bytes> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::LEGACY_PARSE_COMPLETE => {
                    let headers = self.read_headers()?;
                    if let Some((_, value)) = headers
                        .iter()
                        .find(|(code, _)| *code == header::CAPABILITIES)
                    {
                        if let Ok(raw) = value[..].try_into() {
                            capabilities = u64::from_be_bytes(raw);
                        }
                    }
                    cardinality = Cardinality::from_u8(self.buf.read_u8()?);
                    in_tid = Some(self.buf.read_uuid()?);
                    if sends_typedesc {
                        in_typedesc = Some(self.buf.read_len_prefixed()?);
                        out_tid = Some(self.buf.read_uuid()?);
                        out_typedesc = Some(self.buf.read_len_prefixed()?);
                    } else {
                        out_tid = Some(self.buf.read_uuid()?);
                    }
                    self.buf.finish_message()?;
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }
        if let Some(error) = error {
            return Err(error);
        }

        let (Some(in_tid), Some(out_tid)) = (in_tid, out_tid) else {
            return Err(ProtocolError::new(
                "did not receive in/out type ids in Parse response",
            )
            .into());
        };

        let mut in_codec = self.registry.get_codec(&in_tid);
        if in_codec.is_none() {
            if let Some(typedesc) = in_typedesc {
                in_codec = Some(self.registry.build_codec(typedesc)?);
            }
        }
        let mut out_codec = self.registry.get_codec(&out_tid);
        if out_codec.is_none() {
            if let Some(typedesc) = out_typedesc {
                out_codec = Some(self.registry.build_codec(typedesc)?);
            }
        }

        match (in_codec, out_codec, cardinality) {
            (Some(in_codec), Some(out_codec), Some(cardinality)) => Ok(QueryEntry {
                cardinality,
                in_codec,
                out_codec,
                capabilities,
            }),
            // pre-0.14 servers describe on request only
            _ => self.legacy_describe(capabilities).await,
        }
    }

    /// Explicit Describe round trip for pre-0.14 servers.
    async fn legacy_describe(&mut self, fallback_capabilities: u64) -> Result<QueryEntry> {
        let mut wb = WriteMessageBuffer::new();
        frontend::write(frontend::LegacyDescribe, &mut wb);
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let mut entry: Option<QueryEntry> = None;
        let mut error: Option<Error> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::COMMAND_DATA_DESCRIPTION => match self.parse_describe() {
                    Ok(describe) => {
                        entry = Some(QueryEntry {
                            cardinality: describe.cardinality,
                            in_codec: describe.in_codec,
                            out_codec: describe.out_codec,
                            capabilities: match describe.capabilities {
                                capability::ALL => fallback_capabilities,
                                capabilities => capabilities,
                            },
                        });
                    },
                    Err(e) => {
                        let _ = self.buf.discard_message();
                        error = Some(e);
                    },
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        if let Some(error) = error {
            return Err(error);
        }
        entry.ok_or_else(|| {
            ProtocolError::new("failed to receive a Describe response").into()
        })
    }

    async fn legacy_execute_flow(
        &mut self,
        flow: &Flow<'_>,
        entry: &QueryEntry,
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let arguments = self.encode_args(&entry.in_codec, flow.args)?;
        let caps = Self::legacy_allow_capabilities(flow.privileged);

        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::LegacyExecute { allow_capabilities: &caps, arguments: &arguments },
            &mut wb,
        );
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let out_codec = entry.out_codec.clone();
        let mut error: Option<Error> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::DATA => {
                    if error.is_none() {
                        if let Err(e) = self.parse_data_messages(&*out_codec, sink) {
                            error = Some(e);
                        }
                    } else {
                        self.buf.discard_message()?;
                    }
                },
                mtype::COMMAND_COMPLETE => {
                    self.last_status = Some(self.parse_command_complete()?);
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn legacy_optimistic_execute(
        &mut self,
        flow: &Flow<'_>,
        entry: &QueryEntry,
        sink: &mut RowSink<'_>,
    ) -> Result<()> {
        let arguments = self.encode_args(&entry.in_codec, flow.args)?;
        let caps = Self::legacy_allow_capabilities(flow.privileged);

        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::LegacyOptimisticExecute {
                output_format: flow.output_format,
                expect_one: flow.expect_one(),
                query: flow.query,
                input_typedesc_id: entry.in_codec.tid(),
                output_typedesc_id: entry.out_codec.tid(),
                arguments: &arguments,
                allow_capabilities: &caps,
            },
            &mut wb,
        );
        frontend::write(frontend::Sync, &mut wb);
        self.send(wb.take()).await?;

        let mut out_codec = entry.out_codec.clone();
        let mut redescribed: Option<QueryEntry> = None;
        let mut error: Option<Error> = None;

        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::DATA => {
                    if error.is_none() {
                        if let Err(e) = self.parse_data_messages(&*out_codec, sink) {
                            error = Some(e);
                        }
                    } else {
                        self.buf.discard_message()?;
                    }
                },
                mtype::COMMAND_COMPLETE => {
                    self.last_status = Some(self.parse_command_complete()?);
                },
                mtype::COMMAND_DATA_DESCRIPTION => match self.parse_describe() {
                    Ok(describe) => {
                        let new = QueryEntry {
                            cardinality: describe.cardinality,
                            in_codec: describe.in_codec,
                            out_codec: describe.out_codec,
                            capabilities: describe.capabilities,
                        };
                        self.query_cache.set(flow.key(), new.clone());
                        out_codec = new.out_codec.clone();
                        redescribed = Some(new);
                    },
                    Err(e) => {
                        let _ = self.buf.discard_message();
                        error = Some(e);
                    },
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        if let Some(error) = error {
            return Err(error);
        }
        if let Some(new) = redescribed {
            self.validate_cardinality(new.cardinality, flow)?;
            return self.legacy_execute_flow(flow, &new, sink).await;
        }
        Ok(())
    }

    /// Pre-1.0 script execution, the only legacy path allowing
    /// transaction control statements.
    async fn legacy_script(&mut self, query: &str, privileged: bool) -> Result<()> {
        self.check_state()?;

        let caps = Self::legacy_allow_capabilities(false);
        let mut wb = WriteMessageBuffer::new();
        frontend::write(
            frontend::LegacyScript {
                query,
                allow_capabilities: (!privileged).then_some(&caps[..]),
            },
            &mut wb,
        );
        self.send(wb.take()).await?;

        let mut error: Option<Error> = None;
        loop {
            self.wait_for_message().await?;
            match self.buf.message_type() {
                mtype::COMMAND_COMPLETE => {
                    self.last_status = Some(self.parse_command_complete()?);
                },
                mtype::ERROR_RESPONSE => {
                    error = Some(self.parse_error_message()?.into());
                },
                mtype::READY_FOR_QUERY => {
                    self.parse_sync_message()?;
                    break;
                },
                _ => self.fallthrough()?,
            }
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ===== Entry points =====

    /// Run one statement to completion.
    ///
    /// Drives the whole parse/describe/execute sequence, consulting and
    /// repopulating the query codec cache along the way.
    pub async fn fetch(
        &mut self,
        query: &str,
        args: Option<&QueryArgs>,
        output_format: OutputFormat,
        expected_cardinality: Cardinality,
    ) -> Result<FetchResult> {
        self.fetch_with(
            query,
            args,
            output_format,
            expected_cardinality,
            false,
            QueryOptions::default(),
        )
        .await
    }

    async fn fetch_with(
        &mut self,
        query: &str,
        args: Option<&QueryArgs>,
        output_format: OutputFormat,
        expected_cardinality: Cardinality,
        privileged: bool,
        options: QueryOptions,
    ) -> Result<FetchResult> {
        if self.protocol_version.is_legacy() && output_format == OutputFormat::None {
            if args.is_some() {
                return Err(ProtocolError::new(
                    "script execution with arguments is not supported \
                     by this protocol version",
                )
                .into());
            }
            self.legacy_script(query, privileged).await?;
            return Ok(FetchResult::Nothing);
        }

        self.check_state()?;

        let flow = Flow {
            query,
            args,
            output_format,
            expected_cardinality,
            privileged,
            options,
        };

        let mut rows: Vec<Value> = Vec::new();
        let cached = self.query_cache.get(&flow.key());
        if let Some(entry) = &cached {
            self.validate_cardinality(entry.cardinality, &flow)?;
        }

        if self.protocol_version.is_legacy() {
            match cached {
                Some(entry) => {
                    let mut sink = RowSink::Decoded(&mut rows);
                    self.legacy_optimistic_execute(&flow, &entry, &mut sink).await?;
                },
                None => {
                    let entry = self.legacy_parse(&flow).await?;
                    self.validate_cardinality(entry.cardinality, &flow)?;
                    self.query_cache.set(flow.key(), entry.clone());
                    let mut sink = RowSink::Decoded(&mut rows);
                    self.legacy_execute_flow(&flow, &entry, &mut sink).await?;
                },
            }
        } else {
            // arguments cannot be encoded before the input codec is known
            let mut needs_parse = cached.is_none() && args.is_some();

            if !needs_parse {
                let entry = cached.unwrap_or_else(|| QueryEntry {
                    cardinality: Cardinality::Many,
                    in_codec: NULL_CODEC.clone(),
                    out_codec: NULL_CODEC.clone(),
                    capabilities: 0,
                });
                let mut sink = RowSink::Decoded(&mut rows);
                match self.run_execute(&flow, entry, &mut sink).await {
                    Ok(()) => { },
                    Err(e) if is_parameter_type_mismatch(&e) => needs_parse = true,
                    Err(e) => return Err(e),
                }
            }

            if needs_parse {
                let entry = self.parse(&flow).await?;
                self.validate_cardinality(entry.cardinality, &flow)?;
                let mut sink = RowSink::Decoded(&mut rows);
                self.run_execute(&flow, entry, &mut sink).await?;
            }
        }

        shape_result(rows, &flow)
    }

    /// Fetch all rows of a binary query.
    pub async fn query(&mut self, query: &str, args: Option<&QueryArgs>) -> Result<Vec<Value>> {
        match self.fetch(query, args, OutputFormat::Binary, Cardinality::Many).await? {
            FetchResult::Rows(rows) => Ok(rows),
            _ => unreachable!("many-cardinality binary fetch always yields rows"),
        }
    }

    /// Fetch at most one row.
    pub async fn query_single(
        &mut self,
        query: &str,
        args: Option<&QueryArgs>,
    ) -> Result<Option<Value>> {
        match self.fetch(query, args, OutputFormat::Binary, Cardinality::AtMostOne).await? {
            FetchResult::Single(row) => Ok(row),
            _ => unreachable!("single-cardinality binary fetch always yields a single"),
        }
    }

    /// Fetch exactly one row, an empty result is an error.
    pub async fn query_required_single(
        &mut self,
        query: &str,
        args: Option<&QueryArgs>,
    ) -> Result<Value> {
        match self.fetch(query, args, OutputFormat::Binary, Cardinality::One).await? {
            FetchResult::Single(Some(row)) => Ok(row),
            FetchResult::Single(None) => Err(NoDataError.into()),
            _ => unreachable!("single-cardinality binary fetch always yields a single"),
        }
    }

    /// Fetch the result as one JSON document.
    pub async fn query_json(&mut self, query: &str, args: Option<&QueryArgs>) -> Result<String> {
        match self.fetch(query, args, OutputFormat::Json, Cardinality::Many).await? {
            FetchResult::Json(json) => Ok(json),
            _ => unreachable!("json fetch always yields json"),
        }
    }

    /// Run a statement discarding any output.
    pub async fn execute(&mut self, query: &str, args: Option<&QueryArgs>) -> Result<()> {
        self.fetch(query, args, OutputFormat::None, Cardinality::Many).await?;
        Ok(())
    }

    /// Compile a statement and return its codecs without executing.
    pub async fn raw_parse(
        &mut self,
        query: &str,
        options: QueryOptions,
    ) -> Result<(Arc<dyn Codec>, Arc<dyn Codec>, u64)> {
        if self.protocol_version.is_legacy() {
            return Err(ProtocolError::new(
                "raw parse is not supported by this protocol version",
            )
            .into());
        }
        self.check_state()?;

        let flow = Flow {
            query,
            args: None,
            output_format: OutputFormat::Binary,
            expected_cardinality: Cardinality::Many,
            privileged: false,
            options,
        };
        let entry = self.parse(&flow).await?;
        Ok((entry.in_codec, entry.out_codec, entry.capabilities))
    }

    /// Execute with known codecs, returning the undecoded Data messages
    /// re-framed as protocol messages.
    pub async fn raw_execute(
        &mut self,
        query: &str,
        in_codec: Arc<dyn Codec>,
        out_codec: Option<Arc<dyn Codec>>,
        args: Option<&QueryArgs>,
    ) -> Result<Bytes> {
        if self.protocol_version.is_legacy() {
            return Err(ProtocolError::new(
                "raw execute is not supported by this protocol version",
            )
            .into());
        }
        self.check_state()?;

        let output_format = match out_codec {
            Some(_) => OutputFormat::Binary,
            None => OutputFormat::None,
        };
        let flow = Flow {
            query,
            args,
            output_format,
            expected_cardinality: Cardinality::Many,
            privileged: false,
            options: QueryOptions::default(),
        };
        let entry = QueryEntry {
            cardinality: Cardinality::Many,
            in_codec,
            out_codec: out_codec.unwrap_or_else(|| NULL_CODEC.clone()),
            capabilities: 0,
        };

        let mut out = WriteBuffer::new();
        let mut sink = RowSink::Raw(&mut out);
        self.run_execute(&flow, entry, &mut sink).await?;
        Ok(out.take())
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.connected)
            .field("protocol_version", &self.protocol_version)
            .field("xact_status", &self.xact_status)
            .finish()
    }
}

fn is_parameter_type_mismatch(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Database(e) if e.kind() == ServerErrorKind::ParameterTypeMismatch,
    )
}

/// Materialize the decoded rows per the caller's flags.
fn shape_result(mut rows: Vec<Value>, flow: &Flow<'_>) -> Result<FetchResult> {
    if flow.output_format == OutputFormat::None {
        return Ok(FetchResult::Nothing);
    }

    let as_json = flow.output_format == OutputFormat::Json;
    if flow.expect_one() {
        if flow.expected_cardinality == Cardinality::One && rows.is_empty() {
            return Err(NoDataError.into());
        }
        let row = rows.drain(..).next();
        if as_json {
            return Ok(FetchResult::Json(match row {
                Some(row) => json_text(row),
                None => "null".to_owned(),
            }));
        }
        return Ok(FetchResult::Single(row));
    }

    if as_json {
        return Ok(FetchResult::Json(match rows.drain(..).next() {
            Some(row) => json_text(row),
            None => "[]".to_owned(),
        }));
    }
    Ok(FetchResult::Rows(rows))
}

/// JSON query rows decode through the str codec, anything else is
/// serialized generically.
fn json_text(value: Value) -> String {
    match value {
        Value::Str(text) => text,
        Value::Json(json) => json.to_string(),
        other => other.to_json().to_string(),
    }
}
