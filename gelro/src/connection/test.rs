use bytes::{Bytes, BytesMut};
use std::{collections::VecDeque, io};
use uuid::Uuid;

use super::*;
use crate::{
    buffer::WriteMessageBuffer,
    error::ErrorKind,
    protocol::{Cardinality, OutputFormat, TransactionStatus},
};

const INT64_TID: Uuid = Uuid::from_u128(0x105);

/// A scripted server: every `recv` delivers the next response chunk.
struct MockTransport {
    responses: VecDeque<Bytes>,
    sent: Vec<Bytes>,
    round_trips: usize,
}

impl MockTransport {
    fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses: responses.into(),
            sent: Vec::new(),
            round_trips: 0,
        }
    }
}

impl Transport for MockTransport {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.sent.push(data);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut ReadMessageBuffer) -> io::Result<()> {
        self.round_trips += 1;
        match self.responses.pop_front() {
            Some(chunk) => {
                buf.feed(chunk).map_err(io::Error::other)?;
                Ok(())
            },
            None => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }
}

// ===== server message builders =====

fn chunk(messages: &[Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    for message in messages {
        out.extend_from_slice(message);
    }
    out.freeze()
}

fn server_handshake(major: u16, minor: u16) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'v');
    wb.write_u16(major);
    wb.write_u16(minor);
    wb.write_u16(0); // extensions
    wb.end_message();
    wb.take()
}

fn auth(status: u32, trailer: &[u8]) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'R');
    wb.write_u32(status);
    wb.write_raw(trailer);
    wb.end_message();
    wb.take()
}

fn server_key_data() -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'K');
    wb.write_raw(&[7u8; 32]);
    wb.end_message();
    wb.take()
}

fn parameter_status(name: &str, value: &[u8]) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'S');
    wb.write_string(name);
    wb.write_bytes(value);
    wb.end_message();
    wb.take()
}

fn ready_for_query(status: u8) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'Z');
    wb.write_u16(0); // annotations
    wb.write_u8(status);
    wb.end_message();
    wb.take()
}

fn int64_typedesc() -> Vec<u8> {
    let mut desc = vec![2u8]; // base scalar
    desc.extend_from_slice(INT64_TID.as_bytes());
    desc
}

fn command_data_description(cardinality: u8, capabilities: u64) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'T');
    wb.write_u16(0); // annotations
    wb.write_u64(capabilities);
    wb.write_u8(cardinality);
    wb.write_raw(Uuid::nil().as_bytes()); // null input codec
    wb.write_i32(0);
    wb.write_raw(INT64_TID.as_bytes());
    wb.write_bytes(&int64_typedesc());
    wb.end_message();
    wb.take()
}

fn data_message(payload: &[u8]) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'D');
    wb.write_u16(1);
    wb.write_i32(payload.len() as i32);
    wb.write_raw(payload);
    wb.end_message();
    wb.take()
}

fn int64_row(value: i64) -> Bytes {
    data_message(&value.to_be_bytes())
}

fn command_complete(status: &str) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'C');
    wb.write_u16(0); // annotations
    wb.write_u64(0); // capabilities
    wb.write_string(status);
    wb.write_raw(Uuid::nil().as_bytes()); // state typedesc id
    wb.write_i32(0); // state data
    wb.end_message();
    wb.take()
}

fn error_response(code: u32, message: &str) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'E');
    wb.write_u8(120); // severity
    wb.write_u32(code);
    wb.write_string(message);
    wb.write_u16(0); // attributes
    wb.end_message();
    wb.take()
}

fn handshake_chunk() -> Bytes {
    chunk(&[
        server_handshake(1, 0),
        auth(0, &[]),
        server_key_data(),
        parameter_status("suggested_pool_concurrency", b"4"),
        ready_for_query(b'I'),
    ])
}

async fn connected(responses: Vec<Bytes>) -> Connection<MockTransport> {
    let mut all = vec![handshake_chunk()];
    all.extend(responses);
    Connection::connect(MockTransport::new(all), &ConnectParams::new("edgedb", "main"))
        .await
        .unwrap()
}

// ===== tests =====

#[tokio::test]
async fn handshake_populates_connection() {
    let conn = connected(vec![]).await;
    assert_eq!(conn.io.sent[0][0], b'V', "first message is the client handshake");
    assert!(!conn.is_closed());
    assert_eq!(conn.protocol_version(), ProtocolVersion::new(1, 0));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.server_settings().suggested_pool_concurrency, Some(4));
    assert!(conn.server_secret.is_some());
}

#[tokio::test]
async fn handshake_rejects_unknown_auth() {
    let responses = vec![chunk(&[
        server_handshake(1, 0),
        auth(10, b"SCRAM-SHA-256\0"),
    ])];
    let result = Connection::connect(
        MockTransport::new(responses),
        &ConnectParams::new("edgedb", "main"),
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedAuth(a) if a.method == 10));
}

#[tokio::test]
async fn cache_miss_self_heals() {
    let mut conn = connected(vec![
        // cold: the null fingerprints mismatch, the server re-describes
        chunk(&[command_data_description(b'm', 5), ready_for_query(b'I')]),
        // the re-issued execute streams data
        chunk(&[int64_row(1), command_complete("SELECT 1"), ready_for_query(b'I')]),
        // warm: data streams directly
        chunk(&[int64_row(1), command_complete("SELECT 1"), ready_for_query(b'I')]),
        // evicted: cold again
        chunk(&[command_data_description(b'm', 5), ready_for_query(b'I')]),
        chunk(&[int64_row(1), command_complete("SELECT 1"), ready_for_query(b'I')]),
    ])
    .await;
    let after_connect = conn.io.round_trips;

    let rows = conn.query("select 1", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(1)]);
    assert_eq!(conn.io.round_trips, after_connect + 2, "cold path is two round trips");

    let rows = conn.query("select 1", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(1)]);
    assert_eq!(conn.io.round_trips, after_connect + 3, "warm path is one round trip");

    // losing the entry only costs the extra round trip again
    let key = QueryKey::new("select 1", OutputFormat::Binary, Cardinality::Many);
    conn.query_cache.evict(&key);

    let rows = conn.query("select 1", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(1)]);
    assert_eq!(conn.io.round_trips, after_connect + 5);

    assert_eq!(conn.last_status(), Some("SELECT 1"));
    assert_eq!(
        conn.query_capabilities("select 1", OutputFormat::Binary, Cardinality::Many),
        Some(5),
    );
}

#[tokio::test]
async fn required_single_empty_is_an_error() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'o', 0), ready_for_query(b'I')]),
        chunk(&[command_complete("SELECT 0"), ready_for_query(b'I')]),
    ])
    .await;
    let err = conn.query_required_single("select x", None).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoData(_)));
}

#[tokio::test]
async fn optional_single_empty_is_none() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'o', 0), ready_for_query(b'I')]),
        chunk(&[command_complete("SELECT 0"), ready_for_query(b'I')]),
    ])
    .await;
    let row = conn.query_single("select x", None).await.unwrap();
    assert_eq!(row, None);
}

#[tokio::test]
async fn no_result_cardinality_fails_required_single() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'n', 0), ready_for_query(b'I')]),
    ])
    .await;
    let err = conn
        .fetch("insert x", None, OutputFormat::Binary, Cardinality::One)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NoData(_)));
}

#[tokio::test]
async fn server_error_does_not_abort_the_connection() {
    let mut conn = connected(vec![
        chunk(&[error_response(0x0502_0001, "violated"), ready_for_query(b'I')]),
        chunk(&[command_data_description(b'm', 0), ready_for_query(b'I')]),
        chunk(&[int64_row(2), command_complete("SELECT 1"), ready_for_query(b'I')]),
    ])
    .await;

    let err = conn.query("select bad", None).await.unwrap_err();
    let ErrorKind::Database(server) = err.kind() else {
        panic!("expected a server error, got {err:?}");
    };
    assert_eq!(server.kind(), crate::error::ServerErrorKind::ConstraintViolation);
    assert_eq!(server.message(), "violated");

    // the protocol drained to Sync, the connection keeps working
    assert!(!conn.is_closed());
    let rows = conn.query("select 2", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(2)]);
}

#[tokio::test]
async fn row_decode_error_still_drains_to_sync() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'm', 0), ready_for_query(b'I')]),
        chunk(&[int64_row(1), command_complete("SELECT 1"), ready_for_query(b'I')]),
        // a row declaring 4 bytes where int64 needs 8, then a valid row
        chunk(&[
            data_message(&[0, 0, 0, 1]),
            int64_row(2),
            command_complete("SELECT 2"),
            ready_for_query(b'I'),
        ]),
        chunk(&[int64_row(3), command_complete("SELECT 1"), ready_for_query(b'I')]),
    ])
    .await;

    conn.query("select n", None).await.unwrap();

    let err = conn.query("select n", None).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Decode(_)));

    // Sync was reached, the next query is unaffected
    let rows = conn.query("select n", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(3)]);
}

#[tokio::test]
async fn reset_state_rolls_back_open_transactions() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'n', 0), ready_for_query(b'T')]),
        chunk(&[command_complete("START TRANSACTION"), ready_for_query(b'T')]),
        // the rollback issued by reset_state
        chunk(&[command_complete("ROLLBACK"), ready_for_query(b'I')]),
    ])
    .await;

    conn.fetch("start transaction", None, OutputFormat::None, Cardinality::Many)
        .await
        .unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);

    conn.reset_state().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn reset_state_failure_aborts() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'n', 0), ready_for_query(b'T')]),
        chunk(&[command_complete("START TRANSACTION"), ready_for_query(b'T')]),
        // no response scripted for the rollback, the transport fails
    ])
    .await;

    conn.fetch("start transaction", None, OutputFormat::None, Cardinality::Many)
        .await
        .unwrap();
    conn.reset_state().await.unwrap();
    assert!(conn.is_closed());
}

#[tokio::test]
async fn aborted_error_is_cached_and_replayed() {
    let mut conn = connected(vec![]).await;

    let first = conn.query("select 1", None).await.unwrap_err();
    assert!(matches!(first.kind(), ErrorKind::Aborted(_)));
    assert!(conn.is_closed());

    let second = conn.query("select 1", None).await.unwrap_err();
    assert_eq!(first.kind().to_string(), second.kind().to_string());
}

#[tokio::test]
async fn json_output_shapes() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'm', 0), ready_for_query(b'I')]),
        chunk(&[command_complete("SELECT 0"), ready_for_query(b'I')]),
    ])
    .await;
    // zero rows in json mode come back as an empty document
    let json = conn.query_json("select <int64>{}", None).await.unwrap();
    assert_eq!(json, "[]");
}

fn legacy_parse_complete() -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'1');
    wb.write_u16(0); // headers
    wb.write_u8(b'm');
    wb.write_raw(Uuid::nil().as_bytes()); // null input codec
    wb.write_raw(INT64_TID.as_bytes());
    wb.end_message();
    wb.take()
}

fn legacy_describe_response(capabilities: u64) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'T');
    wb.write_u16(1);
    wb.write_u16(0x1001); // capabilities header
    wb.write_bytes(&capabilities.to_be_bytes());
    wb.write_u8(b'm');
    wb.write_raw(Uuid::nil().as_bytes());
    wb.write_i32(0);
    wb.write_raw(INT64_TID.as_bytes());
    wb.write_bytes(&int64_typedesc());
    wb.end_message();
    wb.take()
}

fn legacy_command_complete(status: &str) -> Bytes {
    let mut wb = WriteMessageBuffer::new();
    wb.begin_message(b'C');
    wb.write_u16(0);
    wb.write_string(status);
    wb.end_message();
    wb.take()
}

#[tokio::test]
async fn legacy_protocol_parse_describe_execute() {
    let responses = vec![
        chunk(&[server_handshake(0, 13), auth(0, &[]), ready_for_query(b'I')]),
        // Parse: pre-0.14 servers only report the type ids
        chunk(&[legacy_parse_complete(), ready_for_query(b'I')]),
        // the explicit Describe round trip resolves the codecs
        chunk(&[legacy_describe_response(5), ready_for_query(b'I')]),
        // Execute
        chunk(&[int64_row(7), legacy_command_complete("SELECT 1"), ready_for_query(b'I')]),
        // warm path goes through the legacy optimistic execute
        chunk(&[int64_row(7), legacy_command_complete("SELECT 1"), ready_for_query(b'I')]),
    ];
    let mut conn = Connection::connect(
        MockTransport::new(responses),
        &ConnectParams::new("edgedb", "main"),
    )
    .await
    .unwrap();
    assert_eq!(conn.protocol_version(), ProtocolVersion::new(0, 13));

    let rows = conn.query("select 7", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(7)]);
    assert_eq!(
        conn.query_capabilities("select 7", OutputFormat::Binary, Cardinality::Many),
        Some(5),
    );

    let rows = conn.query("select 7", None).await.unwrap();
    assert_eq!(rows, [Value::Int64(7)]);
    assert_eq!(conn.last_status(), Some("SELECT 1"));
}

#[tokio::test]
async fn raw_execute_reframes_data_messages() {
    let mut conn = connected(vec![
        chunk(&[command_data_description(b'm', 0), ready_for_query(b'I')]),
        chunk(&[int64_row(9), command_complete("SELECT 1"), ready_for_query(b'I')]),
    ])
    .await;

    let (in_codec, out_codec, _) = conn
        .raw_parse("select 9", QueryOptions::default())
        .await
        .unwrap();
    let raw = conn
        .raw_execute("select 9", in_codec, Some(out_codec), None)
        .await
        .unwrap();

    // the pass-through output is itself a framed Data message
    let mut rb = ReadMessageBuffer::new();
    rb.feed(raw).unwrap();
    assert!(rb.take_message().unwrap());
    assert_eq!(rb.message_type(), b'D');
    rb.read_u16().unwrap();
    assert_eq!(rb.read_len_prefixed().unwrap(), &9i64.to_be_bytes()[..]);
    rb.finish_message().unwrap();
}
