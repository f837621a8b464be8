//! Binary message buffers.
//!
//! Writing is split between [`WriteBuffer`], a plain growable byte
//! accumulator, and [`WriteMessageBuffer`] which adds message framing on top
//! of it.
//!
//! Reading is split between [`ReadMessageBuffer`], which assembles framed
//! messages out of arbitrarily chunked input, and [`ReadBuf`], a bounds
//! checked reader over a single already-framed value.
//!
//! Misusing the write API (writing outside a message, nesting messages) is a
//! programmer error and panics. Reading past a message boundary is a server
//! data error and returns [`BufferError`].
use bytes::{Buf, Bytes, BytesMut};
use std::{fmt, str::Utf8Error};

use crate::ext::UsizeExt;

/// `WriteBuffer` over-allocation.
const BUFFER_INC_SIZE: usize = 4096;

/// Max number of recv chunks that can be queued for reading.
const BUFFER_RING_CAPACITY: usize = 2048;

/// An error while reading framed binary data.
pub enum BufferError {
    /// A read would cross the current message boundary.
    Overread,
    /// A message length field smaller than the length field itself.
    Frame,
    /// A message was finished while it still had unread data.
    UnreadData { mtype: u8 },
    /// Trailing bytes left after a value was fully decoded.
    TrailingData,
    /// No message has been taken.
    NoMessage,
    /// The chunk ring filled up in the middle of a message.
    Overflow,
    /// A protocol string is not valid utf8.
    Utf8(Utf8Error),
}

impl std::error::Error for BufferError { }

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overread => f.write_str("buffer overread"),
            Self::Frame => f.write_str("invalid message frame"),
            Self::UnreadData { mtype } => {
                write!(f, "unread data in message {:?}", *mtype as char)
            },
            Self::TrailingData => f.write_str("unexpected trailing data in buffer"),
            Self::NoMessage => f.write_str("no message taken"),
            Self::Overflow => f.write_str("incoming message too big: buffer overflow"),
            Self::Utf8(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl From<Utf8Error> for BufferError {
    fn from(e: Utf8Error) -> Self {
        Self::Utf8(e)
    }
}

// ===== WriteBuffer =====

/// Append-only byte accumulator with big-endian fixed-width writes.
///
/// Grows by a fixed increment whenever the next write would overflow the
/// current capacity, never shrinks.
#[derive(Debug)]
pub struct WriteBuffer {
    buf: BytesMut,
}

macro_rules! write_be {
    ($(
        $(#[$doc:meta])* $name:ident($ty:ty);
    )*) => {$(
        $(#[$doc])*
        pub fn $name(&mut self, value: $ty) {
            self.ensure(size_of::<$ty>());
            self.buf.extend_from_slice(&value.to_be_bytes());
        }
    )*};
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(BUFFER_INC_SIZE) }
    }

    fn ensure(&mut self, extra: usize) {
        if self.buf.len() + extra > self.buf.capacity() {
            self.buf.reserve(extra + BUFFER_INC_SIZE);
        }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    write_be! {
        write_u8(u8);
        write_i8(i8);
        write_u16(u16);
        write_i16(i16);
        write_u32(u32);
        write_i32(i32);
        write_u64(u64);
        write_i64(i64);
        write_f32(f32);
        write_f64(f64);
    }

    /// Copy raw bytes, no length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Write a 4-byte big-endian length followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len().to_u32() as i32);
        self.write_raw(bytes);
    }

    /// Write a 4-byte big-endian length followed by the utf8 bytes.
    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Overwrite 4 bytes at `pos` with a big-endian `i32`.
    ///
    /// Used to patch a length placeholder once the actual length is known.
    pub(crate) fn patch_i32(&mut self, pos: usize, value: i32) {
        self.buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Take the accumulated bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ===== WriteMessageBuffer =====

/// [`WriteBuffer`] with message framing.
///
/// [`begin_message`][WriteMessageBuffer::begin_message] reserves a 1-byte
/// type tag and a 4-byte length placeholder, [`end_message`][1] patches the
/// placeholder with the actual body length. At most one message can be open
/// at a time.
///
/// [1]: WriteMessageBuffer::end_message
#[derive(Debug, Default)]
pub struct WriteMessageBuffer {
    buf: WriteBuffer,
    message_pos: Option<usize>,
}

macro_rules! delegate_write {
    ($(
        $name:ident($ty:ty);
    )*) => {$(
        pub fn $name(&mut self, value: $ty) -> &mut Self {
            self.assert_open(stringify!($name));
            self.buf.$name(value);
            self
        }
    )*};
}

impl WriteMessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.message_pos = None;
        self.buf.reset();
        self
    }

    fn assert_open(&self, op: &str) {
        assert!(self.message_pos.is_some(), "cannot {op}: no current message");
    }

    pub fn begin_message(&mut self, mtype: u8) -> &mut Self {
        assert!(
            self.message_pos.is_none(),
            "cannot begin a new message: the previous message is not finished",
        );
        self.message_pos = Some(self.buf.position());
        self.buf.write_u8(mtype);
        self.buf.write_i32(0);
        self
    }

    pub fn end_message(&mut self) -> &mut Self {
        let pos = self.message_pos.take()
            .expect("cannot end the message: no current message");
        let len = self.buf.position() - pos - 1;
        self.buf.patch_i32(pos + 1, len.to_u32() as i32);
        self
    }

    delegate_write! {
        write_u8(u8);
        write_u16(u16);
        write_i16(i16);
        write_u32(u32);
        write_i32(i32);
        write_u64(u64);
        write_i64(i64);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.assert_open("write_raw");
        self.buf.write_raw(bytes);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.assert_open("write_bytes");
        self.buf.write_bytes(bytes);
        self
    }

    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.assert_open("write_string");
        self.buf.write_string(s);
        self
    }

    /// Write headers as a count-prefixed sequence of
    /// `(u16 code, length-prefixed value)` pairs.
    pub fn write_headers(&mut self, headers: &[(u16, &[u8])]) -> &mut Self {
        self.assert_open("write_headers");
        self.buf.write_u16(headers.len().to_u16());
        for (code, value) in headers {
            self.buf.write_u16(*code);
            self.buf.write_bytes(value);
        }
        self
    }

    /// Take the accumulated messages, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        assert!(
            self.message_pos.is_none(),
            "cannot take: an unfinished message is in the buffer",
        );
        self.buf.take()
    }
}

// ===== ChunkRing =====

/// Fixed-capacity ring of pending input chunks.
struct ChunkRing {
    slots: Box<[Option<Bytes>]>,
    read: usize,
    write: usize,
    count: usize,
}

impl ChunkRing {
    fn new() -> Self {
        Self {
            slots: (0..BUFFER_RING_CAPACITY).map(|_| None).collect(),
            read: 0,
            write: 0,
            count: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn enq(&mut self, chunk: Bytes) {
        debug_assert!(!self.is_full());
        self.slots[self.write] = Some(chunk);
        self.write = (self.write + 1) % self.slots.len();
        self.count += 1;
    }

    fn deq(&mut self) -> Option<Bytes> {
        if self.count == 0 {
            return None;
        }
        let chunk = self.slots[self.read].take();
        self.read = (self.read + 1) % self.slots.len();
        self.count -= 1;
        chunk
    }
}

impl fmt::Debug for ChunkRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkRing").field("count", &self.count).finish()
    }
}

// ===== ReadMessageBuffer =====

/// Assembles framed messages out of arbitrarily chunked input.
///
/// Input arrives via [`feed`][ReadMessageBuffer::feed] in whatever chunk
/// sizes the transport produces. [`take_message`][1] reports whether a full
/// message (type byte, length, body) is buffered. While a message is taken,
/// every read decrements a per-message unread counter; reading past the
/// message boundary is a [`BufferError::Overread`], which is what keeps a
/// truncated or malformed message from bleeding into the next one.
///
/// [1]: ReadMessageBuffer::take_message
#[derive(Debug)]
pub struct ReadMessageBuffer {
    ring: ChunkRing,
    chunk0: Bytes,
    len: usize,

    mtype: u8,
    msg_len: usize,
    msg_unread: usize,
    msg_ready: bool,
}

macro_rules! read_be {
    ($(
        $name:ident($ty:ty);
    )*) => {$(
        pub fn $name(&mut self) -> Result<$ty, BufferError> {
            self.read_array().map(<$ty>::from_be_bytes)
        }
    )*};
}

impl ReadMessageBuffer {
    pub fn new() -> Self {
        Self {
            ring: ChunkRing::new(),
            chunk0: Bytes::new(),
            len: 0,
            mtype: 0,
            msg_len: 0,
            msg_unread: 0,
            msg_ready: false,
        }
    }

    /// Total unread bytes buffered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queue an input chunk.
    ///
    /// Returns `true` when the ring is now full, signaling backpressure to
    /// the transport. Filling up in the middle of a message is an error, the
    /// message can never complete.
    pub fn feed(&mut self, chunk: Bytes) -> Result<bool, BufferError> {
        if self.chunk0.is_empty() && self.ring.is_empty() {
            self.len = chunk.len();
            self.chunk0 = chunk;
            return Ok(false);
        }
        if self.ring.is_full() {
            return Err(BufferError::Overflow);
        }
        self.len += chunk.len();
        self.ring.enq(chunk);
        let full = self.ring.is_full();
        if full && self.mtype != 0 {
            return Err(BufferError::Overflow);
        }
        Ok(full)
    }

    fn pull_chunk(&mut self) -> Result<(), BufferError> {
        while self.chunk0.is_empty() {
            self.chunk0 = self.ring.deq().ok_or(BufferError::Overread)?;
        }
        Ok(())
    }

    fn check_overread(&self, size: usize) -> Result<(), BufferError> {
        if self.msg_unread < size || size > self.len {
            return Err(BufferError::Overread);
        }
        Ok(())
    }

    /// Copy exactly `dst.len()` bytes out of the chunk sequence.
    ///
    /// Only adjusts the total length, message accounting is on the caller.
    fn read_exact_raw(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        let mut filled = 0;
        while filled < dst.len() {
            self.pull_chunk()?;
            let n = usize::min(self.chunk0.len(), dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&self.chunk0[..n]);
            self.chunk0.advance(n);
            self.len -= n;
            filled += n;
        }
        Ok(())
    }

    /// Take `size` bytes out of the chunk sequence, zero-copy when the read
    /// fits entirely within the current chunk.
    fn read_raw_bytes(&mut self, size: usize) -> Result<Bytes, BufferError> {
        if size == 0 {
            return Ok(Bytes::new());
        }
        self.pull_chunk()?;
        if self.chunk0.len() >= size {
            self.len -= size;
            return Ok(self.chunk0.split_to(size));
        }
        let mut buf = BytesMut::zeroed(size);
        self.read_exact_raw(&mut buf)?;
        Ok(buf.freeze())
    }

    fn discard_raw(&mut self, mut size: usize) -> Result<(), BufferError> {
        while size > 0 {
            self.pull_chunk()?;
            let n = usize::min(self.chunk0.len(), size);
            self.chunk0.advance(n);
            self.len -= n;
            size -= n;
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        self.check_overread(N)?;
        let mut dst = [0u8; N];
        self.read_exact_raw(&mut dst)?;
        self.msg_unread -= N;
        Ok(dst)
    }

    read_be! {
        read_u8(u8);
        read_i16(i16);
        read_u16(u16);
        read_i32(i32);
        read_u32(u32);
        read_i64(i64);
        read_u64(u64);
    }

    pub fn read_buffer(&mut self, size: usize) -> Result<Bytes, BufferError> {
        self.check_overread(size)?;
        let bytes = self.read_raw_bytes(size)?;
        self.msg_unread -= size;
        Ok(bytes)
    }

    pub fn read_uuid(&mut self) -> Result<uuid::Uuid, BufferError> {
        self.read_array().map(uuid::Uuid::from_bytes)
    }

    /// Read a 4-byte big-endian length followed by the utf8 bytes.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_buffer(len)?;
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    /// Read a 4-byte big-endian length followed by that many bytes.
    pub fn read_len_prefixed(&mut self) -> Result<Bytes, BufferError> {
        let len = self.read_u32()? as usize;
        self.read_buffer(len)
    }

    /// Try to frame the next message.
    ///
    /// Returns `false` until the complete header and body are buffered, the
    /// caller must wait for more data.
    pub fn take_message(&mut self) -> Result<bool, BufferError> {
        if self.msg_ready {
            return Ok(true);
        }

        if self.mtype == 0 {
            if self.len < 1 {
                return Ok(false);
            }
            let mut b = [0u8; 1];
            self.read_exact_raw(&mut b)?;
            self.mtype = b[0];
        }

        if self.msg_len == 0 {
            if self.len < 4 {
                return Ok(false);
            }
            let mut b = [0u8; 4];
            self.read_exact_raw(&mut b)?;
            self.msg_len = u32::from_be_bytes(b) as usize;
            // length includes the length field itself
            if self.msg_len < 4 {
                return Err(BufferError::Frame);
            }
            self.msg_unread = self.msg_len - 4;
        }

        if self.len < self.msg_unread {
            return Ok(false);
        }

        self.msg_ready = true;
        Ok(true)
    }

    /// Like [`take_message`][Self::take_message], but only frames the
    /// message when its type byte matches `mtype`.
    pub fn take_message_type(&mut self, mtype: u8) -> Result<bool, BufferError> {
        if self.msg_ready {
            return Ok(self.mtype == mtype);
        }
        if self.mtype != 0 {
            // header partially consumed by an earlier call
            return Ok(self.mtype == mtype && self.take_message()?);
        }
        if self.len >= 1 {
            self.pull_chunk()?;
            return Ok(self.chunk0[0] == mtype && self.take_message()?);
        }
        Ok(false)
    }

    /// Type byte of the currently framed message.
    pub fn message_type(&self) -> u8 {
        self.mtype
    }

    fn reset_message(&mut self) {
        self.mtype = 0;
        self.msg_len = 0;
        self.msg_unread = 0;
        self.msg_ready = false;
    }

    /// Assert the current message was fully consumed and release it.
    pub fn finish_message(&mut self) -> Result<(), BufferError> {
        if self.mtype == 0 || !self.msg_ready {
            // already finished, e.g. by consume_message()
            return Ok(());
        }
        if self.msg_unread != 0 {
            return Err(BufferError::UnreadData { mtype: self.mtype });
        }
        self.reset_message();
        Ok(())
    }

    /// Skip whatever is left of the current message and release it.
    pub fn discard_message(&mut self) -> Result<(), BufferError> {
        if !self.msg_ready {
            return Err(BufferError::NoMessage);
        }
        if self.msg_unread > 0 {
            self.discard_raw(self.msg_unread)?;
        }
        self.reset_message();
        Ok(())
    }

    /// Take the unread remainder of the current message as an opaque buffer
    /// and release it.
    pub fn consume_message(&mut self) -> Result<Bytes, BufferError> {
        if !self.msg_ready {
            return Err(BufferError::NoMessage);
        }
        let bytes = match self.msg_unread {
            0 => Bytes::new(),
            unread => self.read_raw_bytes(unread)?,
        };
        self.reset_message();
        Ok(bytes)
    }
}

impl Default for ReadMessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ===== ReadBuf =====

/// Bounds checked reader over a single framed value.
///
/// Codecs receive their payload as a `ReadBuf` scoped exactly to the value,
/// any read past the end is a [`BufferError::Overread`] and
/// [`finish`][ReadBuf::finish] asserts full consumption.
#[derive(Debug, Default)]
pub struct ReadBuf {
    buf: Bytes,
}

macro_rules! readbuf_be {
    ($(
        $name:ident($ty:ty);
    )*) => {$(
        pub fn $name(&mut self) -> Result<$ty, BufferError> {
            self.read_array().map(<$ty>::from_be_bytes)
        }
    )*};
}

impl ReadBuf {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Assert the value was fully consumed.
    pub fn finish(&self) -> Result<(), BufferError> {
        if !self.buf.is_empty() {
            return Err(BufferError::TrailingData);
        }
        Ok(())
    }

    pub fn discard(&mut self, size: usize) -> Result<(), BufferError> {
        if size > self.buf.len() {
            return Err(BufferError::Overread);
        }
        self.buf.advance(size);
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        if N > self.buf.len() {
            return Err(BufferError::Overread);
        }
        let mut dst = [0u8; N];
        dst.copy_from_slice(&self.buf[..N]);
        self.buf.advance(N);
        Ok(dst)
    }

    readbuf_be! {
        read_u8(u8);
        read_i8(i8);
        read_u16(u16);
        read_i16(i16);
        read_u32(u32);
        read_i32(i32);
        read_u64(u64);
        read_i64(i64);
        read_f32(f32);
        read_f64(f64);
    }

    pub fn read_bytes(&mut self, size: usize) -> Result<Bytes, BufferError> {
        if size > self.buf.len() {
            return Err(BufferError::Overread);
        }
        Ok(self.buf.split_to(size))
    }

    pub fn read_uuid(&mut self) -> Result<uuid::Uuid, BufferError> {
        self.read_array().map(uuid::Uuid::from_bytes)
    }

    /// Read a 4-byte big-endian length followed by the utf8 bytes.
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    /// Split off the next `size` bytes as their own value reader.
    pub fn slice(&mut self, size: usize) -> Result<ReadBuf, BufferError> {
        Ok(ReadBuf { buf: self.read_bytes(size)? })
    }

    /// Take everything left.
    pub fn consume_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    pub fn consume_as_string(&mut self) -> Result<String, BufferError> {
        let bytes = self.consume_rest();
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn message(mtype: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![mtype];
        out.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn framing_round_trip() {
        let mut wb = WriteMessageBuffer::new();
        wb.begin_message(b'P');
        wb.write_string("select 1");
        wb.write_u16(42);
        wb.end_message();
        let bytes = wb.take();

        let mut rb = ReadMessageBuffer::new();
        rb.feed(bytes).unwrap();
        assert!(rb.take_message().unwrap());
        assert_eq!(rb.message_type(), b'P');
        assert_eq!(rb.read_string().unwrap(), "select 1");
        assert_eq!(rb.read_u16().unwrap(), 42);
        rb.finish_message().unwrap();
    }

    #[test]
    fn chunking_invariance() {
        let body = b"\x00\x00\x00\x03abc\x01\x02";
        let raw = message(b'D', body);

        // every possible split point yields the same decode
        for split in 0..=raw.len() {
            let mut rb = ReadMessageBuffer::new();
            rb.feed(Bytes::copy_from_slice(&raw[..split])).unwrap();
            let ready = rb.take_message().unwrap();
            if split < raw.len() {
                assert!(!ready, "split at {split} reported ready early");
                rb.feed(Bytes::copy_from_slice(&raw[split..])).unwrap();
            }
            assert!(rb.take_message().unwrap());
            assert_eq!(rb.read_len_prefixed().unwrap(), &b"abc"[..]);
            assert_eq!(rb.read_u8().unwrap(), 1);
            assert_eq!(rb.read_u8().unwrap(), 2);
            rb.finish_message().unwrap();
        }
    }

    #[test]
    fn byte_at_a_time() {
        let raw = message(b'Z', &[0, 0, b'I']);
        let mut rb = ReadMessageBuffer::new();
        for &b in &raw[..raw.len() - 1] {
            rb.feed(Bytes::copy_from_slice(&[b])).unwrap();
            assert!(!rb.take_message().unwrap());
        }
        rb.feed(Bytes::copy_from_slice(&[raw[raw.len() - 1]])).unwrap();
        assert!(rb.take_message().unwrap());
        assert_eq!(rb.read_u16().unwrap(), 0);
        assert_eq!(rb.read_u8().unwrap(), b'I');
        rb.finish_message().unwrap();
    }

    #[test]
    fn overread_protection() {
        let raw = message(b'D', &[1, 2]);
        let mut rb = ReadMessageBuffer::new();
        rb.feed(raw.into()).unwrap();
        assert!(rb.take_message().unwrap());
        assert!(matches!(rb.read_u32(), Err(BufferError::Overread)));
        // the two valid bytes are still readable
        assert_eq!(rb.read_u16().unwrap(), 0x0102);
        rb.finish_message().unwrap();
    }

    #[test]
    fn finish_with_unread_data() {
        let raw = message(b'C', &[0, 0, 0, 0]);
        let mut rb = ReadMessageBuffer::new();
        rb.feed(raw.into()).unwrap();
        assert!(rb.take_message().unwrap());
        assert!(matches!(
            rb.finish_message(),
            Err(BufferError::UnreadData { mtype: b'C' }),
        ));
        rb.discard_message().unwrap();
        rb.finish_message().unwrap();
    }

    #[test]
    fn consume_message_returns_remainder() {
        let mut raw = message(b'D', &[0, 1, 9, 9, 9]);
        raw.extend(message(b'Z', &[0, 0, b'I']));
        let mut rb = ReadMessageBuffer::new();
        rb.feed(raw.into()).unwrap();

        assert!(rb.take_message().unwrap());
        assert_eq!(rb.read_u16().unwrap(), 1);
        assert_eq!(rb.consume_message().unwrap(), &[9, 9, 9][..]);

        // the next message is intact
        assert!(rb.take_message().unwrap());
        assert_eq!(rb.message_type(), b'Z');
        rb.discard_message().unwrap();
    }

    #[test]
    fn take_message_type_does_not_consume_mismatch() {
        let raw = message(b'Z', &[0, 0, b'I']);
        let mut rb = ReadMessageBuffer::new();
        rb.feed(raw.into()).unwrap();
        assert!(!rb.take_message_type(b'D').unwrap());
        assert!(rb.take_message_type(b'Z').unwrap());
        rb.discard_message().unwrap();
    }

    #[test]
    fn headers_layout() {
        let mut wb = WriteMessageBuffer::new();
        wb.begin_message(b'P');
        wb.write_headers(&[(0xff04, &[0, 0, 0, 0, 0, 0, 0, 0xff])]);
        wb.end_message();
        let bytes = wb.take();

        let mut rb = ReadMessageBuffer::new();
        rb.feed(bytes).unwrap();
        assert!(rb.take_message().unwrap());
        assert_eq!(rb.read_u16().unwrap(), 1);
        assert_eq!(rb.read_u16().unwrap(), 0xff04);
        assert_eq!(rb.read_len_prefixed().unwrap().len(), 8);
        rb.finish_message().unwrap();
    }

    #[test]
    #[should_panic(expected = "no current message")]
    fn write_outside_message_panics() {
        WriteMessageBuffer::new().write_u32(1);
    }

    #[test]
    #[should_panic(expected = "previous message is not finished")]
    fn nested_message_panics() {
        let mut wb = WriteMessageBuffer::new();
        wb.begin_message(b'P');
        wb.begin_message(b'E');
    }

    #[test]
    fn read_buf_slice_and_finish() {
        let mut buf = ReadBuf::new(Bytes::from_static(&[0, 0, 0, 2, 7, 7, 1]));
        let len = buf.read_i32().unwrap() as usize;
        let mut elem = buf.slice(len).unwrap();
        assert_eq!(elem.read_u16().unwrap(), 0x0707);
        elem.finish().unwrap();
        assert_eq!(buf.read_u8().unwrap(), 1);
        assert!(matches!(buf.read_u8(), Err(BufferError::Overread)));
    }
}
