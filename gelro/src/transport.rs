//! The [`Transport`] trait.
use bytes::Bytes;
use std::io;

use crate::buffer::ReadMessageBuffer;

/// A byte stream carrying the framed protocol.
///
/// The core drives the entire protocol through two narrow entry points:
/// send raw bytes, and wait for more bytes. [`recv`][Transport::recv] is
/// the single suspension point per connection, it resolves once at least
/// one new chunk has been fed into the read buffer via
/// [`ReadMessageBuffer::feed`].
///
/// A `feed` that reports a full ring should be surfaced as transport
/// backpressure (stop reading the socket until the buffer drains).
pub trait Transport {
    /// Send raw bytes to the server, fire and forget.
    fn send(&mut self, data: Bytes) -> impl Future<Output = io::Result<()>>;

    /// Suspend until more data arrived, feeding whole chunks into `buf`.
    ///
    /// An end-of-stream or I/O failure error here permanently aborts the
    /// connection.
    fn recv(&mut self, buf: &mut ReadMessageBuffer) -> impl Future<Output = io::Result<()>>;
}

impl<T: Transport> Transport for &mut T {
    fn send(&mut self, data: Bytes) -> impl Future<Output = io::Result<()>> {
        T::send(self, data)
    }

    fn recv(&mut self, buf: &mut ReadMessageBuffer) -> impl Future<Output = io::Result<()>> {
        T::recv(self, buf)
    }
}
