//! Plain TCP transport glue.
//!
//! The driver core only needs "send raw bytes" and "wait for more bytes",
//! this is the smallest possible socket shim providing both.
use bytes::Bytes;
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use gelro::{Transport, buffer::ReadMessageBuffer};

const READ_CHUNK: usize = 8 * 1024;

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        Ok(Self { stream: TcpStream::connect(addr).await? })
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.stream.write_all(&data).await?;
        self.stream.flush().await
    }

    async fn recv(&mut self, buf: &mut ReadMessageBuffer) -> io::Result<()> {
        let mut chunk = vec![0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        chunk.truncate(n);
        buf.feed(chunk.into()).map_err(io::Error::other)?;
        Ok(())
    }
}
