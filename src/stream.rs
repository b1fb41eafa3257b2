//! Minimal duplex byte-stream abstraction the framing protocols run on.
//!
//! Protocols never name a socket type: anything that is tokio
//! `AsyncRead + AsyncWrite` qualifies, which covers `TcpStream` in
//! production and `tokio::io::DuplexStream` or the scripted test double
//! in tests.

use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A duplex byte stream a framing protocol can drive.
///
/// `read` returning `Ok(0)` means the peer closed the stream. Deadlines
/// are applied by the caller (`tokio::time::timeout`), not the stream.
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes, returning how many arrived.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Shut down the write side, signalling EOF to the peer.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

impl<T> ByteStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(self, buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}
