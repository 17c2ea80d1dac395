use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Pass-through stream that records every byte read from and written to the
/// inner stream.
///
/// The TLS library drives the handshake through this wrapper, so the raw
/// ServerHello is still available after the handshake returns or fails.
/// Buffers grow for the lifetime of the stream, which is one probe.
#[derive(Debug)]
pub struct CaptureStream<S> {
    inner: S,
    reads: Vec<u8>,
    writes: Vec<u8>,
}

impl<S> CaptureStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Copy of everything read from the inner stream so far.
    pub fn read_bytes(&self) -> Vec<u8> {
        self.reads.clone()
    }

    /// Copy of everything the inner stream accepted for writing so far.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.clone()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CaptureStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.reads.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CaptureStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // Only what the inner stream took; a Pending or short write is
        // retried by the caller with the remainder.
        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.writes.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn records_partial_reads_in_order() {
        let mock = Builder::new()
            .read(&[0x16, 0x03, 0x03])
            .read(&[0x00, 0x02])
            .read(&[0x02, 0x28])
            .build();
        let mut stream = CaptureStream::new(mock);

        let mut out = Vec::new();
        let mut chunk = [0u8; 2];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }

        let expected = vec![0x16, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];
        assert_eq!(out, expected);
        assert_eq!(stream.read_bytes(), expected);
        assert!(stream.written_bytes().is_empty());
    }

    #[tokio::test]
    async fn records_writes_and_forwards_them() {
        let mock = Builder::new().write(b"client").write(b"hello").build();
        let mut stream = CaptureStream::new(mock);

        stream.write_all(b"client").await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(stream.written_bytes(), b"clienthello".to_vec());
        assert!(stream.read_bytes().is_empty());
    }

    #[tokio::test]
    async fn failed_read_captures_nothing() {
        let mock = Builder::new()
            .read(b"ok")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut stream = CaptureStream::new(mock);

        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 2);
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(stream.read_bytes(), b"ok".to_vec());
    }

    #[tokio::test]
    async fn snapshots_are_independent_copies() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = CaptureStream::new(client);

        server.write_all(b"abc").await.unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        let first = stream.read_bytes();

        server.write_all(b"def").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();

        assert_eq!(first, b"abc".to_vec());
        assert_eq!(stream.read_bytes(), b"abcdef".to_vec());
    }
}
