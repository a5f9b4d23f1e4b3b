//! Byte stream abstraction under the HDLC link

use crate::error::{DlmsError, DlmsResult};
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Access to a physical byte stream towards a meter
///
/// Reads are not bounded by a timeout here; the link layer races them
/// against its own deadlines. `read` must be cancel safe.
#[async_trait]
pub trait StreamAccessor: Send {
    /// Read into `buf`, returning 0 at end of stream
    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize>;

    async fn write_all(&mut self, buf: &[u8]) -> DlmsResult<()>;

    async fn flush(&mut self) -> DlmsResult<()>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> DlmsResult<()>;
}

/// A stream that has to be opened before use
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    async fn open(&mut self) -> DlmsResult<()>;
}

pub(crate) fn not_connected() -> DlmsError {
    DlmsError::Connection(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "stream not connected",
    ))
}

/// [`StreamAccessor`] over any tokio byte stream
///
/// Used for already connected sockets and for in-memory pipes.
pub struct IoStream<S> {
    inner: Option<S>,
}

impl<S> IoStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self { inner: Some(inner) }
    }

    fn inner(&mut self) -> DlmsResult<&mut S> {
        self.inner.as_mut().ok_or_else(not_connected)
    }
}

impl<S> fmt::Debug for IoStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoStream")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[async_trait]
impl<S> StreamAccessor for IoStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        let n = self.inner()?.read(buf).await?;
        if n == 0 {
            self.inner = None;
        }
        Ok(n)
    }

    async fn write_all(&mut self, buf: &[u8]) -> DlmsResult<()> {
        self.inner()?.write_all(buf).await?;
        Ok(())
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.inner()?.flush().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.inner.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_round_trip() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = IoStream::new(a);
        let mut right = IoStream::new(b);
        left.write_all(&[0x7E, 0xA0, 0x7E]).await.unwrap();
        left.flush().await.unwrap();
        let mut buf = [0u8; 8];
        let n = right.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x7E, 0xA0, 0x7E]);
    }

    #[tokio::test]
    async fn test_eof_marks_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = IoStream::new(a);
        drop(b);
        let mut buf = [0u8; 4];
        assert_eq!(left.read(&mut buf).await.unwrap(), 0);
        assert!(left.is_closed());
        assert!(left.write_all(&[1]).await.is_err());
    }
}
