//! TCP transport towards a meter's IP wrapper or HDLC-over-TCP port

use crate::error::{DlmsError, DlmsResult};
use crate::stream::{not_connected, IoStream, StreamAccessor, TransportLayer};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::net::TcpStream;

/// Port registered for DLMS/COSEM over TCP
pub const DEFAULT_PORT: u16 = 4059;

#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl TcpSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<IoStream<TcpStream>>,
    settings: TcpSettings,
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
        }
    }

    /// Parse `host:port`
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            DlmsError::InvalidData(format!("Invalid TCP address {:?}, expected host:port", address))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|e| DlmsError::InvalidData(format!("Invalid TCP port {:?}: {}", port, e)))?;
        Ok(Self::new(TcpSettings::new(host, port)))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn stream(&mut self) -> DlmsResult<&mut IoStream<TcpStream>> {
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> DlmsResult<()> {
        if self.stream.is_some() {
            return Err(DlmsError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }
        let target = (self.settings.host.as_str(), self.settings.port);
        let stream = tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| DlmsError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!("TCP connected to {}:{}", self.settings.host, self.settings.port);
        self.stream = Some(IoStream::new(stream));
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> DlmsResult<usize> {
        self.stream()?.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> DlmsResult<()> {
        self.stream()?.write_all(buf).await
    }

    async fn flush(&mut self) -> DlmsResult<()> {
        self.stream()?.flush().await
    }

    fn is_closed(&self) -> bool {
        self.stream.as_ref().map_or(true, |s| s.is_closed())
    }

    async fn close(&mut self) -> DlmsResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await?;
        }
        Ok(())
    }
}
