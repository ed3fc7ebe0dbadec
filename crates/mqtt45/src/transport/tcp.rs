use crate::error::{MqttError, Result};
use crate::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Plain TCP endpoint options.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
    pub connect_timeout: Duration,
}

impl TcpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            nodelay: true,
            connect_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

pub struct TcpTransport {
    config: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    #[must_use]
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub(crate) async fn connect_stream(config: &TcpConfig) -> Result<TcpStream> {
        let addr = (config.host.as_str(), config.port);
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MqttError::Timeout)??;
        if config.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(stream)
    }

    pub fn into_split(mut self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = self.stream.take().ok_or(MqttError::NotConnected)?;
        Ok(stream.into_split())
    }
}

impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        let stream = Self::connect_stream(&self.config).await?;
        tracing::debug!(host = %self.config.host, port = self.config.port, "TCP connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
