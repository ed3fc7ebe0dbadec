use crate::error::{MqttError, Result};
use crate::transport::tls::TlsOptions;
use crate::transport::Transport;
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// QUIC endpoint options. ALPN is always `mqtt`.
#[derive(Debug, Clone)]
pub struct QuicConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsOptions,
    /// QUIC enforces its own handshake deadline; the session's
    /// `connect_timeout` is advisory here.
    pub connect_timeout: Duration,
    /// Connection idle timeout. The session overrides this to
    /// 1.5 x keep-alive when pinging is enabled so the QUIC layer never
    /// times out between scheduled pings.
    pub idle_timeout: Option<Duration>,
}

impl QuicConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsOptions::default(),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: None,
        }
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    fn build_client_config(&self) -> Result<ClientConfig> {
        let mut crypto = self.tls.build_client_config()?;
        crypto.alpn_protocols = vec![b"mqtt".to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| MqttError::ConnectionError(format!("failed to build QUIC config: {e}")))?;
        let mut config = ClientConfig::new(Arc::new(quic_crypto));

        if let Some(idle) = self.idle_timeout {
            let mut transport = quinn::TransportConfig::default();
            transport.max_idle_timeout(Some(idle.try_into().map_err(|_| {
                MqttError::Configuration("idle timeout out of range".to_string())
            })?));
            config.transport_config(Arc::new(transport));
        }

        Ok(config)
    }
}

pub struct QuicTransport {
    config: QuicConfig,
    endpoint: Option<Endpoint>,
    connection: Option<Connection>,
    control_stream: Option<(SendStream, RecvStream)>,
}

impl QuicTransport {
    #[must_use]
    pub fn new(config: QuicConfig) -> Self {
        Self {
            config,
            endpoint: None,
            connection: None,
            control_stream: None,
        }
    }

    pub fn into_split(mut self) -> Result<(SendStream, RecvStream)> {
        let (send, recv) = self.control_stream.take().ok_or(MqttError::NotConnected)?;
        Ok((send, recv))
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs =
            tokio::net::lookup_host((self.config.host.as_str(), self.config.port)).await?;
        addrs.next().ok_or_else(|| {
            MqttError::ConnectionError(format!("no address for host {}", self.config.host))
        })
    }
}

impl Transport for QuicTransport {
    async fn connect(&mut self) -> Result<()> {
        let remote = self.resolve().await?;
        let bind: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };

        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| MqttError::ConnectionError(format!("QUIC endpoint failed: {e}")))?;
        endpoint.set_default_client_config(self.config.build_client_config()?);

        let server_name = self
            .config
            .tls
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.host.clone());

        let connecting = endpoint
            .connect(remote, &server_name)
            .map_err(|e| MqttError::ConnectionError(format!("QUIC connect failed: {e}")))?;
        let connection = tokio::time::timeout(self.config.connect_timeout, connecting)
            .await
            .map_err(|_| MqttError::Timeout)?
            .map_err(|e| MqttError::ConnectionError(format!("QUIC handshake failed: {e}")))?;

        let control_stream = connection
            .open_bi()
            .await
            .map_err(|e| MqttError::ConnectionError(format!("QUIC stream open failed: {e}")))?;

        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            "QUIC connected"
        );
        self.endpoint = Some(endpoint);
        self.connection = Some(connection);
        self.control_stream = Some(control_stream);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (_, recv) = self.control_stream.as_mut().ok_or(MqttError::NotConnected)?;
        Ok(AsyncReadExt::read(recv, buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let (send, _) = self.control_stream.as_mut().ok_or(MqttError::NotConnected)?;
        AsyncWriteExt::write_all(send, buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((mut send, _)) = self.control_stream.take() {
            let _ = send.shutdown().await;
        }
        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"client close");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.wait_idle().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some() && self.control_stream.is_some()
    }
}
