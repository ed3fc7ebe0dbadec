use crate::testing::{MemoryConnector, MemoryTransport};
use crate::transport::{
    QuicConfig, TcpConfig, TlsConfig, TlsOptions, TransportKind, WebSocketConfig,
};
use std::time::Duration;

/// Where and how a session connects. Configured once per client; every
/// open attempt builds a fresh transport from it.
#[derive(Clone)]
pub enum Endpoint {
    Tcp(TcpConfig),
    Tls(TlsConfig),
    /// Plain and TLS WebSocket share a config; the TLS options decide
    /// the scheme.
    WebSocket(WebSocketConfig),
    Quic(QuicConfig),
    /// In-process pipe used by the scripted-broker tests.
    Memory(MemoryConnector),
}

impl Endpoint {
    #[must_use]
    pub fn tcp(host: impl Into<String>) -> Self {
        Self::Tcp(TcpConfig::new(host, 1883))
    }

    #[must_use]
    pub fn tcp_with_port(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp(TcpConfig::new(host, port))
    }

    #[must_use]
    pub fn tls(host: impl Into<String>) -> Self {
        Self::Tls(TlsConfig::new(host, 8883))
    }

    #[must_use]
    pub fn tls_with(host: impl Into<String>, port: u16, options: TlsOptions) -> Self {
        Self::Tls(TlsConfig::new(host, port).with_options(options))
    }

    #[must_use]
    pub fn ws(host: impl Into<String>) -> Self {
        Self::WebSocket(WebSocketConfig::new(host, 8083))
    }

    #[must_use]
    pub fn wss(host: impl Into<String>) -> Self {
        Self::WebSocket(WebSocketConfig::new(host, 8084).with_tls(TlsOptions::default()))
    }

    #[must_use]
    pub fn wss_with(host: impl Into<String>, port: u16, options: TlsOptions) -> Self {
        Self::WebSocket(WebSocketConfig::new(host, port).with_tls(options))
    }

    #[must_use]
    pub fn quic(host: impl Into<String>) -> Self {
        Self::Quic(QuicConfig::new(host, 14567))
    }

    #[must_use]
    pub fn quic_with(host: impl Into<String>, port: u16, options: TlsOptions) -> Self {
        Self::Quic(QuicConfig::new(host, port).with_tls(options))
    }

    #[must_use]
    pub fn memory(connector: MemoryConnector) -> Self {
        Self::Memory(connector)
    }

    /// Builds a fresh transport for one open attempt.
    ///
    /// `quic_idle_timeout` carries the session's 1.5 x keep-alive
    /// override, applied only when pinging is enabled.
    pub(crate) fn build_transport(
        &self,
        connect_timeout: Duration,
        quic_idle_timeout: Option<Duration>,
    ) -> TransportKind {
        match self {
            Self::Tcp(config) => {
                let mut config = config.clone();
                config.connect_timeout = connect_timeout;
                TransportKind::Tcp(crate::transport::TcpTransport::new(config))
            }
            Self::Tls(config) => {
                let mut config = config.clone();
                config.tcp.connect_timeout = connect_timeout;
                TransportKind::Tls(Box::new(crate::transport::TlsTransport::new(config)))
            }
            Self::WebSocket(config) => {
                let mut config = config.clone();
                config.tcp.connect_timeout = connect_timeout;
                TransportKind::WebSocket(Box::new(crate::transport::WebSocketTransport::new(
                    config,
                )))
            }
            Self::Quic(config) => {
                let mut config = config.clone();
                if let Some(idle) = quic_idle_timeout {
                    config.idle_timeout = Some(idle);
                }
                TransportKind::Quic(Box::new(crate::transport::QuicTransport::new(config)))
            }
            Self::Memory(connector) => {
                TransportKind::Memory(MemoryTransport::new(connector.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(c) => write!(f, "tcp://{}:{}", c.host, c.port),
            Self::Tls(c) => write!(f, "mqtts://{}:{}", c.tcp.host, c.tcp.port),
            Self::WebSocket(c) if c.tls.is_some() => {
                write!(f, "wss://{}:{}{}", c.tcp.host, c.tcp.port, c.path)
            }
            Self::WebSocket(c) => write!(f, "ws://{}:{}{}", c.tcp.host, c.tcp.port, c.path),
            Self::Quic(c) => write!(f, "quic://{}:{}", c.host, c.port),
            Self::Memory(_) => write!(f, "memory://"),
        }
    }
}
