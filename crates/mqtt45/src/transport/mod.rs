pub mod packet_io;
pub mod quic;
pub mod tcp;
pub mod tls;
pub mod websocket;

use crate::error::Result;
use crate::testing::MemoryTransport;

pub use packet_io::{FramingMode, PacketReader, PacketWriter};
pub use quic::{QuicConfig, QuicTransport};
pub use tcp::{TcpConfig, TcpTransport};
pub use tls::{ServerTrust, TlsConfig, TlsOptions, TlsTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

use std::time::{Duration, Instant};

/// Byte-level connection. Implementations establish the link, move raw
/// bytes, and tear down; framing into packets happens one layer up in
/// [`packet_io`].
pub trait Transport: Send {
    /// Establishes the connection.
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Reads available bytes into `buf`, returning the count. Zero means
    /// the peer closed the connection.
    fn read(&mut self, buf: &mut [u8]) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Writes the whole buffer.
    fn write(&mut self, buf: &[u8]) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Closes the connection.
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    fn is_connected(&self) -> bool {
        false
    }
}

/// Dispatch over the concrete transports a session can own.
pub enum TransportKind {
    Tcp(TcpTransport),
    Tls(Box<TlsTransport>),
    WebSocket(Box<WebSocketTransport>),
    Quic(Box<QuicTransport>),
    Memory(MemoryTransport),
}

impl TransportKind {
    pub async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Tcp(t) => t.connect().await,
            Self::Tls(t) => t.connect().await,
            Self::WebSocket(t) => t.connect().await,
            Self::Quic(t) => t.connect().await,
            Self::Memory(t) => t.connect().await,
        }
    }

    /// Splits into framed reader and writer halves. Consumes the
    /// transport; the session owns both halves until teardown.
    pub fn into_split(self, protocol_version: u8) -> Result<(PacketReader, PacketWriter)> {
        packet_io::split_transport(self, protocol_version)
    }
}

/// Suppresses repeats of the same connection-level error notification.
///
/// A single transport failure tends to surface once per queued write; the
/// session must see it once, not once per write, or every reconnect
/// attempt multiplies.
#[derive(Debug, Default)]
pub struct ErrorDebounce {
    last: Option<(String, Instant)>,
}

impl ErrorDebounce {
    pub const WINDOW: Duration = Duration::from_secs(1);

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this error should be surfaced to the delegate.
    pub fn should_notify(&mut self, error: &crate::error::MqttError) -> bool {
        let text = error.to_string();
        let now = Instant::now();
        match &self.last {
            Some((previous, at)) if *previous == text && now.duration_since(*at) < Self::WINDOW => {
                false
            }
            _ => {
                self.last = Some((text, now));
                true
            }
        }
    }
}
