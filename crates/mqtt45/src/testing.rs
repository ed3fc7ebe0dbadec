//! In-process transport and scripted broker used by the integration
//! tests. Kept in the library so external tests can drive full session
//! flows without a network.

use crate::error::{MqttError, Result};
use crate::transport::{PacketReader, PacketWriter, Transport};
use mqtt45_protocol::packet::{ConnAckPacket, ConnectPacket};
use mqtt45_protocol::{Packet, PacketType, ReasonCode};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Client side of an in-process listener. Each connect produces a fresh
/// duplex pipe, so reconnect scenarios behave like real sockets.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
}

/// Broker side: yields one [`DuplexStream`] per client connect.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<DuplexStream>,
}

#[must_use]
pub fn memory_pair() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryConnector { accept_tx }, MemoryListener { accept_rx })
}

impl MemoryListener {
    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> Result<DuplexStream> {
        self.accept_rx
            .recv()
            .await
            .ok_or_else(|| MqttError::ConnectionError("memory listener closed".to_string()))
    }
}

pub struct MemoryTransport {
    connector: MemoryConnector,
    stream: Option<DuplexStream>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new(connector: MemoryConnector) -> Self {
        Self {
            connector,
            stream: None,
        }
    }

    pub fn into_split(
        mut self,
    ) -> Result<(
        tokio::io::ReadHalf<DuplexStream>,
        tokio::io::WriteHalf<DuplexStream>,
    )> {
        let stream = self.stream.take().ok_or(MqttError::NotConnected)?;
        Ok(tokio::io::split(stream))
    }
}

impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<()> {
        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        self.connector
            .accept_tx
            .send(server)
            .map_err(|_| MqttError::ConnectionError("memory listener gone".to_string()))?;
        self.stream = Some(client);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use tokio::io::AsyncReadExt;
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let stream = self.stream.as_mut().ok_or(MqttError::NotConnected)?;
        stream.write_all(buf).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// One accepted client connection, framed for packet-level scripting.
pub struct BrokerSession {
    reader: PacketReader,
    writer: PacketWriter,
    protocol_version: u8,
}

impl BrokerSession {
    #[must_use]
    pub fn new(stream: DuplexStream, protocol_version: u8) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: PacketReader::memory(read, protocol_version),
            writer: PacketWriter::Memory(write),
            protocol_version,
        }
    }

    pub async fn recv(&mut self) -> Result<Packet> {
        self.reader.read_packet().await
    }

    /// Receives packets until one of the wanted type arrives, skipping
    /// everything else (PINGREQs mostly).
    pub async fn recv_type(&mut self, wanted: PacketType) -> Result<Packet> {
        loop {
            let packet = self.recv().await?;
            if packet.packet_type() == wanted {
                return Ok(packet);
            }
        }
    }

    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        self.writer.write_packet(&packet).await
    }

    /// Reads the CONNECT that every session opens with.
    pub async fn expect_connect(&mut self) -> Result<ConnectPacket> {
        match self.recv().await? {
            Packet::Connect(connect) => Ok(*connect),
            other => Err(MqttError::UnexpectedPacket(format!(
                "expected CONNECT, got {:?}",
                other.packet_type()
            ))),
        }
    }

    /// Accepts the connection with a plain successful CONNACK.
    pub async fn accept_connect(&mut self, session_present: bool) -> Result<ConnectPacket> {
        let connect = self.expect_connect().await?;
        self.send(Packet::ConnAck(ConnAckPacket::new(
            ReasonCode::Success,
            session_present,
            self.protocol_version,
        )))
        .await?;
        Ok(connect)
    }

    /// Drops the connection without a DISCONNECT.
    pub async fn drop_connection(mut self) {
        self.writer.shutdown().await;
    }
}

/// Scripted in-memory broker: accepts session connections and hands each
/// to the test as a [`BrokerSession`].
pub struct ScriptedBroker {
    listener: Mutex<MemoryListener>,
    protocol_version: u8,
}

impl ScriptedBroker {
    /// Returns the broker and the connector to build the client's
    /// [`crate::Endpoint::Memory`] from.
    #[must_use]
    pub fn new(protocol_version: u8) -> (Arc<Self>, MemoryConnector) {
        let (connector, listener) = memory_pair();
        (
            Arc::new(Self {
                listener: Mutex::new(listener),
                protocol_version,
            }),
            connector,
        )
    }

    pub async fn accept(&self) -> Result<BrokerSession> {
        let stream = self.listener.lock().await.accept().await?;
        Ok(BrokerSession::new(stream, self.protocol_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt45_protocol::packet::PubAckPacket;

    #[tokio::test]
    async fn test_memory_transport_round_trip() {
        let (connector, mut listener) = memory_pair();

        let mut transport = MemoryTransport::new(connector);
        transport.connect().await.unwrap();
        let server = listener.accept().await.unwrap();
        let mut broker = BrokerSession::new(server, 5);

        let (read, write) = transport.into_split().unwrap();
        let mut reader = PacketReader::memory(read, 5);
        let mut writer = PacketWriter::Memory(write);

        writer.write_packet(&Packet::PingReq).await.unwrap();
        assert_eq!(broker.recv().await.unwrap(), Packet::PingReq);

        broker
            .send(Packet::PubAck(PubAckPacket::new(5)))
            .await
            .unwrap();
        assert_eq!(
            reader.read_packet().await.unwrap(),
            Packet::PubAck(PubAckPacket::new(5))
        );
    }

    #[tokio::test]
    async fn test_reconnect_creates_fresh_pipe() {
        let (connector, mut listener) = memory_pair();

        let mut first = MemoryTransport::new(connector.clone());
        first.connect().await.unwrap();
        let _first_server = listener.accept().await.unwrap();

        let mut second = MemoryTransport::new(connector);
        second.connect().await.unwrap();
        let _second_server = listener.accept().await.unwrap();
    }
}
