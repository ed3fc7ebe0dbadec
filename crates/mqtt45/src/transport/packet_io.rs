//! Framing layer: turns a split transport into whole-`Packet` reads and
//! writes.
//!
//! Stream transports (TCP, TLS, QUIC, in-memory) are framed by reading
//! exactly one type byte, one to four remaining-length varint bytes, and
//! then exactly that many body bytes. WebSocket is message framed: every
//! binary frame is one complete MQTT packet.

use crate::error::{MqttError, Result};
use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mqtt45_protocol::{decode_packet, DataBuffer, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::TransportKind;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type MemoryRead = tokio::io::ReadHalf<tokio::io::DuplexStream>;
type MemoryWrite = tokio::io::WriteHalf<tokio::io::DuplexStream>;

/// How a transport frames packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// Continuous byte stream; packets are delimited by the fixed header.
    Stream,
    /// One transport message carries exactly one packet.
    Message,
}

pub fn encode_packet_to_buffer(packet: &Packet, buf: &mut BytesMut) -> Result<()> {
    packet.encode(buf)
}

/// Splits a connected transport into its framed halves.
pub fn split_transport(
    transport: TransportKind,
    protocol_version: u8,
) -> Result<(PacketReader, PacketWriter)> {
    match transport {
        TransportKind::Tcp(tcp) => {
            let (read, write) = tcp.into_split()?;
            Ok((
                PacketReader::tcp(read, protocol_version),
                PacketWriter::Tcp(write),
            ))
        }
        TransportKind::Tls(tls) => {
            let (read, write) = tls.into_split()?;
            Ok((
                PacketReader::tls(read, protocol_version),
                PacketWriter::Tls(Box::new(write)),
            ))
        }
        TransportKind::WebSocket(ws) => {
            let (sink, stream) = ws.into_split()?;
            Ok((
                PacketReader::websocket(stream, protocol_version),
                PacketWriter::WebSocket(sink),
            ))
        }
        TransportKind::Quic(quic) => {
            let (send, recv) = quic.into_split()?;
            Ok((
                PacketReader::quic(recv, protocol_version),
                PacketWriter::Quic(send),
            ))
        }
        TransportKind::Memory(memory) => {
            let (read, write) = memory.into_split()?;
            Ok((
                PacketReader::memory(read, protocol_version),
                PacketWriter::Memory(write),
            ))
        }
    }
}

enum ReaderHalf {
    Tcp(OwnedReadHalf),
    Tls(Box<tokio::io::ReadHalf<TlsStream<TcpStream>>>),
    WebSocket(SplitStream<WsStream>),
    Quic(quinn::RecvStream),
    Memory(MemoryRead),
}

/// Read half: produces one fully decoded [`Packet`] at a time.
pub struct PacketReader {
    half: ReaderHalf,
    protocol_version: u8,
}

impl PacketReader {
    #[must_use]
    pub fn tcp(half: OwnedReadHalf, protocol_version: u8) -> Self {
        Self {
            half: ReaderHalf::Tcp(half),
            protocol_version,
        }
    }

    #[must_use]
    pub fn tls(half: tokio::io::ReadHalf<TlsStream<TcpStream>>, protocol_version: u8) -> Self {
        Self {
            half: ReaderHalf::Tls(Box::new(half)),
            protocol_version,
        }
    }

    #[must_use]
    pub fn websocket(half: SplitStream<WsStream>, protocol_version: u8) -> Self {
        Self {
            half: ReaderHalf::WebSocket(half),
            protocol_version,
        }
    }

    #[must_use]
    pub fn quic(half: quinn::RecvStream, protocol_version: u8) -> Self {
        Self {
            half: ReaderHalf::Quic(half),
            protocol_version,
        }
    }

    #[must_use]
    pub fn memory(half: MemoryRead, protocol_version: u8) -> Self {
        Self {
            half: ReaderHalf::Memory(half),
            protocol_version,
        }
    }

    #[must_use]
    pub fn framing_mode(&self) -> FramingMode {
        match self.half {
            ReaderHalf::WebSocket(_) => FramingMode::Message,
            _ => FramingMode::Stream,
        }
    }

    /// Reads the next packet, suspending until one whole frame is
    /// available.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        let version = self.protocol_version;
        match &mut self.half {
            ReaderHalf::Tcp(r) => read_stream_packet(r, version).await,
            ReaderHalf::Tls(r) => read_stream_packet(r.as_mut(), version).await,
            ReaderHalf::Quic(r) => read_stream_packet(r, version).await,
            ReaderHalf::Memory(r) => read_stream_packet(r, version).await,
            ReaderHalf::WebSocket(stream) => read_message_packet(stream, version).await,
        }
    }
}

/// Stream framing: one byte of type+flags, 1-4 bytes of remaining-length
/// varint, then exactly `remaining_length` bytes of body.
async fn read_stream_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    protocol_version: u8,
) -> Result<Packet> {
    let mut frame = DataBuffer::new();

    let mut first = [0u8; 1];
    let read = reader.read(&mut first).await?;
    if read == 0 {
        return Err(MqttError::ConnectionError(
            "connection closed by peer".to_string(),
        ));
    }
    frame.append_u8(first[0]);

    let mut remaining_length: u32 = 0;
    let mut multiplier: u32 = 1;
    for i in 0.. {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await.map_err(map_short_read)?;
        frame.append_u8(byte[0]);
        remaining_length += u32::from(byte[0] & 0x7F) * multiplier;
        if byte[0] & 0x80 == 0 {
            break;
        }
        if i == 3 {
            return Err(MqttError::VarintOverflow);
        }
        multiplier *= 128;
    }

    let mut body = vec![0u8; remaining_length as usize];
    reader.read_exact(&mut body).await.map_err(map_short_read)?;
    frame.append_slice(&body);

    decode_packet(&mut frame, protocol_version)
}

/// Message framing: each binary frame is decoded as one whole packet.
/// Control frames are transparent; a close frame or stream end aborts.
async fn read_message_packet(
    stream: &mut SplitStream<WsStream>,
    protocol_version: u8,
) -> Result<Packet> {
    loop {
        let message = stream
            .next()
            .await
            .ok_or_else(|| MqttError::ConnectionError("websocket stream ended".to_string()))?
            .map_err(|e| MqttError::ConnectionError(format!("websocket error: {e}")))?;

        match message {
            Message::Binary(data) => {
                let mut frame = DataBuffer::from_slice(&data);
                let packet = decode_packet(&mut frame, protocol_version)?;
                if frame.readable_bytes() != 0 {
                    return Err(MqttError::UnexpectedDataLength);
                }
                return Ok(packet);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                return Err(MqttError::ConnectionError(
                    "websocket closed by peer".to_string(),
                ))
            }
            _ => {
                return Err(MqttError::UnexpectedTokens(
                    "non-binary websocket frame".to_string(),
                ))
            }
        }
    }
}

fn map_short_read(err: std::io::Error) -> MqttError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        MqttError::ConnectionError("connection closed mid-packet".to_string())
    } else {
        err.into()
    }
}

/// Write half: encodes and sends one packet per call. The send completes
/// when the transport has accepted the whole encoded frame.
pub enum PacketWriter {
    Tcp(OwnedWriteHalf),
    Tls(Box<tokio::io::WriteHalf<TlsStream<TcpStream>>>),
    WebSocket(SplitSink<WsStream, Message>),
    Quic(quinn::SendStream),
    Memory(MemoryWrite),
}

impl PacketWriter {
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf)?;
        self.write_encoded(&buf).await
    }

    async fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(w) => {
                w.write_all(bytes).await?;
                w.flush().await?;
            }
            Self::Tls(w) => {
                w.write_all(bytes).await?;
                w.flush().await?;
            }
            Self::Memory(w) => {
                w.write_all(bytes).await?;
                w.flush().await?;
            }
            Self::Quic(w) => {
                w.write_all(bytes)
                    .await
                    .map_err(|e| MqttError::ConnectionError(format!("QUIC write failed: {e}")))?;
            }
            Self::WebSocket(sink) => {
                sink.send(Message::Binary(bytes.to_vec()))
                    .await
                    .map_err(|e| MqttError::ConnectionError(format!("websocket send failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Best-effort shutdown of the write direction.
    pub async fn shutdown(&mut self) {
        match self {
            Self::Tcp(w) => {
                let _ = w.shutdown().await;
            }
            Self::Tls(w) => {
                let _ = w.shutdown().await;
            }
            Self::Memory(w) => {
                let _ = w.shutdown().await;
            }
            Self::Quic(w) => {
                let _ = w.finish();
            }
            Self::WebSocket(sink) => {
                let _ = sink.send(Message::Close(None)).await;
            }
        }
    }
}
