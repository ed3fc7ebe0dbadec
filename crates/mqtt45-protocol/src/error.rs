use crate::reason_codes::{ConnectReturnCode, ReasonCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// Why a CONNECT attempt was refused, version-tagged because the v3 return
/// code and the v5 reason code occupy different value spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    V3(ConnectReturnCode),
    V5(ReasonCode),
}

/// The IO error kinds that describe a failed connection rather than a
/// local fault: socket not connected, broken pipe, connection
/// reset/aborted/refused, timeout, network or host down/unreachable, and
/// a stream ending mid-frame. Only these qualify as connection-level
/// conditions; anything else (permission denied, invalid data, ...)
/// surfaces solely through the failing call's own result.
#[must_use]
pub fn is_connection_level_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::TimedOut
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown
            | ErrorKind::UnexpectedEof
    )
}

#[derive(Debug, Clone, Error)]
pub enum MqttError {
    #[error("IO error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Session is already opening or opened")]
    AlreadyOpened,

    #[error("Session is already closing or closed")]
    AlreadyClosed,

    #[error("Connect refused: {0:?}")]
    ConnectFailed(ConnectFailure),

    #[error("Publish failed: {0:?}")]
    PublishFailed(ReasonCode),

    #[error("Subscription failed: {0:?}")]
    SubscribeFailed(ReasonCode),

    #[error("Server closed the connection: {0:?}")]
    ServerClose(ReasonCode),

    #[error("Client closed the connection: {0:?}")]
    ClientClose(ReasonCode),

    #[error("Keep-alive ping timed out")]
    PingTimeout,

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Server requires enhanced authentication but no authflow was configured")]
    AuthflowRequired,

    #[error("Authentication failed")]
    AuthenticationFailed,

    // Packet-construction errors: returned to the caller, never tear down
    // the connection.
    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("QoS exceeds the maximum granted by the server")]
    QoSNotSupported,

    #[error("Server does not support retained messages")]
    RetainNotSupported,

    #[error("Topic alias out of range: {0}")]
    TopicAliasInvalid(u16),

    #[error("Subscription identifiers are not allowed in outgoing publishes")]
    SubscriptionIdentifierNotAllowed,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Decode errors: incoming bytes violate the wire format.
    #[error("Variable byte integer exceeds 4 bytes")]
    VarintOverflow,

    #[error("Not enough data for a complete packet")]
    IncompletePacket,

    #[error("Unexpected tokens: {0}")]
    UnexpectedTokens(String),

    #[error("Data length does not match the declared length")]
    UnexpectedDataLength,

    #[error("Unrecognised packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Invalid reason code: 0x{0:02X}")]
    InvalidReasonCode(u8),

    #[error("Duplicate property: 0x{0:02X}")]
    DuplicatePropertyId(u8),

    #[error("String too long: {0} bytes exceeds maximum of 65535")]
    StringTooLong(usize),

    #[error("Packet too large: size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unsupported protocol version")]
    UnsupportedProtocolVersion,

    #[error("Protocol sequencing violation: {0}")]
    UnexpectedPacket(String),

    #[error("TLS credential import failed: {0}")]
    InvalidCertData(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MqttError {
    /// True for errors that describe the peer or the network going away
    /// rather than a local misuse, used when mapping a teardown into a
    /// close reason. IO errors qualify only when their kind is on the
    /// connection-level list.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Io { kind, .. } => is_connection_level_kind(*kind),
            Self::ConnectionError(_)
            | Self::NetworkUnavailable
            | Self::PingTimeout
            | Self::ServerClose(_) => true,
            _ => false,
        }
    }

    /// True for client-side packet construction failures that must be
    /// returned to the caller without touching the connection.
    #[must_use]
    pub fn is_packet_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopicName(_)
                | Self::QoSNotSupported
                | Self::RetainNotSupported
                | Self::TopicAliasInvalid(_)
                | Self::SubscriptionIdentifierNotAllowed
                | Self::InvalidParameter(_)
        )
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
