use crate::error::MqttError;
use mqtt45_protocol::ReasonCode;

/// Session lifecycle state. The initial state is `Closed(None)`.
#[derive(Debug, Clone)]
pub enum Status {
    Opening,
    Opened,
    Closing,
    Closed(Option<CloseReason>),
}

impl Default for Status {
    fn default() -> Self {
        Status::Closed(None)
    }
}

impl Status {
    #[must_use]
    pub fn is_opened(&self) -> bool {
        matches!(self, Status::Opened)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Status::Closed(_))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Status::Opening => "opening",
            Status::Opened => "opened",
            Status::Closing => "closing",
            Status::Closed(_) => "closed",
        }
    }
}

/// Why a session reached `Closed`, used to decide whether a reconnect is
/// appropriate.
#[derive(Debug, Clone)]
pub enum CloseReason {
    PingTimeout,
    NetworkUnavailable,
    ServerClose(ReasonCode),
    ClientClose(ReasonCode),
    /// The peer violated the protocol or sent undecodable bytes.
    ProtocolError(Box<MqttError>),
    /// The transport failed underneath the session. The kind is the
    /// underlying IO condition; failures without one (TLS, WebSocket,
    /// QUIC wrappers) carry `ErrorKind::Other`.
    TransportError {
        kind: std::io::ErrorKind,
        message: String,
    },
    Other(String),
}

impl CloseReason {
    /// Maps a teardown error into the close reason the status carries.
    #[must_use]
    pub fn from_error(error: &MqttError) -> Self {
        match error {
            MqttError::PingTimeout => CloseReason::PingTimeout,
            MqttError::NetworkUnavailable => CloseReason::NetworkUnavailable,
            MqttError::ServerClose(code) => CloseReason::ServerClose(*code),
            MqttError::ClientClose(code) => CloseReason::ClientClose(*code),
            MqttError::Io { kind, message } => CloseReason::TransportError {
                kind: *kind,
                message: message.clone(),
            },
            MqttError::ConnectionError(message) => CloseReason::TransportError {
                kind: std::io::ErrorKind::Other,
                message: message.clone(),
            },
            MqttError::VarintOverflow
            | MqttError::IncompletePacket
            | MqttError::UnexpectedTokens(_)
            | MqttError::UnexpectedDataLength
            | MqttError::InvalidPacketType(_)
            | MqttError::MalformedPacket(_)
            | MqttError::InvalidReasonCode(_)
            | MqttError::UnexpectedPacket(_)
            | MqttError::ProtocolError(_) => CloseReason::ProtocolError(Box::new(error.clone())),
            other => CloseReason::Other(other.to_string()),
        }
    }

    /// The error resolved into every pending completer when a close with
    /// this reason tears the session down.
    #[must_use]
    pub fn to_error(&self) -> MqttError {
        match self {
            CloseReason::PingTimeout => MqttError::PingTimeout,
            CloseReason::NetworkUnavailable => MqttError::NetworkUnavailable,
            CloseReason::ServerClose(code) => MqttError::ServerClose(*code),
            CloseReason::ClientClose(code) => MqttError::ClientClose(*code),
            CloseReason::ProtocolError(error) => (**error).clone(),
            CloseReason::TransportError { kind, message } => {
                if *kind == std::io::ErrorKind::Other {
                    MqttError::ConnectionError(message.clone())
                } else {
                    MqttError::Io {
                        kind: *kind,
                        message: message.clone(),
                    }
                }
            }
            CloseReason::Other(message) => MqttError::ConnectionError(message.clone()),
        }
    }

    /// Reasons that must never lead to a reconnect regardless of the
    /// retrier's filter: the monitor reporting the network gone, and any
    /// transport failure whose IO kind says the network itself is down
    /// or unreachable.
    #[must_use]
    pub fn forbids_retry(&self) -> bool {
        match self {
            CloseReason::NetworkUnavailable => true,
            CloseReason::TransportError { kind, .. } => matches!(
                kind,
                std::io::ErrorKind::NetworkUnreachable | std::io::ErrorKind::NetworkDown
            ),
            _ => false,
        }
    }
}

/// Parameters negotiated on CONNACK.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub max_qos: mqtt45_protocol::QoS,
    pub max_packet_size: Option<u32>,
    pub retain_available: bool,
    pub max_topic_alias: u16,
    pub server_keep_alive: Option<u16>,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            max_qos: mqtt45_protocol::QoS::ExactlyOnce,
            max_packet_size: None,
            retain_available: true,
            max_topic_alias: 65535,
            server_keep_alive: None,
        }
    }
}
