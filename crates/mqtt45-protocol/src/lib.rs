//! Wire-level MQTT 3.1.1 / 5.0 codec.
//!
//! This crate contains everything below the session layer: the cursor
//! buffer, variable-byte-integer and string codecs, the v5 property TLV
//! set, typed encoders/decoders for all fifteen control packet types in
//! both protocol versions, and the packet-identifier allocator.
//!
//! The async client built on top of this lives in the `mqtt45` crate.

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod encoding;
pub mod error;
pub mod packet;
pub mod packet_id;
pub mod properties;
pub mod reason_codes;
pub mod types;

pub use buffer::DataBuffer;
pub use error::{is_connection_level_kind, ConnectFailure, MqttError, Result};
pub use packet::{decode_packet, FixedHeader, MqttPacket, Packet, PacketType};
pub use packet_id::PacketIdAllocator;
pub use properties::{Properties, PropertyId, PropertyValue, PropertyValueType};
pub use reason_codes::{ConnectReturnCode, ReasonCode};
pub use types::{Message, ProtocolVersion, QoS, WillMessage};
