//! # mqtt45
//!
//! Async MQTT 3.1.1 / 5.0 client over TCP, TLS, WebSocket, WSS and
//! QUIC.
//!
//! The wire codec lives in the `mqtt45-protocol` crate; this crate adds
//! the transports, the session state machine with QoS 1/2 delivery,
//! keep-alive pinging, reconnection with backoff, and v5
//! enhanced-authentication flows.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mqtt45::{ConnectOptions, Endpoint, MqttClient, PublishOptions, QoS, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MqttClient::new(
//!         Endpoint::tcp("test.mosquitto.org"),
//!         ConnectOptions::new("weather-station"),
//!     )?;
//!
//!     let mut events = client.events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let SessionEvent::Message(msg) = event {
//!                 println!("{}: {:?}", msg.topic, msg.payload);
//!             }
//!         }
//!     });
//!
//!     client.open().await?;
//!     client.subscribe("weather/#", QoS::AtLeastOnce).await?;
//!     client
//!         .publish(
//!             "weather/station1/temp",
//!             &b"21.5"[..],
//!             PublishOptions {
//!                 qos: QoS::AtLeastOnce,
//!                 ..PublishOptions::default()
//!             },
//!         )
//!         .await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::module_name_repetitions)]

pub mod callback;
pub mod client;
pub mod endpoint;
pub mod options;
pub mod testing;
pub mod transport;

pub use mqtt45_protocol::error;
pub use mqtt45_protocol::{
    DataBuffer, Message, MqttError, Packet, PacketType, Properties, PropertyId, PropertyValue,
    ProtocolVersion, QoS, ReasonCode, Result, WillMessage,
};

pub use callback::{SessionDelegate, SessionEvent};
pub use client::{
    auth_flow, AuthFlow, CloseReason, ConnectAck, ConnectParams, MqttClient, PublishAck,
    PublishOptions, Reachability, ReachabilityFeed, ReachabilityMonitor, RetryConfig, RetryPolicy,
    Status,
};
pub use endpoint::Endpoint;
pub use options::{ConnectOptions, Identity, SessionConfig};
pub use transport::{ServerTrust, TlsOptions};
