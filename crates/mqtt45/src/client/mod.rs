//! Public client surface over the session engine.

pub mod auth_flow;
mod inflight;
mod keepalive;
mod monitor;
mod pending;
mod qos;
pub mod retry;
mod session;
pub mod state;

pub use auth_flow::{auth_flow, AuthFlow};
pub use monitor::{Reachability, ReachabilityFeed, ReachabilityMonitor};
pub use qos::PublishAck;
pub use retry::{RetryConfig, RetryFilter, RetryPolicy};
pub use session::ConnectAck;
pub use state::{CloseReason, ConnectParams, Status};

use crate::callback::{SessionDelegate, SessionEvent};
use crate::client::session::{SessionInner, TeardownSource};
use crate::endpoint::Endpoint;
use crate::error::{MqttError, Result};
use crate::options::ConnectOptions;
use bytes::Bytes;
use mqtt45_protocol::packet::{
    AuthPacket, DisconnectPacket, SubAckPacket, SubscribePacket, SubscriptionOptions,
    UnsubAckPacket, UnsubscribePacket,
};
use mqtt45_protocol::{Packet, Properties, QoS, ReasonCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Publish knobs beyond topic and payload.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub properties: Properties,
}

/// Dual-version MQTT client. One instance owns one session against one
/// endpoint; `open` may be called again after a close.
#[derive(Clone)]
pub struct MqttClient {
    inner: Arc<SessionInner>,
}

impl MqttClient {
    /// # Errors
    /// Rejects configurations with zero timers.
    pub fn new(endpoint: Endpoint, options: ConnectOptions) -> Result<Self> {
        options.config.validate()?;
        Ok(Self {
            inner: SessionInner::new(endpoint, options),
        })
    }

    /// Opens the session: connects the transport, runs CONNECT/CONNACK
    /// (and any enhanced-auth rounds), and transitions to `Opened`.
    ///
    /// # Errors
    /// `AlreadyOpened` when called while opening or opened;
    /// `ConnectFailed` when the broker refuses; transport errors
    /// otherwise.
    pub async fn open(&self) -> Result<ConnectAck> {
        self.inner.open_connection(false).await
    }

    /// Closes with the default `Success` reason.
    pub async fn close(&self) -> Result<()> {
        self.close_with(ReasonCode::Success, Properties::default())
            .await
    }

    /// Sends DISCONNECT best-effort and tears the session down to
    /// `Closed(clientClose(code))`.
    ///
    /// # Errors
    /// `AlreadyClosed` when the session is already closing or closed.
    pub async fn close_with(&self, code: ReasonCode, properties: Properties) -> Result<()> {
        let was_opened = {
            let mut status = self.inner.status.lock();
            match &*status {
                Status::Opened => {
                    *status = Status::Closing;
                    true
                }
                Status::Opening => false,
                Status::Closing | Status::Closed(_) => return Err(MqttError::AlreadyClosed),
            }
        };

        if was_opened {
            self.inner.events.emit(SessionEvent::StatusChanged {
                old: Status::Opened,
                new: Status::Closing,
            });
            let disconnect = DisconnectPacket {
                reason_code: code,
                properties,
                protocol_version: self.inner.version.as_u8(),
            };
            let _ = self
                .inner
                .send_packet(&Packet::Disconnect(disconnect))
                .await;
        }

        self.inner
            .teardown(CloseReason::ClientClose(code), TeardownSource::User)
            .await;
        Ok(())
    }

    /// Publishes a message and resolves per its QoS: immediately for
    /// QoS 0, on PUBACK for QoS 1, on PUBCOMP for QoS 2.
    ///
    /// # Errors
    /// `NotConnected` while not opened; packet-construction errors for
    /// invariant violations; `PublishFailed` when the flow ends with an
    /// error reason.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<PublishAck> {
        if !self.inner.status.lock().is_opened() {
            return Err(MqttError::NotConnected);
        }

        let mut packet = mqtt45_protocol::packet::PublishPacket::new(
            topic,
            payload,
            self.inner.version.as_u8(),
        );
        packet.qos = options.qos;
        packet.retain = options.retain;
        if self.inner.version.is_v5() {
            packet.properties = options.properties;
        }

        let params = self.inner.params.lock().clone();
        qos::validate_publish(&packet, &params)?;

        if options.qos == QoS::AtMostOnce {
            self.inner.send_packet(&Packet::Publish(packet)).await?;
            return Ok(PublishAck::qos0());
        }

        packet.packet_id = Some(self.inner.packet_ids.next());
        qos::publish_qos12(&self.inner, packet).await
    }

    /// Subscribes to a single topic filter.
    pub async fn subscribe(&self, filter: impl Into<String>, qos: QoS) -> Result<SubAckPacket> {
        self.subscribe_with_options(filter, SubscriptionOptions::new(qos), Properties::default())
            .await
    }

    /// # Errors
    /// `SubscribeFailed` carries the first error reason the broker
    /// granted.
    pub async fn subscribe_with_options(
        &self,
        filter: impl Into<String>,
        options: SubscriptionOptions,
        properties: Properties,
    ) -> Result<SubAckPacket> {
        if !self.inner.status.lock().is_opened() {
            return Err(MqttError::NotConnected);
        }

        let packet_id = self.inner.packet_ids.next();
        let mut packet = SubscribePacket::new(packet_id, self.inner.version.as_u8())
            .add_filter_with_options(filter, options);
        if self.inner.version.is_v5() {
            packet.properties = properties;
        }

        let completion = self.inner.pending.register_active(packet_id);
        self.inner.send_packet(&Packet::Subscribe(packet)).await?;

        let publish_timeout = self.inner.options.lock().config.publish_timeout;
        let packet = match tokio::time::timeout(publish_timeout, completion).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(MqttError::UnexpectedPacket(
                    "subscribe flow superseded".to_string(),
                ))
            }
            Err(_) => {
                self.inner.pending.cancel_active(packet_id);
                return Err(MqttError::Timeout);
            }
        };

        let Packet::SubAck(suback) = packet else {
            return Err(MqttError::UnexpectedPacket(
                "expected SUBACK".to_string(),
            ));
        };
        for code in &suback.reason_codes {
            if code.granted_qos().is_none() {
                return Err(MqttError::SubscribeFailed(
                    mqtt45_protocol::ReasonCode::from_u8(*code as u8)
                        .unwrap_or(ReasonCode::UnspecifiedError),
                ));
            }
        }
        Ok(suback)
    }

    pub async fn unsubscribe(&self, filter: impl Into<String>) -> Result<UnsubAckPacket> {
        if !self.inner.status.lock().is_opened() {
            return Err(MqttError::NotConnected);
        }

        let packet_id = self.inner.packet_ids.next();
        let packet =
            UnsubscribePacket::new(packet_id, self.inner.version.as_u8()).add_filter(filter);

        let completion = self.inner.pending.register_active(packet_id);
        self.inner.send_packet(&Packet::Unsubscribe(packet)).await?;

        let publish_timeout = self.inner.options.lock().config.publish_timeout;
        let packet = match tokio::time::timeout(publish_timeout, completion).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(MqttError::UnexpectedPacket(
                    "unsubscribe flow superseded".to_string(),
                ))
            }
            Err(_) => {
                self.inner.pending.cancel_active(packet_id);
                return Err(MqttError::Timeout);
            }
        };

        match packet {
            Packet::UnsubAck(unsuback) => Ok(unsuback),
            _ => Err(MqttError::UnexpectedPacket("expected UNSUBACK".to_string())),
        }
    }

    /// Awaitable round-trip ping outside the keep-alive schedule.
    pub async fn ping(&self) -> Result<()> {
        if !self.inner.status.lock().is_opened() {
            return Err(MqttError::NotConnected);
        }
        let completion = self.inner.pending.register_ping();
        self.inner.send_packet(&Packet::PingReq).await?;

        let ping_timeout = self.inner.options.lock().config.ping_timeout;
        match tokio::time::timeout(ping_timeout, completion).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_)) => Err(MqttError::UnexpectedPacket(
                "ping slot superseded".to_string(),
            )),
            Err(_) => {
                self.inner.pending.cancel_ping();
                Err(MqttError::Timeout)
            }
        }
    }

    /// Starts a v5 re-authentication round using the configured
    /// authentication method and authflow.
    ///
    /// # Errors
    /// `AuthflowRequired` when no method or flow is configured.
    pub async fn reauthenticate(&self) -> Result<()> {
        if !self.inner.status.lock().is_opened() {
            return Err(MqttError::NotConnected);
        }
        let method = self
            .inner
            .options
            .lock()
            .properties
            .authentication_method()
            .ok_or(MqttError::AuthflowRequired)?;
        if self.inner.authflow.lock().is_none() {
            return Err(MqttError::AuthflowRequired);
        }

        let data = self.inner.options.lock().properties.authentication_data();
        let packet = AuthPacket::re_authenticate(method, data)?;

        let completion = self.inner.pending.register_auth();
        self.inner.send_packet(&Packet::Auth(packet)).await?;

        let connect_timeout = self.inner.options.lock().config.connect_timeout;
        match tokio::time::timeout(connect_timeout, completion).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_)) => Err(MqttError::UnexpectedPacket(
                "auth slot superseded".to_string(),
            )),
            Err(_) => Err(MqttError::Timeout),
        }
    }

    /// Supplies the enhanced-authentication callback invoked on every
    /// broker AUTH challenge.
    pub fn set_authflow(&self, flow: AuthFlow) {
        *self.inner.authflow.lock() = Some(flow);
    }

    /// Attaches a reachability monitor. Loss of the network closes the
    /// session with `networkUnavailable`; recovery triggers an immediate
    /// reconnect when the session sits closed.
    pub fn set_reachability_monitor(&self, monitor: ReachabilityMonitor) {
        self.inner.attach_monitor(monitor);
    }

    pub fn set_delegate(&self, delegate: Arc<dyn SessionDelegate>) {
        self.inner.events.set_delegate(Some(delegate));
    }

    pub fn clear_delegate(&self) {
        self.inner.events.set_delegate(None);
    }

    /// Event stream: status changes, received messages, asynchronous
    /// errors, in per-observer FIFO order.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> Status {
        self.inner.status.lock().clone()
    }

    /// Parameters negotiated on the last CONNACK.
    pub fn connect_params(&self) -> ConnectParams {
        self.inner.params.lock().clone()
    }

    /// The current client identifier, possibly broker-assigned.
    pub fn client_id(&self) -> String {
        self.inner.options.lock().identity.client_id.clone()
    }

    /// Adjusts the keep-alive interval; takes effect on the next ping
    /// cycle.
    ///
    /// # Errors
    /// Zero intervals are rejected.
    pub fn set_keep_alive(&self, keep_alive: Duration) -> Result<()> {
        if keep_alive.is_zero() {
            return Err(MqttError::Configuration(
                "keep_alive must be greater than zero".to_string(),
            ));
        }
        self.inner.options.lock().config.keep_alive = keep_alive;
        Ok(())
    }

    /// Number of QoS >= 1 flows awaiting terminal acknowledgement.
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }
}
