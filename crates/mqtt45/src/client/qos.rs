//! QoS 1 and QoS 2 delivery engines, outbound and inbound.

use crate::client::pending::Completion;
use crate::client::session::SessionInner;
use crate::client::state::ConnectParams;
use crate::error::{MqttError, Result};
use mqtt45_protocol::packet::{PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket};
use mqtt45_protocol::properties::PropertyId;
use mqtt45_protocol::{Message, Packet, Properties, QoS, ReasonCode};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Resolution of an awaited publish. QoS 0 resolves immediately with a
/// success marker.
#[derive(Debug, Clone)]
pub struct PublishAck {
    pub packet_id: Option<u16>,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

impl PublishAck {
    pub(crate) fn qos0() -> Self {
        Self {
            packet_id: None,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }
}

/// Client-side invariants checked before a publish goes on the wire.
/// Violations come back to the caller without touching the connection.
pub(crate) fn validate_publish(packet: &PublishPacket, params: &ConnectParams) -> Result<()> {
    if packet.topic.contains(['+', '#']) {
        return Err(MqttError::InvalidTopicName(packet.topic.clone()));
    }

    let alias = packet.properties.topic_alias();
    if packet.topic.is_empty() && alias.is_none() {
        return Err(MqttError::InvalidTopicName(
            "empty topic without alias".to_string(),
        ));
    }

    if packet.qos > params.max_qos {
        return Err(MqttError::QoSNotSupported);
    }

    if packet.retain && !params.retain_available {
        return Err(MqttError::RetainNotSupported);
    }

    if let Some(alias) = alias {
        if alias == 0 || alias > params.max_topic_alias {
            return Err(MqttError::TopicAliasInvalid(alias));
        }
    }

    if packet.properties.contains(PropertyId::SubscriptionIdentifier) {
        return Err(MqttError::SubscriptionIdentifierNotAllowed);
    }

    Ok(())
}

/// Runs an outbound QoS 1 or QoS 2 flow to its terminal acknowledgement.
///
/// On an acknowledgement timeout the engine re-sends whatever packet
/// currently occupies the inflight slot: the PUBLISH before PUBREC
/// arrived, the PUBREL after. When the connection drops underneath the
/// flow and a retrier is configured, the completer is re-registered and
/// the flow survives the reconnect; session resumption retransmits the
/// inflight packet with the dup flag set.
pub(crate) async fn publish_qos12(
    inner: &Arc<SessionInner>,
    publish: PublishPacket,
) -> Result<PublishAck> {
    let packet_id = publish
        .packet_id
        .ok_or_else(|| MqttError::InvalidParameter("missing packet identifier".to_string()))?;
    let qos = publish.qos;

    inner.inflight.insert(packet_id, Packet::Publish(publish.clone()));
    let mut completion = inner.pending.register_active(packet_id);

    if let Err(error) = inner.send_packet(&Packet::Publish(publish)).await {
        if !(error.is_connection_level() && inner.retrier.is_some()) {
            inner.inflight.remove(packet_id);
            inner.pending.cancel_active(packet_id);
            return Err(error);
        }
        // The reconnect path resends the inflight entry; keep waiting.
    }

    loop {
        let publish_timeout = inner.options.lock().config.publish_timeout;
        match tokio::time::timeout(publish_timeout, &mut completion).await {
            Err(_elapsed) => {
                if inner.status.lock().is_opened() {
                    if let Some(current) = inner.inflight.get(packet_id) {
                        tracing::debug!(packet_id, "acknowledgement timeout, re-sending");
                        let _ = inner.send_packet(&current).await;
                    }
                } else if inner.status.lock().is_closed()
                    && !inner.reconnect_pending.load(Ordering::SeqCst)
                {
                    inner.inflight.remove(packet_id);
                    inner.pending.cancel_active(packet_id);
                    return Err(MqttError::NotConnected);
                }
            }
            Ok(Err(_)) => {
                // Displaced by a newer flow on the same identifier.
                inner.inflight.remove(packet_id);
                return Err(MqttError::UnexpectedPacket(
                    "publish flow superseded".to_string(),
                ));
            }
            Ok(Ok(Err(error))) => {
                if matches!(
                    error,
                    MqttError::ServerClose(ReasonCode::MalformedPacket)
                ) {
                    inner.inflight.remove(packet_id);
                    return Err(error);
                }
                if error.is_connection_level() && inner.retrier.is_some() {
                    // Cleared by the teardown; survive the reconnect.
                    completion = inner.pending.register_active(packet_id);
                    continue;
                }
                inner.inflight.remove(packet_id);
                return Err(error);
            }
            Ok(Ok(Ok(packet))) => match packet {
                Packet::PubAck(ack) if qos == QoS::AtLeastOnce => {
                    inner.inflight.remove(packet_id);
                    if ack.reason_code.is_error() {
                        return Err(MqttError::PublishFailed(ack.reason_code));
                    }
                    return Ok(PublishAck {
                        packet_id: Some(packet_id),
                        reason_code: ack.reason_code,
                        properties: ack.properties,
                    });
                }
                Packet::PubRec(rec) if qos == QoS::ExactlyOnce => {
                    if rec.reason_code.is_error() {
                        inner.inflight.remove(packet_id);
                        return Err(MqttError::PublishFailed(rec.reason_code));
                    }
                    // Second leg: PUBREL replaces the PUBLISH in the
                    // inflight slot under the same identifier.
                    let pubrel = PubRelPacket::new(packet_id);
                    inner
                        .inflight
                        .insert(packet_id, Packet::PubRel(pubrel.clone()));
                    completion = inner.pending.register_active(packet_id);
                    let _ = inner.send_packet(&Packet::PubRel(pubrel)).await;
                }
                Packet::PubComp(comp) => {
                    inner.inflight.remove(packet_id);
                    if comp.reason_code.is_error() {
                        return Err(MqttError::PublishFailed(comp.reason_code));
                    }
                    return Ok(PublishAck {
                        packet_id: Some(packet_id),
                        reason_code: comp.reason_code,
                        properties: comp.properties,
                    });
                }
                other => {
                    inner.inflight.remove(packet_id);
                    return Err(MqttError::UnexpectedPacket(format!(
                        "unexpected {:?} in publish flow",
                        other.packet_type()
                    )));
                }
            },
        }
    }
}

/// Inbound QoS 2 receiver: PUBREC was already sent and a passive entry
/// registered; this task waits for PUBREL, completes the handshake, and
/// delivers the message exactly once.
///
/// A duplicate PUBLISH for the same identifier replaces the passive
/// entry, which closes this task's completer without resolving it; the
/// replacement task then owns the delivery, so the duplicate is never
/// delivered twice.
pub(crate) fn spawn_inbound_qos2(
    inner: &Arc<SessionInner>,
    packet_id: u16,
    message: Message,
    mut completion: Completion,
) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            let publish_timeout = {
                let Some(inner) = weak.upgrade() else { return };
                let timeout = inner.options.lock().config.publish_timeout;
                timeout
            };

            match tokio::time::timeout(publish_timeout, &mut completion).await {
                Err(_elapsed) => {
                    let Some(inner) = weak.upgrade() else { return };
                    if !inner.status.lock().is_opened() {
                        return;
                    }
                    tracing::debug!(packet_id, "PUBREL timeout, re-sending PUBREC");
                    completion = inner.pending.register_passive(packet_id);
                    let _ = inner
                        .send_packet(&Packet::PubRec(PubRecPacket::new(packet_id)))
                        .await;
                }
                // Superseded by a duplicate PUBLISH or resolved with the
                // session's close error; either way delivery is no
                // longer this task's job.
                Ok(Err(_)) | Ok(Ok(Err(_))) => return,
                Ok(Ok(Ok(Packet::PubRel(_)))) => {
                    let Some(inner) = weak.upgrade() else { return };
                    let _ = inner
                        .send_packet(&Packet::PubComp(PubCompPacket::new(packet_id)))
                        .await;
                    inner.emit_message(message);
                    return;
                }
                Ok(Ok(Ok(_))) => return,
            }
        }
    });
}
