//! End-to-end session flows against the scripted in-memory broker.

use bytes::Bytes;
use mqtt45::client::RetryConfig;
use mqtt45::client::RetryPolicy;
use mqtt45::testing::ScriptedBroker;
use mqtt45::{
    auth_flow, CloseReason, ConnectOptions, Endpoint, MqttClient, MqttError, PublishOptions, QoS,
    ReasonCode, SessionEvent, Status,
};
use mqtt45_protocol::packet::{
    AuthPacket, ConnAckPacket, DisconnectPacket, PubAckPacket, PubCompPacket, PubRecPacket,
    PublishPacket, SubAckPacket, SubAckReasonCode,
};
use mqtt45_protocol::{Packet, PacketType, Properties};
use std::sync::Arc;
use std::time::Duration;

fn client_with_broker(
    version: u8,
    options: ConnectOptions,
) -> (MqttClient, Arc<ScriptedBroker>) {
    let (broker, connector) = ScriptedBroker::new(version);
    let client = MqttClient::new(Endpoint::memory(connector), options).unwrap();
    (client, broker)
}

fn quiet_options(client_id: &str) -> ConnectOptions {
    ConnectOptions::new(client_id).with_ping_enabled(false)
}

async fn collect_messages(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    window: Duration,
) -> Vec<mqtt45::Message> {
    let mut messages = Vec::new();
    loop {
        match tokio::time::timeout(window, events.recv()).await {
            Ok(Ok(SessionEvent::Message(message))) => messages.push(message),
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }
    messages
}

#[tokio::test]
async fn v5_qos2_publish_flow() {
    let (client, broker) = client_with_broker(5, quiet_options("qos2-pub"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        let Packet::Publish(publish) = session.recv_type(PacketType::Publish).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(publish.topic, "t");
        assert_eq!(publish.payload.as_ref(), b"h");
        assert_eq!(publish.qos, QoS::ExactlyOnce);
        let packet_id = publish.packet_id.unwrap();
        assert_eq!(packet_id, 1);

        session
            .send(Packet::PubRec(PubRecPacket::new(packet_id)))
            .await
            .unwrap();

        let Packet::PubRel(pubrel) = session.recv_type(PacketType::PubRel).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(pubrel.packet_id, packet_id);

        session
            .send(Packet::PubComp(PubCompPacket::new(packet_id)))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    let ack = client
        .publish(
            "t",
            Bytes::from_static(b"h"),
            PublishOptions {
                qos: QoS::ExactlyOnce,
                ..PublishOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(ack.reason_code, ReasonCode::Success);
    assert_eq!(ack.packet_id, Some(1));
    assert_eq!(client.inflight_count(), 0);
    script.await.unwrap();
}

#[tokio::test]
async fn inbound_qos2_duplicate_publish_delivers_once() {
    let (client, broker) = client_with_broker(5, quiet_options("qos2-sub"));
    let mut events = client.events();

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        let publish =
            PublishPacket::new("inbox", Bytes::from_static(b"a"), 5).with_qos(QoS::ExactlyOnce, 7);
        session.send(Packet::Publish(publish.clone())).await.unwrap();
        session.recv_type(PacketType::PubRec).await.unwrap();

        // Duplicate before PUBREL; the client must answer with a second
        // PUBREC and still deliver exactly once.
        session
            .send(Packet::Publish(publish.as_duplicate()))
            .await
            .unwrap();
        session.recv_type(PacketType::PubRec).await.unwrap();

        session
            .send(Packet::PubRel(
                mqtt45_protocol::packet::PubRelPacket::new(7),
            ))
            .await
            .unwrap();
        session.recv_type(PacketType::PubComp).await.unwrap();
    });

    client.open().await.unwrap();
    script.await.unwrap();

    let messages = collect_messages(&mut events, Duration::from_millis(300)).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload.as_ref(), b"a");
    assert_eq!(messages[0].qos, QoS::ExactlyOnce);
}

#[tokio::test]
async fn reconnect_resumes_session_and_retransmits_with_dup() {
    let options = quiet_options("resume")
        .with_clean_start(true)
        .with_retry(
            RetryConfig::new(RetryPolicy::Equals {
                interval: Duration::from_millis(100),
            })
            .with_limit(3),
        )
        .with_publish_timeout(Duration::from_secs(5));
    let (client, broker) = client_with_broker(5, options);

    let script = tokio::spawn(async move {
        let mut first = broker.accept().await.unwrap();
        let connect = first.accept_connect(false).await.unwrap();
        assert!(connect.clean_start);

        let Packet::Publish(publish) = first.recv_type(PacketType::Publish).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert!(!publish.dup);
        let packet_id = publish.packet_id.unwrap();

        // Accept the PUBLISH but drop before acknowledging it.
        first.drop_connection().await;

        let mut second = broker.accept().await.unwrap();
        let reconnect = second.expect_connect().await.unwrap();
        assert!(!reconnect.clean_start);
        assert!(reconnect.will.is_none());
        second
            .send(Packet::ConnAck(ConnAckPacket::new(
                ReasonCode::Success,
                true, // session present
                5,
            )))
            .await
            .unwrap();

        let Packet::Publish(resent) = second.recv_type(PacketType::Publish).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(resent.packet_id, Some(packet_id));
        assert!(resent.dup, "retransmission after resume must set dup");

        second
            .send(Packet::PubAck(PubAckPacket::new(packet_id)))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    let ack = client
        .publish(
            "orders/42",
            Bytes::from_static(b"payload"),
            PublishOptions {
                qos: QoS::AtLeastOnce,
                ..PublishOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(ack.reason_code, ReasonCode::Success);
    assert_eq!(client.inflight_count(), 0);
    script.await.unwrap();
}

#[tokio::test]
async fn ping_timeout_closes_session() {
    let options = ConnectOptions::new("pinger")
        .with_keep_alive(Duration::from_millis(300))
        .with_ping_timeout(Duration::from_millis(200));
    let (client, broker) = client_with_broker(5, options);
    let mut events = client.events();

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        // Swallow everything, including PINGREQs, and never respond.
        let mut pings = 0usize;
        while let Ok(packet) = session.recv().await {
            if packet.packet_type() == PacketType::PingReq {
                pings += 1;
            }
        }
        pings
    });

    client.open().await.unwrap();

    // Wait for the closed(pingTimeout) transition.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("session did not close in time")
            .unwrap();
        if let SessionEvent::StatusChanged {
            new: Status::Closed(Some(reason)),
            ..
        } = event
        {
            assert!(matches!(reason, CloseReason::PingTimeout));
            break;
        }
    }

    let pings = script.await.unwrap();
    assert!(pings >= 1, "expected at least one PINGREQ, saw {pings}");
    assert!(matches!(client.status(), Status::Closed(Some(_))));
}

#[tokio::test]
async fn server_disconnect_maps_reason_and_respects_filter() {
    // Filter rejects quota-exceeded: no reconnect may happen.
    let options = quiet_options("quota").with_retry(
        RetryConfig::new(RetryPolicy::Equals {
            interval: Duration::from_millis(50),
        })
        .with_filter(Arc::new(|reason| {
            matches!(
                reason,
                CloseReason::ServerClose(ReasonCode::QuotaExceeded)
            )
        })),
    );
    let (client, broker) = client_with_broker(5, options);
    let mut events = client.events();

    let broker_for_script = broker.clone();
    let script = tokio::spawn(async move {
        let mut session = broker_for_script.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        session
            .send(Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::QuotaExceeded,
                5,
            )))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    script.await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("no close observed")
            .unwrap();
        if let SessionEvent::StatusChanged {
            new: Status::Closed(Some(reason)),
            ..
        } = event
        {
            assert!(matches!(
                reason,
                CloseReason::ServerClose(ReasonCode::QuotaExceeded)
            ));
            break;
        }
    }

    // The filter rejected the reason: no reconnection attempt arrives.
    let no_reconnect = tokio::time::timeout(Duration::from_millis(300), broker.accept()).await;
    assert!(no_reconnect.is_err(), "filter must suppress the reconnect");
}

#[tokio::test]
async fn server_disconnect_reconnects_when_filter_allows() {
    let options = quiet_options("retry-ok").with_retry(
        RetryConfig::new(RetryPolicy::Equals {
            interval: Duration::from_millis(50),
        })
        .with_limit(2),
    );
    let (client, broker) = client_with_broker(5, options);

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        session
            .send(Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::ServerBusy,
                5,
            )))
            .await
            .unwrap();

        // The retrier schedules a reconnect; accept and complete it.
        let mut second = tokio::time::timeout(Duration::from_secs(2), broker.accept())
            .await
            .expect("reconnect did not arrive")
            .unwrap();
        let connect = second.expect_connect().await.unwrap();
        assert!(!connect.clean_start);
        second
            .send(Packet::ConnAck(ConnAckPacket::new(
                ReasonCode::Success,
                false,
                5,
            )))
            .await
            .unwrap();
        second
    });

    client.open().await.unwrap();
    let second = script.await.unwrap();

    // Give the opened transition a moment to land while the broker side
    // of the reconnected pipe stays alive.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.status().is_opened());
    drop(second);
}

#[tokio::test]
async fn enhanced_auth_continuation_resolves_open() {
    let mut properties = Properties::default();
    properties.set_authentication_method("SCRAM");
    let options = quiet_options("auth").with_properties(properties);
    let (client, broker) = client_with_broker(5, options);

    client.set_authflow(auth_flow(|challenge: AuthPacket| async move {
        assert_eq!(challenge.authentication_data().unwrap().as_ref(), b"x");
        let method = challenge.authentication_method().unwrap_or_default();
        AuthPacket::continue_authentication(method, Some(Bytes::from_static(b"y")))
    }));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        let connect = session.expect_connect().await.unwrap();
        assert_eq!(
            connect.properties.authentication_method().as_deref(),
            Some("SCRAM")
        );

        session
            .send(Packet::Auth(
                AuthPacket::continue_authentication("SCRAM", Some(Bytes::from_static(b"x")))
                    .unwrap(),
            ))
            .await
            .unwrap();

        let Packet::Auth(response) = session.recv_type(PacketType::Auth).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(response.reason_code, ReasonCode::ContinueAuthentication);
        assert_eq!(response.authentication_data().unwrap().as_ref(), b"y");

        session
            .send(Packet::ConnAck(ConnAckPacket::new(
                ReasonCode::Success,
                false,
                5,
            )))
            .await
            .unwrap();
    });

    let ack = client.open().await.unwrap();
    assert_eq!(ack.reason_code, ReasonCode::Success);
    assert!(client.status().is_opened());
    script.await.unwrap();
}

#[tokio::test]
async fn auth_challenge_without_authflow_fails_open() {
    let mut properties = Properties::default();
    properties.set_authentication_method("SCRAM");
    let options = quiet_options("no-flow").with_properties(properties);
    let (client, broker) = client_with_broker(5, options);

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.expect_connect().await.unwrap();
        session
            .send(Packet::Auth(
                AuthPacket::continue_authentication("SCRAM", None).unwrap(),
            ))
            .await
            .unwrap();
        session
    });

    let result = client.open().await;
    assert!(matches!(result, Err(MqttError::AuthflowRequired)));
    drop(script.await.unwrap());
}

#[tokio::test]
async fn open_twice_fails_with_already_opened() {
    let (client, broker) = client_with_broker(5, quiet_options("twice"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        session
    });

    client.open().await.unwrap();
    assert!(matches!(
        client.open().await,
        Err(MqttError::AlreadyOpened)
    ));
    drop(script.await.unwrap());
}

#[tokio::test]
async fn close_sends_disconnect_and_double_close_fails() {
    let (client, broker) = client_with_broker(5, quiet_options("closer"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        let packet = session.recv_type(PacketType::Disconnect).await.unwrap();
        let Packet::Disconnect(disconnect) = packet else {
            unreachable!()
        };
        assert_eq!(disconnect.reason_code, ReasonCode::Success);
    });

    client.open().await.unwrap();
    client.close().await.unwrap();
    script.await.unwrap();

    assert!(matches!(
        client.status(),
        Status::Closed(Some(CloseReason::ClientClose(ReasonCode::Success)))
    ));
    assert!(matches!(
        client.close().await,
        Err(MqttError::AlreadyClosed)
    ));
}

#[tokio::test]
async fn pending_completers_resolve_on_close() {
    let (client, broker) = client_with_broker(5, quiet_options("pending"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        // Receive the QoS 1 PUBLISH, never acknowledge, then drop hard.
        session.recv_type(PacketType::Publish).await.unwrap();
        session
            .send(Packet::Disconnect(DisconnectPacket::new(
                ReasonCode::ServerShuttingDown,
                5,
            )))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    let result = client
        .publish(
            "t",
            Bytes::from_static(b"x"),
            PublishOptions {
                qos: QoS::AtLeastOnce,
                ..PublishOptions::default()
            },
        )
        .await;

    // No retrier configured: the close error surfaces directly.
    assert!(matches!(
        result,
        Err(MqttError::ServerClose(ReasonCode::ServerShuttingDown))
    ));
    script.await.unwrap();
}

#[tokio::test]
async fn subscribe_and_unsubscribe_round_trip() {
    let (client, broker) = client_with_broker(5, quiet_options("subber"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        let Packet::Subscribe(subscribe) =
            session.recv_type(PacketType::Subscribe).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(subscribe.filters[0].filter, "rooms/+/temp");
        session
            .send(Packet::SubAck(SubAckPacket {
                packet_id: subscribe.packet_id,
                reason_codes: vec![SubAckReasonCode::GrantedQoS1],
                properties: Properties::default(),
                protocol_version: 5,
            }))
            .await
            .unwrap();

        let Packet::Unsubscribe(unsubscribe) =
            session.recv_type(PacketType::Unsubscribe).await.unwrap()
        else {
            unreachable!()
        };
        session
            .send(Packet::UnsubAck(mqtt45_protocol::packet::UnsubAckPacket {
                packet_id: unsubscribe.packet_id,
                reason_codes: vec![ReasonCode::Success],
                properties: Properties::default(),
                protocol_version: 5,
            }))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    let suback = client.subscribe("rooms/+/temp", QoS::AtLeastOnce).await.unwrap();
    assert_eq!(suback.reason_codes[0].granted_qos(), Some(QoS::AtLeastOnce));
    client.unsubscribe("rooms/+/temp").await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn keepalive_pings_only_when_idle() {
    let options = ConnectOptions::new("idle-ping")
        .with_keep_alive(Duration::from_millis(200))
        .with_ping_timeout(Duration::from_millis(500));
    let (client, broker) = client_with_broker(5, options);

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        let mut pings = 0usize;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(700);
        loop {
            match tokio::time::timeout_at(deadline, session.recv()).await {
                Ok(Ok(packet)) if packet.packet_type() == PacketType::PingReq => {
                    pings += 1;
                    session.send(Packet::PingResp).await.unwrap();
                }
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        pings
    });

    client.open().await.unwrap();
    assert!(client.status().is_opened());
    let pings = script.await.unwrap();
    // Roughly 700ms of idle time at a 200ms interval: 2 to 3 pings.
    assert!((1..=4).contains(&pings), "unexpected ping count {pings}");
}

#[tokio::test]
async fn qos0_publish_resolves_without_acknowledgement() {
    let (client, broker) = client_with_broker(5, quiet_options("fire-and-forget"));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();
        let Packet::Publish(publish) = session.recv_type(PacketType::Publish).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(publish.packet_id, None);
    });

    client.open().await.unwrap();
    let ack = client
        .publish("metrics", Bytes::from_static(b"1"), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(ack.packet_id, None);
    assert_eq!(client.inflight_count(), 0);
    script.await.unwrap();
}

#[tokio::test]
async fn publish_while_closed_fails_unconnected() {
    let (client, _broker) = client_with_broker(5, quiet_options("offline"));
    let result = client
        .publish("t", Bytes::new(), PublishOptions::default())
        .await;
    assert!(matches!(result, Err(MqttError::NotConnected)));
}

#[tokio::test]
async fn reachability_loss_closes_and_recovery_reconnects() {
    use mqtt45::{Reachability, ReachabilityMonitor};

    let options = quiet_options("roaming").with_retry(
        RetryConfig::new(RetryPolicy::Equals {
            interval: Duration::from_millis(50),
        })
        .with_limit(2),
    );
    let (client, broker) = client_with_broker(5, options);

    let (feed, monitor) = ReachabilityMonitor::channel(Reachability::Satisfied);
    client.set_reachability_monitor(monitor);

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        // Second accept happens after the network comes back.
        let mut resumed = tokio::time::timeout(Duration::from_secs(2), broker.accept())
            .await
            .expect("no reconnect after recovery")
            .unwrap();
        resumed.accept_connect(true).await.unwrap();
        resumed
    });

    client.open().await.unwrap();

    feed.set(Reachability::Unsatisfied);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        client.status(),
        Status::Closed(Some(CloseReason::NetworkUnavailable))
    ));

    feed.set(Reachability::Satisfied);
    let resumed = script.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.status().is_opened());
    drop(resumed);
}

#[tokio::test]
async fn reauthentication_round_trip() {
    let mut properties = Properties::default();
    properties.set_authentication_method("SCRAM");
    let options = quiet_options("reauth").with_properties(properties);
    let (client, broker) = client_with_broker(5, options);

    client.set_authflow(auth_flow(|challenge: AuthPacket| async move {
        let method = challenge.authentication_method().unwrap_or_default();
        AuthPacket::continue_authentication(method, Some(Bytes::from_static(b"proof")))
    }));

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        session.accept_connect(false).await.unwrap();

        let Packet::Auth(initiate) = session.recv_type(PacketType::Auth).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(initiate.reason_code, ReasonCode::ReAuthenticate);

        session
            .send(Packet::Auth(
                AuthPacket::continue_authentication("SCRAM", None).unwrap(),
            ))
            .await
            .unwrap();

        let Packet::Auth(proof) = session.recv_type(PacketType::Auth).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(proof.authentication_data().unwrap().as_ref(), b"proof");

        session
            .send(Packet::Auth(AuthPacket::new(ReasonCode::Success)))
            .await
            .unwrap();
        session
    });

    client.open().await.unwrap();
    client.reauthenticate().await.unwrap();
    drop(script.await.unwrap());
}

#[tokio::test]
async fn v311_connect_and_publish() {
    let options = quiet_options("legacy").with_protocol_version(mqtt45::ProtocolVersion::V311);
    let (client, broker) = client_with_broker(4, options);

    let script = tokio::spawn(async move {
        let mut session = broker.accept().await.unwrap();
        let connect = session.accept_connect(false).await.unwrap();
        assert_eq!(connect.protocol_version, 4);
        assert!(connect.properties.is_empty());

        let Packet::Publish(publish) = session.recv_type(PacketType::Publish).await.unwrap()
        else {
            unreachable!()
        };
        let packet_id = publish.packet_id.unwrap();
        session
            .send(Packet::PubAck(PubAckPacket::new(packet_id)))
            .await
            .unwrap();
    });

    client.open().await.unwrap();
    let ack = client
        .publish(
            "t",
            Bytes::from_static(b"x"),
            PublishOptions {
                qos: QoS::AtLeastOnce,
                ..PublishOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(ack.reason_code, ReasonCode::Success);
    script.await.unwrap();
}
