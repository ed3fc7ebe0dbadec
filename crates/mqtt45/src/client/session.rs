//! The session engine: connection lifecycle state machine, packet
//! dispatch, reconnection, and teardown.
//!
//! The status mutex is the serialization point for every lifecycle
//! decision. The reader task, the pinger, the retrier's scheduled
//! reconnect, and the reachability watcher all re-check status under
//! that lock before acting, so `Opened` can only ever be reached through
//! exactly one `Opening` transition at a time.

use crate::callback::{EventDispatcher, SessionEvent};
use crate::client::auth_flow::AuthFlow;
use crate::client::inflight::InflightTable;
use crate::client::keepalive::spawn_pinger;
use crate::client::monitor::ReachabilityMonitor;
use crate::client::pending::PendingTables;
use crate::client::qos::spawn_inbound_qos2;
use crate::client::retry::Retrier;
use crate::client::state::{CloseReason, ConnectParams, Status};
use crate::endpoint::Endpoint;
use crate::error::{ConnectFailure, MqttError, Result};
use crate::options::ConnectOptions;
use crate::transport::{ErrorDebounce, PacketWriter};
use mqtt45_protocol::packet::{
    AuthPacket, ConnAckPacket, ConnectPacket, PubCompPacket, PubRecPacket, PubRelPacket,
    PublishPacket,
};
use mqtt45_protocol::{
    Message, Packet, PacketIdAllocator, Properties, ProtocolVersion, QoS, ReasonCode,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Result of a resolved open: the CONNACK's interesting parts.
#[derive(Debug, Clone)]
pub struct ConnectAck {
    pub session_present: bool,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

/// Which component is driving a teardown. The component's own task
/// handle must not be aborted out from under the teardown call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeardownSource {
    User,
    Reader,
    Pinger,
}

pub(crate) struct SessionInner {
    pub(crate) endpoint: Endpoint,
    pub(crate) version: ProtocolVersion,
    pub(crate) options: Mutex<ConnectOptions>,
    pub(crate) status: Mutex<Status>,
    pub(crate) params: Mutex<ConnectParams>,
    pub(crate) pending: PendingTables,
    pub(crate) inflight: InflightTable,
    pub(crate) packet_ids: PacketIdAllocator,
    pub(crate) writer: tokio::sync::Mutex<Option<PacketWriter>>,
    pub(crate) reader_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) ping_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) monitor_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) last_activity: Mutex<Instant>,
    pub(crate) retrier: Option<Retrier>,
    pub(crate) monitor: Mutex<Option<ReachabilityMonitor>>,
    pub(crate) authflow: Mutex<Option<AuthFlow>>,
    pub(crate) events: EventDispatcher,
    pub(crate) reconnect_pending: AtomicBool,
    /// Connection generation; bumped on every open and teardown so a
    /// stale reader task cannot tear down its successor.
    pub(crate) epoch: AtomicU64,
    pub(crate) debounce: Mutex<ErrorDebounce>,
}

impl SessionInner {
    pub(crate) fn new(endpoint: Endpoint, options: ConnectOptions) -> Arc<Self> {
        let retrier = options.retry.clone().map(Retrier::new);
        let version = options.protocol_version;
        Arc::new(Self {
            endpoint,
            version,
            options: Mutex::new(options),
            status: Mutex::new(Status::default()),
            params: Mutex::new(ConnectParams::default()),
            pending: PendingTables::new(),
            inflight: InflightTable::new(),
            packet_ids: PacketIdAllocator::new(),
            writer: tokio::sync::Mutex::new(None),
            reader_task: Mutex::new(None),
            ping_task: Mutex::new(None),
            monitor_task: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            retrier,
            monitor: Mutex::new(None),
            authflow: Mutex::new(None),
            events: EventDispatcher::new(),
            reconnect_pending: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            debounce: Mutex::new(ErrorDebounce::new()),
        })
    }

    pub(crate) fn emit_message(&self, message: Message) {
        self.events.emit(SessionEvent::Message(message));
    }

    /// Sends one encoded packet. Success stamps the keep-alive activity
    /// clock; connection-level failures additionally surface through the
    /// error observer, debounced so one dead socket does not fan out
    /// into a burst of notifications.
    pub(crate) async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(MqttError::NotConnected)?;
        match writer.write_packet(packet).await {
            Ok(()) => {
                *self.last_activity.lock() = Instant::now();
                Ok(())
            }
            Err(error) => {
                if error.is_connection_level() && self.debounce.lock().should_notify(&error) {
                    self.events.emit(SessionEvent::Error(error.clone()));
                }
                Err(error)
            }
        }
    }

    /// Opens a connection and drives it to `Opened`. `reconnect` rebuilds
    /// the stored CONNECT with `cleanSession = false` and the will
    /// cleared so a resumed session does not republish it.
    pub(crate) async fn open_connection(self: &Arc<Self>, reconnect: bool) -> Result<ConnectAck> {
        let old = {
            let mut status = self.status.lock();
            match &*status {
                Status::Opening | Status::Opened => return Err(MqttError::AlreadyOpened),
                Status::Closing => return Err(MqttError::AlreadyClosed),
                Status::Closed(_) => std::mem::replace(&mut *status, Status::Opening),
            }
        };
        tracing::info!(from = old.name(), to = "opening", "status changed");
        self.events.emit(SessionEvent::StatusChanged {
            old,
            new: Status::Opening,
        });

        match self.try_open(reconnect).await {
            Ok(ack) => Ok(ack),
            Err(error) => {
                self.teardown(CloseReason::from_error(&error), TeardownSource::User)
                    .await;
                Err(error)
            }
        }
    }

    async fn try_open(self: &Arc<Self>, reconnect: bool) -> Result<ConnectAck> {
        let (connect_timeout, quic_idle) = {
            let options = self.options.lock();
            options.config.validate()?;
            let idle = options
                .config
                .ping_enabled
                .then(|| options.config.keep_alive * 3 / 2);
            (options.config.connect_timeout, idle)
        };

        let mut transport = self.endpoint.build_transport(connect_timeout, quic_idle);
        transport.connect().await?;

        let (reader, writer) = transport.into_split(self.version.as_u8())?;
        *self.writer.lock().await = Some(writer);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_reader(reader, epoch);

        let completion = self.pending.register_connect();
        let connect = self.build_connect_packet(reconnect);
        tracing::debug!(
            client_id = %connect.client_id,
            clean_start = connect.clean_start,
            reconnect,
            "sending CONNECT"
        );
        self.send_packet(&Packet::Connect(Box::new(connect))).await?;

        let packet = tokio::time::timeout(connect_timeout, completion)
            .await
            .map_err(|_| MqttError::Timeout)?
            .map_err(|_| MqttError::ConnectionError("connect slot dropped".to_string()))??;

        let Packet::ConnAck(connack) = packet else {
            return Err(MqttError::UnexpectedPacket(format!(
                "expected CONNACK, got {:?}",
                packet.packet_type()
            )));
        };

        self.apply_connack(&connack)?;

        // A teardown may have raced the CONNACK; only Opening proceeds.
        {
            let mut status = self.status.lock();
            if !matches!(*status, Status::Opening) {
                return Err(MqttError::AlreadyClosed);
            }
            *status = Status::Opened;
        }
        self.events.emit(SessionEvent::StatusChanged {
            old: Status::Opening,
            new: Status::Opened,
        });
        tracing::info!(from = "opening", to = "opened", "status changed");

        if connack.session_present {
            self.resume_inflight().await;
        } else {
            self.inflight.clear();
        }

        if self.options.lock().config.ping_enabled {
            let pinger = spawn_pinger(self);
            if let Some(previous) = self.ping_task.lock().replace(pinger) {
                previous.abort();
            }
        }

        if let Some(retrier) = &self.retrier {
            retrier.reset();
        }

        Ok(ConnectAck {
            session_present: connack.session_present,
            reason_code: connack.reason_code,
            properties: connack.properties,
        })
    }

    fn build_connect_packet(&self, reconnect: bool) -> ConnectPacket {
        let options = self.options.lock();
        let mut packet = ConnectPacket::new(
            options.identity.client_id.clone(),
            self.version.as_u8(),
        );
        packet.clean_start = if reconnect { false } else { options.clean_start };
        packet.keep_alive = options
            .config
            .keep_alive
            .as_secs()
            .try_into()
            .unwrap_or(u16::MAX);
        packet.username = options.identity.username.clone();
        packet.password = options.identity.password.clone();
        // The will is registered only on fresh opens; re-registering it
        // on every resume would republish it once per reconnect.
        packet.will = if reconnect { None } else { options.will.clone() };
        if self.version.is_v5() {
            packet.properties = options.properties.clone();
        }
        packet
    }

    fn apply_connack(&self, connack: &ConnAckPacket) -> Result<()> {
        match self.version {
            ProtocolVersion::V311 => {
                if let Some(code) = connack.return_code {
                    if !code.is_accepted() {
                        return Err(MqttError::ConnectFailed(ConnectFailure::V3(code)));
                    }
                }
            }
            ProtocolVersion::V5 => {
                if connack.reason_code.is_error() {
                    return Err(MqttError::ConnectFailed(ConnectFailure::V5(
                        connack.reason_code,
                    )));
                }
            }
        }

        let properties = &connack.properties;
        {
            let mut options = self.options.lock();
            if let Some(seconds) = properties.server_keep_alive() {
                tracing::debug!(seconds, "server overrode keep-alive");
                options.config.keep_alive = Duration::from_secs(u64::from(seconds));
            }
            if let Some(assigned) = properties.assigned_client_identifier() {
                tracing::debug!(client_id = %assigned, "broker assigned client identifier");
                options.identity.client_id = assigned;
            }
        }

        let mut params = ConnectParams::default();
        if let Some(qos) = properties.maximum_qos() {
            params.max_qos = QoS::from(qos);
        }
        params.max_packet_size = properties.maximum_packet_size();
        if let Some(retain) = properties.retain_available() {
            params.retain_available = retain;
        }
        if let Some(alias_max) = properties.topic_alias_maximum() {
            params.max_topic_alias = alias_max;
        }
        params.server_keep_alive = properties.server_keep_alive();
        *self.params.lock() = params;

        Ok(())
    }

    /// Retransmits surviving flows after the broker reported
    /// `sessionPresent = true`: PUBLISH entries go out again with the dup
    /// flag set, PUBREL entries verbatim.
    async fn resume_inflight(&self) {
        for (packet_id, packet) in self.inflight.snapshot() {
            match packet {
                Packet::Publish(publish) => {
                    let resend = Packet::Publish(publish.as_duplicate());
                    self.inflight.insert(packet_id, resend.clone());
                    tracing::debug!(packet_id, "resuming inflight PUBLISH with dup");
                    let _ = self.send_packet(&resend).await;
                }
                Packet::PubRel(pubrel) => {
                    tracing::debug!(packet_id, "resuming inflight PUBREL");
                    let _ = self.send_packet(&Packet::PubRel(pubrel)).await;
                }
                _ => {
                    self.inflight.remove(packet_id);
                }
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: crate::transport::PacketReader, epoch: u64) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                match reader.read_packet().await {
                    Ok(packet) => {
                        let Some(inner) = weak.upgrade() else { return };
                        if inner.epoch.load(Ordering::SeqCst) != epoch {
                            return;
                        }
                        inner.dispatch(packet).await;
                        if inner.status.lock().is_closed() {
                            return;
                        }
                    }
                    Err(error) => {
                        let Some(inner) = weak.upgrade() else { return };
                        if inner.epoch.load(Ordering::SeqCst) != epoch
                            || inner.status.lock().is_closed()
                        {
                            return;
                        }
                        tracing::warn!(error = %error, "transport read failed");
                        inner
                            .teardown(CloseReason::from_error(&error), TeardownSource::Reader)
                            .await;
                        return;
                    }
                }
            }
        });
        if let Some(previous) = self.reader_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Routes one incoming packet per the correlation rules.
    async fn dispatch(self: &Arc<Self>, packet: Packet) {
        match packet {
            Packet::ConnAck(_) => {
                if !self.pending.resolve_connect(Ok(packet)) {
                    self.events.emit(SessionEvent::Error(MqttError::UnexpectedPacket(
                        "CONNACK outside an open flow".to_string(),
                    )));
                }
            }
            Packet::Auth(auth) => self.handle_auth(auth).await,
            Packet::PingResp => {
                self.pending.resolve_ping(Ok(Packet::PingResp));
            }
            Packet::PingReq => {
                // Brokers should not ping clients, but answering is
                // harmless and keeps symmetric test peers simple.
                let _ = self.send_packet(&Packet::PingResp).await;
            }
            Packet::PubAck(ack) => {
                let packet_id = ack.packet_id;
                if !self.pending.resolve_active(packet_id, Ok(Packet::PubAck(ack))) {
                    tracing::debug!(packet_id, "orphan PUBACK dropped");
                }
            }
            Packet::SubAck(ack) => {
                let packet_id = ack.packet_id;
                if !self.pending.resolve_active(packet_id, Ok(Packet::SubAck(ack))) {
                    tracing::debug!(packet_id, "orphan SUBACK dropped");
                }
            }
            Packet::UnsubAck(ack) => {
                let packet_id = ack.packet_id;
                if !self
                    .pending
                    .resolve_active(packet_id, Ok(Packet::UnsubAck(ack)))
                {
                    tracing::debug!(packet_id, "orphan UNSUBACK dropped");
                }
            }
            Packet::PubRec(rec) => {
                let packet_id = rec.packet_id;
                if !self.pending.resolve_active(packet_id, Ok(Packet::PubRec(rec))) {
                    if self.version.is_v5() {
                        tracing::debug!(packet_id, "orphan PUBREC, answering PUBREL");
                        let orphan = PubRelPacket::new_with_reason(
                            packet_id,
                            ReasonCode::PacketIdentifierNotFound,
                        );
                        let _ = self.send_packet(&Packet::PubRel(orphan)).await;
                    } else {
                        tracing::debug!(packet_id, "orphan PUBREC dropped");
                    }
                }
            }
            Packet::PubComp(comp) => {
                let packet_id = comp.packet_id;
                if !self
                    .pending
                    .resolve_active(packet_id, Ok(Packet::PubComp(comp)))
                {
                    tracing::debug!(packet_id, "orphan PUBCOMP dropped");
                }
            }
            Packet::PubRel(rel) => {
                let packet_id = rel.packet_id;
                if !self.pending.resolve_passive(packet_id, Ok(Packet::PubRel(rel))) {
                    if self.version.is_v5() {
                        tracing::debug!(packet_id, "orphan PUBREL, answering PUBCOMP");
                        let orphan = PubCompPacket::new_with_reason(
                            packet_id,
                            ReasonCode::PacketIdentifierNotFound,
                        );
                        let _ = self.send_packet(&Packet::PubComp(orphan)).await;
                    } else {
                        tracing::debug!(packet_id, "orphan PUBREL dropped");
                    }
                }
            }
            Packet::Publish(publish) => self.handle_inbound_publish(publish).await,
            Packet::Disconnect(disconnect) => {
                tracing::info!(reason = ?disconnect.reason_code, "server DISCONNECT");
                self.teardown(
                    CloseReason::ServerClose(disconnect.reason_code),
                    TeardownSource::Reader,
                )
                .await;
            }
            Packet::Connect(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => {
                self.events.emit(SessionEvent::Error(MqttError::UnexpectedPacket(
                    format!("{:?} sent by broker", packet.packet_type()),
                )));
            }
        }
    }

    /// Enhanced-auth continuation. During the open flow the exchange
    /// gates the connect slot; on an open session it belongs to a
    /// re-authentication and gates the auth slot.
    async fn handle_auth(self: &Arc<Self>, auth: AuthPacket) {
        let opening = matches!(*self.status.lock(), Status::Opening);

        match auth.reason_code {
            ReasonCode::ContinueAuthentication => {
                let flow = self.authflow.lock().clone();
                let Some(flow) = flow else {
                    let error = MqttError::AuthflowRequired;
                    if opening {
                        self.pending.resolve_connect(Err(error));
                    } else {
                        self.pending.resolve_auth(Err(error.clone()));
                        self.events.emit(SessionEvent::Error(error));
                    }
                    return;
                };

                match flow(auth).await {
                    Ok(response) => {
                        let _ = self.send_packet(&Packet::Auth(response)).await;
                    }
                    Err(error) => {
                        if opening {
                            self.pending.resolve_connect(Err(error));
                        } else {
                            self.pending.resolve_auth(Err(error));
                        }
                    }
                }
            }
            ReasonCode::Success => {
                if opening {
                    // Handshake complete; CONNACK resolves the open.
                    tracing::debug!("enhanced auth finished, awaiting CONNACK");
                } else {
                    self.pending.resolve_auth(Ok(Packet::Auth(auth)));
                }
            }
            _ => {
                let error = MqttError::AuthenticationFailed;
                if opening {
                    self.pending.resolve_connect(Err(error));
                } else {
                    self.pending.resolve_auth(Err(error));
                }
            }
        }
    }

    async fn handle_inbound_publish(self: &Arc<Self>, publish: PublishPacket) {
        let message = Message {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            qos: publish.qos,
            retain: publish.retain,
            dup: publish.dup,
            properties: publish.properties.clone(),
        };

        match publish.qos {
            QoS::AtMostOnce => self.emit_message(message),
            QoS::AtLeastOnce => {
                if let Some(packet_id) = publish.packet_id {
                    // Best-effort: delivery does not wait on the ack.
                    let _ = self
                        .send_packet(&Packet::PubAck(
                            mqtt45_protocol::packet::PubAckPacket::new(packet_id),
                        ))
                        .await;
                }
                self.emit_message(message);
            }
            QoS::ExactlyOnce => {
                let Some(packet_id) = publish.packet_id else {
                    self.events.emit(SessionEvent::Error(MqttError::ProtocolError(
                        "QoS 2 PUBLISH without identifier".to_string(),
                    )));
                    return;
                };
                // A duplicate PUBLISH for the same identifier lands here
                // again: the new passive entry displaces the old waiter,
                // so the message is delivered exactly once.
                let completion = self.pending.register_passive(packet_id);
                let _ = self
                    .send_packet(&Packet::PubRec(PubRecPacket::new(packet_id)))
                    .await;
                spawn_inbound_qos2(self, packet_id, message, completion);
            }
        }
    }

    /// Tears the session down to `Closed(reason)`: resolves every
    /// pending completer with the close error, stops the timers, drops
    /// the transport, and hands the reason to the retrier.
    pub(crate) async fn teardown(self: &Arc<Self>, reason: CloseReason, source: TeardownSource) {
        {
            let mut status = self.status.lock();
            if status.is_closed() {
                return;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            let old = std::mem::replace(&mut *status, Status::Closed(Some(reason.clone())));
            drop(status);
            tracing::info!(from = old.name(), reason = ?reason, "session closed");
            self.events.emit(SessionEvent::StatusChanged {
                old,
                new: Status::Closed(Some(reason.clone())),
            });
        }

        if source != TeardownSource::Pinger {
            if let Some(handle) = self.ping_task.lock().take() {
                handle.abort();
            }
        } else {
            self.ping_task.lock().take();
        }
        if source != TeardownSource::Reader {
            if let Some(handle) = self.reader_task.lock().take() {
                handle.abort();
            }
        } else {
            self.reader_task.lock().take();
        }

        let error = reason.to_error();
        self.pending.clear_all(&error);

        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await;
        }

        if !matches!(reason, CloseReason::ClientClose(_)) {
            self.events.emit(SessionEvent::Error(error));
        }

        self.schedule_reconnect(&reason);
    }

    /// Consults the retrier and, when it yields a delay, arms a
    /// reconnect that re-checks status under the lock before opening.
    fn schedule_reconnect(self: &Arc<Self>, reason: &CloseReason) {
        let Some(retrier) = &self.retrier else { return };

        if let Some(monitor) = &*self.monitor.lock() {
            if !monitor.current().is_available() {
                tracing::debug!("reconnect suppressed: network unavailable");
                return;
            }
        }

        let Some(delay) = retrier.delay(reason) else { return };

        self.reconnect_pending.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.reconnect_pending.store(false, Ordering::SeqCst);
            let closed = inner.status.lock().is_closed();
            if closed {
                if let Err(error) = inner.open_connection(true).await {
                    tracing::warn!(error = %error, "reconnect attempt failed");
                }
            }
        });
    }

    /// Starts the reachability watcher. Available-again triggers an
    /// immediate reconnect when the session sits closed; lost
    /// availability closes an open session with `networkUnavailable`.
    pub(crate) fn attach_monitor(self: &Arc<Self>, monitor: ReachabilityMonitor) {
        let mut rx = monitor.subscribe();
        *self.monitor.lock() = Some(monitor);

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut previous = *rx.borrow();
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                let current = *rx.borrow();
                let Some(inner) = weak.upgrade() else { return };

                match (previous.is_available(), current.is_available()) {
                    (false, true) => {
                        let closed = inner.status.lock().is_closed();
                        if closed {
                            tracing::info!("network available again, reconnecting");
                            let session = inner.clone();
                            tokio::spawn(async move {
                                if let Err(error) = session.open_connection(true).await {
                                    tracing::warn!(error = %error, "reachability reconnect failed");
                                }
                            });
                        }
                    }
                    (true, false) => {
                        let closed = inner.status.lock().is_closed();
                        if !closed {
                            tracing::info!("network lost");
                            inner
                                .teardown(CloseReason::NetworkUnavailable, TeardownSource::User)
                                .await;
                        }
                    }
                    _ => {}
                }
                previous = current;
            }
        });
        if let Some(previous) = self.monitor_task.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for handle in [
            self.reader_task.lock().take(),
            self.ping_task.lock().take(),
            self.monitor_task.lock().take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}
