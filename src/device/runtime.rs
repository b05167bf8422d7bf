//! Cooperative device loop
//!
//! [`DeviceRuntime`] owns one transport, one session, one scheduler and one
//! scratch buffer. Each turn of the loop applies whatever timers are due,
//! then waits on the earliest of: the next transport event, the next
//! deadline, or shutdown.

use super::DeviceExit;
use crate::error::sanitize_error_message;
use crate::observability::metrics;
use crate::protocol::{decode_incoming, PacketBuffer, TelemetryFrame};
use crate::scheduler::{ScheduledPacket, TelemetryScheduler};
use crate::transport::mqtt::{ConnectCredentials, Session, SessionAction, SessionEvent};
use crate::transport::{FrameTransport, TransportEvent};
use crate::{publish_span, session_span};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

pub struct DeviceRuntime<T: FrameTransport> {
    transport: T,
    session: Session,
    scheduler: TelemetryScheduler,
    buffer: PacketBuffer,
    credentials: ConnectCredentials,
}

impl<T: FrameTransport> DeviceRuntime<T> {
    pub fn new(
        transport: T,
        session: Session,
        scheduler: TelemetryScheduler,
        buffer: PacketBuffer,
        credentials: ConnectCredentials,
    ) -> Self {
        Self {
            transport,
            session,
            scheduler,
            buffer,
            credentials,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn scheduler(&self) -> &TelemetryScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn credentials(&self) -> &ConnectCredentials {
        &self.credentials
    }

    /// Run until shutdown is signalled
    ///
    /// Transport failures never end the loop; the session reconnects on its
    /// own schedule for as long as the runtime lives.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> DeviceExit {
        info!(
            client_id = self.credentials.client_id(),
            identities = self.scheduler.identity_count(),
            "Device runtime started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.step(Instant::now()).await;
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.transport.next_event() => {
                    self.handle_transport_event(event, Instant::now()).await;
                }
                _ = sleep_until(deadline) => {}
            }
        }

        info!(state = %self.session.state(), "Device runtime stopping");
        self.scheduler.on_session_lost();
        self.transport.close().await;
        metrics().set_session_state("stopped");
        DeviceExit::Shutdown
    }

    /// Apply everything that is due at `now`
    ///
    /// Session timers first, then a connection attempt if one is due, then
    /// at most one scheduled packet.
    pub async fn step(&mut self, now: Instant) {
        let action = self.session.check_timers(now);
        self.apply(action, now).await;

        if self.session.reconnect_due(now) {
            self.connect(now).await;
        }

        if self.session.is_ready() {
            if let Some(packet) = self.scheduler.poll(now) {
                self.send_scheduled(packet, now).await;
            }
        }
    }

    /// Earliest instant at which `step` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.session.next_deadline(), self.scheduler.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        let session_event = match event {
            TransportEvent::Data(bytes) => {
                metrics().mqtt_packet_received();
                SessionEvent::Packet(decode_incoming(&bytes))
            }
            TransportEvent::Closed(reason) => SessionEvent::TransportClosed(reason),
            TransportEvent::Error(error) => SessionEvent::TransportFailed(error),
        };
        let action = self.session.handle(session_event, now);
        self.apply(action, now).await;
    }

    async fn connect(&mut self, now: Instant) {
        let attempt = match self.session.begin_connect(&self.credentials, now) {
            Ok(attempt) => attempt,
            Err(e) => {
                debug!(error = %e, "Connection attempt skipped");
                return;
            }
        };
        metrics().mqtt_connection_attempt();
        metrics().set_session_state(self.session.state().label());

        let span = session_span!(client_id = self.credentials.client_id(), attempt);
        let opened = self.transport.open().instrument(span).await;

        let now = Instant::now().max(now);
        let event = match opened {
            Ok(()) => SessionEvent::TransportOpened,
            Err(e) => SessionEvent::TransportFailed(e.to_string()),
        };
        let action = self.session.handle(event, now);
        self.apply(action, now).await;
    }

    /// Carry out a session action; sending may produce a follow-up action
    async fn apply(&mut self, mut action: SessionAction, now: Instant) {
        loop {
            action = match action {
                SessionAction::None => break,
                SessionAction::SendConnect => {
                    metrics().set_session_state(self.session.state().label());
                    self.send_connect(now).await
                }
                SessionAction::EnteredReady => {
                    metrics().mqtt_session_ready();
                    metrics().set_session_state(self.session.state().label());
                    self.scheduler.on_session_ready(now);
                    break;
                }
                SessionAction::Faulted(reason) => {
                    metrics().mqtt_session_faulted();
                    metrics().set_session_state(self.session.state().label());
                    self.scheduler.on_session_lost();
                    self.transport.close().await;
                    warn!(
                        reason = %sanitize_error_message(&reason.to_string()),
                        retry_in_secs = self
                            .session
                            .next_deadline()
                            .map(|at| at.saturating_duration_since(now).as_secs()),
                        "Broker connection lost"
                    );
                    break;
                }
            };
        }
    }

    async fn send_connect(&mut self, now: Instant) -> SessionAction {
        let frame = match self.credentials.encode(&mut self.buffer) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "CONNECT did not fit the packet buffer");
                return self
                    .session
                    .handle(SessionEvent::SendFailed(e.to_string()), now);
            }
        };
        let len = frame.len();

        match self.transport.send(frame).await {
            Ok(()) => {
                metrics().bytes_sent(len);
                debug!(bytes = len, client_id = self.credentials.client_id(), "CONNECT sent");
                SessionAction::None
            }
            Err(e) => self
                .session
                .handle(SessionEvent::SendFailed(e.to_string()), now),
        }
    }

    async fn send_scheduled(&mut self, packet: ScheduledPacket, now: Instant) {
        match packet {
            ScheduledPacket::Publish(frame) => {
                let span = publish_span!(bin_code = %frame.bin_code);
                self.publish(frame, now).instrument(span).await;
            }
            ScheduledPacket::PingReq => self.ping(now).await,
        }
    }

    async fn publish(&mut self, frame: TelemetryFrame, now: Instant) {
        let payload = match frame.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                metrics().publish_failed();
                warn!(error = %e, "Failed to serialize telemetry frame");
                return;
            }
        };
        let topic = frame.topic();

        let encoded = match self.session.ready_guard() {
            Ok(guard) => guard.encode_publish(&mut self.buffer, &topic, &payload),
            Err(e) => Err(e),
        };
        let packet = match encoded {
            Ok(packet) => packet,
            Err(e) => {
                // Frame dropped; the session is unaffected
                metrics().publish_failed();
                warn!(error = %e, topic = %topic, "Telemetry frame not encoded");
                return;
            }
        };
        let len = packet.len();

        match self.transport.send(packet).await {
            Ok(()) => {
                metrics().frame_published(len);
                info!(
                    topic = %topic,
                    bin_code = %frame.bin_code,
                    fill_level = frame.fill_level,
                    weight_kg = frame.weight_kg,
                    battery_level = frame.battery_level,
                    bytes = len,
                    "Telemetry published"
                );
            }
            Err(e) => {
                metrics().publish_failed();
                let action = self
                    .session
                    .handle(SessionEvent::SendFailed(e.to_string()), now);
                self.apply(action, now).await;
            }
        }
    }

    async fn ping(&mut self, now: Instant) {
        let encoded = match self.session.ready_guard() {
            Ok(guard) => guard.encode_pingreq(&mut self.buffer),
            Err(e) => Err(e),
        };
        let packet = match encoded {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "PINGREQ not encoded");
                return;
            }
        };
        let len = packet.len();

        match self.transport.send(packet).await {
            Ok(()) => {
                metrics().mqtt_ping_sent(len);
                debug!("PINGREQ sent");
            }
            Err(e) => {
                let action = self
                    .session
                    .handle(SessionEvent::SendFailed(e.to_string()), now);
                self.apply(action, now).await;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DeviceIdentity, HardwareAddress, PacketType};
    use crate::scheduler::{LocalClock, ProvisionedSource, DEFAULT_PING_INTERVAL};
    use crate::testing::{MockTransport, StaticSensor};
    use crate::transport::mqtt::{BrokerAuth, ReconnectConfig, SessionState};
    use std::time::Duration;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            hardware_address: HardwareAddress::parse("A4:CF:12:0B:3E:7D").unwrap(),
            bin_id: "1".to_string(),
            bin_code: "BIN001".to_string(),
            sensor_code: "SENS001".to_string(),
            location: "Building A".to_string(),
            weight_offset: 0.0,
        }
    }

    fn runtime(transport: MockTransport) -> DeviceRuntime<MockTransport> {
        let identity = identity();
        let credentials =
            ConnectCredentials::for_identity(&identity, "smartbin-", BrokerAuth::new("u", "p"), 60);
        let source = ProvisionedSource::new(
            identity,
            Box::new(StaticSensor::default()),
            Duration::from_secs(30),
        );
        let scheduler =
            TelemetryScheduler::new(Box::new(source), DEFAULT_PING_INTERVAL, LocalClock::default());
        DeviceRuntime::new(
            transport,
            Session::new(ReconnectConfig::default()),
            scheduler,
            PacketBuffer::default(),
            credentials,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_connects_and_sends_connect() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut runtime = runtime(transport);

        runtime.step(Instant::now()).await;

        assert_eq!(runtime.session().state(), SessionState::AwaitingConnAck);
        assert_eq!(handle.sent_of_type(PacketType::Connect).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connack_enters_ready_and_publishes_once() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut runtime = runtime(transport);

        runtime.step(Instant::now()).await;
        runtime
            .handle_transport_event(
                TransportEvent::Data(vec![0x20, 0x02, 0x00, 0x00]),
                Instant::now(),
            )
            .await;
        assert!(runtime.session().is_ready());

        runtime.step(Instant::now()).await;
        runtime.step(Instant::now()).await;

        assert_eq!(handle.sent_of_type(PacketType::Publish).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_faults_and_waits_interval() {
        let transport = MockTransport::new().failing_opens(1);
        let handle = transport.handle();
        let mut runtime = runtime(transport);

        let start = Instant::now();
        runtime.step(start).await;
        assert_eq!(runtime.session().state(), SessionState::Faulted);

        runtime.step(start + Duration::from_secs(4)).await;
        assert_eq!(handle.open_count(), 1);

        runtime.step(start + Duration::from_secs(5)).await;
        assert_eq!(handle.open_count(), 2);
        assert_eq!(runtime.session().state(), SessionState::AwaitingConnAck);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connack_closes_transport() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut runtime = runtime(transport);

        runtime.step(Instant::now()).await;
        runtime
            .handle_transport_event(
                TransportEvent::Data(vec![0x20, 0x02, 0x00, 0x05]),
                Instant::now(),
            )
            .await;

        assert_eq!(runtime.session().state(), SessionState::Faulted);
        assert_eq!(handle.close_count(), 1);
        assert!(!runtime.transport().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_during_publish_faults() {
        let transport = MockTransport::with_auto_ack();
        let handle = transport.handle();
        let mut runtime = runtime(transport);

        runtime.step(Instant::now()).await;
        let event = runtime.transport.next_event().await;
        runtime.handle_transport_event(event, Instant::now()).await;
        assert!(runtime.session().is_ready());

        handle.set_fail_sends(true);
        runtime.step(Instant::now()).await;

        assert_eq!(runtime.session().state(), SessionState::Faulted);
        assert!(!runtime.scheduler().is_active());
    }
}
