//! MQTT session state machine
//!
//! Pure state tracking: the session never performs I/O. It consumes transport
//! events and decoded packets, reports what the caller should do next through
//! [`SessionAction`], and exposes its timers as deadlines the caller waits on.
//!
//! ```text
//! Idle ──begin_connect──▶ AwaitingTransport ──opened──▶ AwaitingConnAck ──accepted──▶ Ready
//!                               ▲                               │                        │
//!                               │                     refused / timeout          error / close / silence
//!                               │                               ▼                        │
//!                               └──────reconnect interval───  Faulted  ◀─────────────────┘
//! ```

use super::connection::{ConnectCredentials, ReconnectConfig};
use crate::protocol::{encode_pingreq, encode_publish, CodecError, ConnAckResult, IncomingPacket, PacketBuffer};
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingTransport,
    AwaitingConnAck,
    Ready,
    Faulted,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingTransport => "awaiting_transport",
            SessionState::AwaitingConnAck => "awaiting_connack",
            SessionState::Ready => "ready",
            SessionState::Faulted => "faulted",
        }
    }

    /// States in which a transport is open or being opened
    pub fn is_connecting_or_ready(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingTransport | SessionState::AwaitingConnAck | SessionState::Ready
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TransportOpened,
    TransportFailed(String),
    TransportClosed(Option<String>),
    SendFailed(String),
    Packet(IncomingPacket),
}

/// Why a session left the connected path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultReason {
    #[error("broker refused connection: {}", .0.describe())]
    ConnectRefused(ConnAckResult),
    #[error("protocol fault: expected CONNACK, received {0}")]
    UnexpectedPacket(String),
    #[error("no CONNACK within the connect timeout")]
    ConnAckTimeout,
    #[error("no traffic from broker within the keep-alive window")]
    BrokerSilent,
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("transport closed{}", .0.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    TransportClosed(Option<String>),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// What the caller must do after feeding the session an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    None,
    /// Encode and send exactly one CONNECT
    SendConnect,
    /// The session just became Ready; publish immediately
    EnteredReady,
    /// The session faulted; close the transport
    Faulted(FaultReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is not ready - current state: {state}")]
    NotReady { state: SessionState },
    #[error("Cannot start a connection from state {state}")]
    CannotConnect { state: SessionState },
    #[error("Reconnect interval has not elapsed")]
    ReconnectNotDue,
    #[error("Encoding failed: {0}")]
    Encode(#[from] CodecError),
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    config: ReconnectConfig,
    last_activity_at: Option<Instant>,
    faulted_at: Option<Instant>,
    connack_deadline: Option<Instant>,
    /// Attempts since the last time the session was Ready
    attempts: u32,
    faults: u64,
}

impl Session {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: SessionState::Idle,
            config,
            last_activity_at: None,
            faulted_at: None,
            connack_deadline: None,
            attempts: 0,
            faults: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    /// Whether a connection attempt may start now
    pub fn reconnect_due(&self, now: Instant) -> bool {
        match self.state {
            SessionState::Idle => true,
            SessionState::Faulted => self
                .faulted_at
                .map_or(true, |at| now >= at + self.config.interval),
            _ => false,
        }
    }

    /// Leave Idle or Faulted for AwaitingTransport
    ///
    /// Requires the CONNECT credentials, which only exist once an identity
    /// does.
    pub fn begin_connect(
        &mut self,
        credentials: &ConnectCredentials,
        now: Instant,
    ) -> Result<u32, SessionError> {
        if !matches!(self.state, SessionState::Idle | SessionState::Faulted) {
            return Err(SessionError::CannotConnect { state: self.state });
        }
        if !self.reconnect_due(now) {
            return Err(SessionError::ReconnectNotDue);
        }

        self.attempts += 1;
        info!(
            client_id = credentials.client_id(),
            attempt = self.attempts,
            "Opening broker connection"
        );
        self.transition(SessionState::AwaitingTransport);
        Ok(self.attempts)
    }

    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> SessionAction {
        match (self.state, event) {
            (SessionState::AwaitingTransport, SessionEvent::TransportOpened) => {
                self.connack_deadline = Some(now + self.config.connack_timeout);
                self.last_activity_at = Some(now);
                self.transition(SessionState::AwaitingConnAck);
                SessionAction::SendConnect
            }
            (SessionState::AwaitingConnAck, SessionEvent::Packet(IncomingPacket::ConnAck(ack))) => {
                if ack.accepted {
                    self.connack_deadline = None;
                    self.last_activity_at = Some(now);
                    self.attempts = 0;
                    self.transition(SessionState::Ready);
                    SessionAction::EnteredReady
                } else {
                    self.fault(FaultReason::ConnectRefused(ack), now)
                }
            }
            // Anything but a CONNACK here is a protocol fault
            (SessionState::AwaitingConnAck, SessionEvent::Packet(other)) => {
                self.fault(FaultReason::UnexpectedPacket(format!("{other:?}")), now)
            }
            (state, SessionEvent::Packet(packet)) if state.is_connecting_or_ready() => {
                self.last_activity_at = Some(now);
                match packet {
                    IncomingPacket::PingResp => debug!("PINGRESP received"),
                    other => debug!(packet = ?other, state = %state, "Ignoring inbound packet"),
                }
                SessionAction::None
            }
            (state, SessionEvent::TransportFailed(reason)) if state.is_connecting_or_ready() => {
                self.fault(FaultReason::TransportFailed(reason), now)
            }
            (state, SessionEvent::TransportClosed(reason)) if state.is_connecting_or_ready() => {
                self.fault(FaultReason::TransportClosed(reason), now)
            }
            (state, SessionEvent::SendFailed(reason)) if state.is_connecting_or_ready() => {
                self.fault(FaultReason::SendFailed(reason), now)
            }
            (state, event) => {
                debug!(state = %state, event = ?event, "Event ignored in current state");
                SessionAction::None
            }
        }
    }

    /// Apply the CONNACK and broker-silence timers
    pub fn check_timers(&mut self, now: Instant) -> SessionAction {
        match self.state {
            SessionState::AwaitingConnAck
                if self.connack_deadline.is_some_and(|deadline| now >= deadline) =>
            {
                self.fault(FaultReason::ConnAckTimeout, now)
            }
            SessionState::Ready if self.silence_deadline().is_some_and(|deadline| now >= deadline) => {
                self.fault(FaultReason::BrokerSilent, now)
            }
            _ => SessionAction::None,
        }
    }

    /// Earliest instant at which the session needs attention without a new event
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::Faulted => self.faulted_at.map(|at| at + self.config.interval),
            SessionState::AwaitingConnAck => self.connack_deadline,
            SessionState::Ready => self.silence_deadline(),
            SessionState::Idle | SessionState::AwaitingTransport => None,
        }
    }

    /// Move to Faulted from any connected or connecting state
    pub fn fault(&mut self, reason: FaultReason, now: Instant) -> SessionAction {
        if !self.state.is_connecting_or_ready() {
            return SessionAction::None;
        }

        warn!(state = %self.state, reason = %reason, "Session faulted");
        self.faults += 1;
        self.faulted_at = Some(now);
        self.connack_deadline = None;
        self.last_activity_at = None;
        self.transition(SessionState::Faulted);
        SessionAction::Faulted(reason)
    }

    /// Borrow proof that the session is Ready
    pub fn ready_guard(&self) -> Result<ReadyGuard<'_>, SessionError> {
        if self.state != SessionState::Ready {
            return Err(SessionError::NotReady { state: self.state });
        }
        Ok(ReadyGuard { _session: self })
    }

    fn silence_deadline(&self) -> Option<Instant> {
        let timeout = self.config.silence_timeout?;
        self.last_activity_at.map(|at| at + timeout)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Session state transition");
        if next == SessionState::Ready {
            info!("MQTT session ready");
        }
        self.state = next;
    }
}

/// Scoped permission to encode PUBLISH and PINGREQ
///
/// Only obtainable from a Ready session, and it holds a shared borrow of the
/// session, so no state change can happen while a guard is alive.
pub struct ReadyGuard<'s> {
    _session: &'s Session,
}

impl ReadyGuard<'_> {
    pub fn encode_publish<'b>(
        &self,
        buffer: &'b mut PacketBuffer,
        topic: &str,
        payload: &[u8],
    ) -> Result<&'b [u8], SessionError> {
        Ok(encode_publish(buffer, topic, payload)?)
    }

    pub fn encode_pingreq<'b>(&self, buffer: &'b mut PacketBuffer) -> Result<&'b [u8], SessionError> {
        Ok(encode_pingreq(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_connack, decode_incoming, DeviceIdentity, HardwareAddress};
    use crate::transport::mqtt::connection::BrokerAuth;
    use std::time::Duration;

    fn credentials() -> ConnectCredentials {
        let identity = DeviceIdentity {
            hardware_address: HardwareAddress::parse("a4:cf:12:0b:3e:7d").unwrap(),
            bin_id: "1".to_string(),
            bin_code: "BIN001".to_string(),
            sensor_code: "SENS001".to_string(),
            location: "Building A".to_string(),
            weight_offset: 0.0,
        };
        ConnectCredentials::for_identity(&identity, "smartbin-", BrokerAuth::new("u", "p"), 60)
    }

    fn accepted() -> SessionEvent {
        SessionEvent::Packet(IncomingPacket::ConnAck(decode_connack(&[0x20, 0x02, 0x00, 0x00])))
    }

    fn ready_session(now: Instant) -> Session {
        let mut session = Session::new(ReconnectConfig::default());
        session.begin_connect(&credentials(), now).unwrap();
        session.handle(SessionEvent::TransportOpened, now);
        session.handle(accepted(), now);
        session
    }

    #[test]
    fn test_starts_idle_and_not_ready() {
        let session = Session::new(ReconnectConfig::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            session.ready_guard().err(),
            Some(SessionError::NotReady { state: SessionState::Idle })
        );
    }

    #[test]
    fn test_happy_path_to_ready() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());

        assert_eq!(session.begin_connect(&credentials(), now), Ok(1));
        assert_eq!(session.state(), SessionState::AwaitingTransport);

        assert_eq!(session.handle(SessionEvent::TransportOpened, now), SessionAction::SendConnect);
        assert_eq!(session.state(), SessionState::AwaitingConnAck);

        assert_eq!(session.handle(accepted(), now), SessionAction::EnteredReady);
        assert!(session.is_ready());
        assert!(session.ready_guard().is_ok());
        assert_eq!(session.attempts(), 0);
    }

    #[test]
    fn test_refused_connack_faults() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());
        session.begin_connect(&credentials(), now).unwrap();
        session.handle(SessionEvent::TransportOpened, now);

        let refused = decode_connack(&[0x20, 0x02, 0x00, 0x04]);
        let action = session.handle(SessionEvent::Packet(IncomingPacket::ConnAck(refused)), now);

        assert_eq!(action, SessionAction::Faulted(FaultReason::ConnectRefused(refused)));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_malformed_connack_faults() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());
        session.begin_connect(&credentials(), now).unwrap();
        session.handle(SessionEvent::TransportOpened, now);

        let malformed = decode_connack(&[0x20, 0x03, 0x00, 0x00]);
        let action = session.handle(SessionEvent::Packet(IncomingPacket::ConnAck(malformed)), now);

        assert!(matches!(action, SessionAction::Faulted(FaultReason::ConnectRefused(_))));
    }

    #[test]
    fn test_non_connack_while_awaiting_connack_faults() {
        let frames: [&[u8]; 4] = [&[0xD0, 0x00], &[0x30, 0x02, 0x00, 0x00], &[0x00], &[]];
        for frame in frames {
            let now = Instant::now();
            let mut session = Session::new(ReconnectConfig::default());
            session.begin_connect(&credentials(), now).unwrap();
            session.handle(SessionEvent::TransportOpened, now);

            let action = session.handle(SessionEvent::Packet(decode_incoming(frame)), now);

            assert!(
                matches!(action, SessionAction::Faulted(FaultReason::UnexpectedPacket(_))),
                "frame {frame:02X?} gave {action:?}"
            );
            assert_eq!(session.state(), SessionState::Faulted);
        }
    }

    #[test]
    fn test_transport_failure_while_awaiting_transport() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());
        session.begin_connect(&credentials(), now).unwrap();

        let action = session.handle(SessionEvent::TransportFailed("refused".into()), now);

        assert!(matches!(action, SessionAction::Faulted(FaultReason::TransportFailed(_))));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_close_while_ready_faults() {
        let now = Instant::now();
        let mut session = ready_session(now);

        let action = session.handle(SessionEvent::TransportClosed(None), now);

        assert_eq!(action, SessionAction::Faulted(FaultReason::TransportClosed(None)));
        assert!(session.ready_guard().is_err());
        assert_eq!(session.last_activity_at(), None);
    }

    #[test]
    fn test_reconnect_waits_for_interval() {
        let now = Instant::now();
        let mut session = ready_session(now);
        session.handle(SessionEvent::TransportClosed(None), now);

        assert!(!session.reconnect_due(now + Duration::from_secs(4)));
        assert_eq!(
            session.begin_connect(&credentials(), now + Duration::from_secs(4)),
            Err(SessionError::ReconnectNotDue)
        );
        assert_eq!(session.next_deadline(), Some(now + Duration::from_secs(5)));

        assert!(session.reconnect_due(now + Duration::from_secs(5)));
        assert!(session.begin_connect(&credentials(), now + Duration::from_secs(5)).is_ok());
        assert_eq!(session.state(), SessionState::AwaitingTransport);
    }

    #[test]
    fn test_begin_connect_rejected_while_connected() {
        let now = Instant::now();
        let mut session = ready_session(now);
        assert_eq!(
            session.begin_connect(&credentials(), now),
            Err(SessionError::CannotConnect { state: SessionState::Ready })
        );
    }

    #[test]
    fn test_connack_timeout() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());
        session.begin_connect(&credentials(), now).unwrap();
        session.handle(SessionEvent::TransportOpened, now);

        assert_eq!(session.check_timers(now + Duration::from_secs(9)), SessionAction::None);
        assert_eq!(
            session.check_timers(now + Duration::from_secs(10)),
            SessionAction::Faulted(FaultReason::ConnAckTimeout)
        );
    }

    #[test]
    fn test_inbound_traffic_defers_silence_fault() {
        let now = Instant::now();
        let mut session = ready_session(now);

        let later = now + Duration::from_secs(60);
        session.handle(SessionEvent::Packet(IncomingPacket::PingResp), later);
        assert_eq!(session.last_activity_at(), Some(later));

        assert_eq!(session.check_timers(now + Duration::from_secs(100)), SessionAction::None);
        assert_eq!(
            session.check_timers(later + Duration::from_secs(90)),
            SessionAction::Faulted(FaultReason::BrokerSilent)
        );
    }

    #[test]
    fn test_silence_detection_can_be_disabled() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig {
            silence_timeout: None,
            ..ReconnectConfig::default()
        });
        session.begin_connect(&credentials(), now).unwrap();
        session.handle(SessionEvent::TransportOpened, now);
        session.handle(accepted(), now);

        assert_eq!(session.next_deadline(), None);
        assert_eq!(session.check_timers(now + Duration::from_secs(3600)), SessionAction::None);
    }

    #[test]
    fn test_events_ignored_when_idle_or_faulted() {
        let now = Instant::now();
        let mut session = Session::new(ReconnectConfig::default());
        assert_eq!(session.handle(SessionEvent::TransportClosed(None), now), SessionAction::None);
        assert_eq!(session.handle(accepted(), now), SessionAction::None);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.fault_count(), 0);
    }

    #[test]
    fn test_second_connack_in_ready_is_ignored() {
        let now = Instant::now();
        let mut session = ready_session(now);
        assert_eq!(session.handle(accepted(), now), SessionAction::None);
        assert!(session.is_ready());
    }

    #[test]
    fn test_guard_encodes_publish_and_ping() {
        let now = Instant::now();
        let session = ready_session(now);
        let guard = session.ready_guard().unwrap();
        let mut buffer = PacketBuffer::with_capacity(64);

        assert_eq!(guard.encode_pingreq(&mut buffer).unwrap(), &[0xC0, 0x00]);
        assert_eq!(guard.encode_publish(&mut buffer, "a", b"x").unwrap(), &[0x30, 0x04, 0x00, 0x01, b'a', b'x']);
    }

    #[test]
    fn test_guard_surfaces_capacity_error() {
        let now = Instant::now();
        let session = ready_session(now);
        let guard = session.ready_guard().unwrap();
        let mut buffer = PacketBuffer::with_capacity(4);

        assert!(matches!(
            guard.encode_publish(&mut buffer, "topic", b"payload"),
            Err(SessionError::Encode(CodecError::BufferCapacityExceeded { .. }))
        ));
    }
}
