//! Minimal MQTT 3.1.1 client session
//!
//! Split the same way the rest of the transport layer is: pure pieces here,
//! I/O in the device runtime.
//!
//! - [`connection`] - CONNECT credentials, client id derivation, reconnect timing
//! - [`session`] - the session state machine and the Ready guard
//!
//! # Usage
//!
//! ```rust
//! use smartbin::protocol::{decode_connack, DeviceIdentity, HardwareAddress, IncomingPacket, PacketBuffer};
//! use smartbin::transport::mqtt::{
//!     BrokerAuth, ConnectCredentials, ReconnectConfig, Session, SessionAction, SessionEvent,
//! };
//! use tokio::time::Instant;
//!
//! let identity = DeviceIdentity {
//!     hardware_address: HardwareAddress::parse("A4:CF:12:0B:3E:7D").unwrap(),
//!     bin_id: "1".into(),
//!     bin_code: "BIN001".into(),
//!     sensor_code: "SENS001".into(),
//!     location: "Building A".into(),
//!     weight_offset: 0.0,
//! };
//! let credentials =
//!     ConnectCredentials::for_identity(&identity, "smartbin-", BrokerAuth::new("u", "p"), 60);
//!
//! let now = Instant::now();
//! let mut session = Session::new(ReconnectConfig::default());
//! session.begin_connect(&credentials, now).unwrap();
//! assert_eq!(session.handle(SessionEvent::TransportOpened, now), SessionAction::SendConnect);
//!
//! let ack = decode_connack(&[0x20, 0x02, 0x00, 0x00]);
//! assert_eq!(
//!     session.handle(SessionEvent::Packet(IncomingPacket::ConnAck(ack)), now),
//!     SessionAction::EnteredReady
//! );
//!
//! let mut buffer = PacketBuffer::default();
//! let guard = session.ready_guard().unwrap();
//! assert_eq!(guard.encode_pingreq(&mut buffer).unwrap(), &[0xC0, 0x00]);
//! ```

pub mod connection;
pub mod session;

pub use connection::{
    derive_client_id, silence_timeout_for, BrokerAuth, ConnectCredentials, ReconnectConfig,
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_RECONNECT_INTERVAL,
};
pub use session::{
    FaultReason, ReadyGuard, Session, SessionAction, SessionError, SessionEvent, SessionState,
};
