//! Smart bin telemetry device
//!
//! Publishes waste-bin sensor telemetry to an MQTT broker over a WebSocket,
//! speaking just enough MQTT 3.1.1 for a QoS 0 publisher.
//!
//! # Overview
//!
//! - Protocol codec for CONNECT, PUBLISH, PINGREQ and CONNACK into a
//!   capacity-checked buffer
//! - Provisioning lookup of the bin identity by hardware address
//! - Session state machine with unbounded reconnects
//! - Telemetry scheduling for one provisioned bin or a static fleet
//! - A supervisor that restarts the device task when provisioning fails
//!
//! # Quick Start
//!
//! ```rust
//! use smartbin::protocol::{encode_publish, sensor_topic, PacketBuffer};
//!
//! let mut buffer = PacketBuffer::default();
//! let topic = sensor_topic("BIN001");
//! let packet = encode_publish(&mut buffer, &topic, br#"{"fill_level":42.5}"#).unwrap();
//!
//! assert_eq!(packet[0], 0x30);
//! assert_eq!(topic, "waste/bins/BIN001/sensors");
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod provisioning;
pub mod scheduler;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DeviceConfig, OperatingMode};
pub use device::{DeviceExit, DeviceRuntime, Supervisor, SupervisorOutcome};
pub use error::{DeviceError, DeviceResult};
pub use protocol::*;
pub use provisioning::{ProvisioningError, ProvisioningResolver};
pub use transport::{FrameTransport, TransportError, TransportEvent, WebSocketTransport};
