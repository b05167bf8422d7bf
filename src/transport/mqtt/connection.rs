//! CONNECT parameters and reconnect timing
//!
//! Pure data and functions: client identifier derivation, broker credentials
//! and the fixed reconnect interval.

use crate::protocol::{encode_connect, CodecError, DeviceIdentity, HardwareAddress, PacketBuffer};
use std::fmt;
use std::time::Duration;

/// Keep-alive negotiated in CONNECT
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;

/// Delay between a fault and the next connection attempt
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Username and password presented in CONNECT
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerAuth {
    pub username: String,
    pub password: String,
}

impl BrokerAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BrokerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Everything needed to encode this device's CONNECT packet
///
/// Only constructible from a resolved identity or from the fleet client
/// literal, so a session can never be started without one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCredentials {
    client_id: String,
    auth: BrokerAuth,
    keep_alive_secs: u16,
}

impl ConnectCredentials {
    /// Single-device mode: `{prefix}{MAC without separators}`
    pub fn for_identity(
        identity: &DeviceIdentity,
        client_id_prefix: &str,
        auth: BrokerAuth,
        keep_alive_secs: u16,
    ) -> Self {
        Self {
            client_id: derive_client_id(client_id_prefix, &identity.hardware_address),
            auth,
            keep_alive_secs,
        }
    }

    /// Fleet mode: `{literal}-{MAC without separators}`
    ///
    /// The MAC suffix keeps two fleet publishers from evicting each other at
    /// the broker.
    pub fn for_fleet(
        fleet_client_id: &str,
        hardware_address: &HardwareAddress,
        auth: BrokerAuth,
        keep_alive_secs: u16,
    ) -> Self {
        Self {
            client_id: derive_client_id(&format!("{fleet_client_id}-"), hardware_address),
            auth,
            keep_alive_secs,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn encode<'a>(&self, buffer: &'a mut PacketBuffer) -> Result<&'a [u8], CodecError> {
        encode_connect(
            buffer,
            &self.client_id,
            &self.auth.username,
            &self.auth.password,
            self.keep_alive_secs,
        )
    }
}

/// Stable per-device client identifier
pub fn derive_client_id(prefix: &str, hardware_address: &HardwareAddress) -> String {
    format!("{prefix}{}", hardware_address.compact())
}

/// Reconnect and liveness timing for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Fixed wait between a fault and the next attempt; there is no ceiling on attempts
    pub interval: Duration,
    /// How long to wait for CONNACK after the transport opens
    pub connack_timeout: Duration,
    /// Fault a Ready session after this long without inbound traffic
    pub silence_timeout: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            connack_timeout: Duration::from_secs(10),
            silence_timeout: Some(silence_timeout_for(DEFAULT_KEEP_ALIVE_SECS)),
        }
    }
}

/// One and a half keep-alive periods, the broker's own disconnect threshold
pub fn silence_timeout_for(keep_alive_secs: u16) -> Duration {
    Duration::from_millis(u64::from(keep_alive_secs) * 1500)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            hardware_address: HardwareAddress::parse("a4:cf:12:0b:3e:7d").unwrap(),
            bin_id: "1".to_string(),
            bin_code: "BIN001".to_string(),
            sensor_code: "SENS001".to_string(),
            location: "Building A - Floor 1".to_string(),
            weight_offset: 0.0,
        }
    }

    #[test]
    fn test_identity_client_id() {
        let credentials = ConnectCredentials::for_identity(
            &identity(),
            "smartbin-",
            BrokerAuth::new("u", "p"),
            60,
        );
        assert_eq!(credentials.client_id(), "smartbin-A4CF120B3E7D");
    }

    #[test]
    fn test_fleet_client_id_carries_mac_suffix() {
        let address = HardwareAddress::parse("a4:cf:12:0b:3e:7d").unwrap();
        let credentials =
            ConnectCredentials::for_fleet("smartbin-fleet", &address, BrokerAuth::new("u", "p"), 60);
        assert_eq!(credentials.client_id(), "smartbin-fleet-A4CF120B3E7D");
    }

    #[test]
    fn test_client_id_is_stable() {
        let a = ConnectCredentials::for_identity(&identity(), "smartbin-", BrokerAuth::new("u", "p"), 60);
        let b = ConnectCredentials::for_identity(&identity(), "smartbin-", BrokerAuth::new("u", "p"), 60);
        assert_eq!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_encode_connect_uses_credentials() {
        let credentials = ConnectCredentials::for_identity(
            &identity(),
            "smartbin-",
            BrokerAuth::new("device", "secret"),
            60,
        );
        let mut buffer = PacketBuffer::with_capacity(128);
        let packet = credentials.encode(&mut buffer).unwrap();

        assert_eq!(packet[0], 0x10);
        assert_eq!(packet[9], 0xC2);
        assert_eq!(&packet[10..12], &[0x00, 60]);
        let client_id_len = u16::from_be_bytes([packet[12], packet[13]]) as usize;
        assert_eq!(&packet[14..14 + client_id_len], b"smartbin-A4CF120B3E7D");
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", BrokerAuth::new("device", "secret"));
        assert!(rendered.contains("device"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_silence_timeout() {
        assert_eq!(silence_timeout_for(60), Duration::from_secs(90));
        assert_eq!(ReconnectConfig::default().interval, Duration::from_secs(5));
    }
}
