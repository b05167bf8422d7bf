//! Test helpers and utilities for integration tests

use smartbin::config::DeviceConfig;
use smartbin::protocol::{DeviceIdentity, HardwareAddress};

/// Minimal single-mode configuration pointing at `api_base`
#[allow(dead_code)]
pub fn single_config(api_base: &str) -> DeviceConfig {
    DeviceConfig::from_toml_str(&format!(
        r#"
[device]
hardware_address = "A4:CF:12:0B:3E:7D"

[provisioning]
api_base = "{api_base}"
retry_delay_secs = 0

[mqtt]
broker_url = "ws://127.0.0.1:9001/mqtt"
"#
    ))
    .expect("test config should parse")
}

/// Fleet-mode configuration with the default bin table
#[allow(dead_code)]
pub fn fleet_config() -> DeviceConfig {
    DeviceConfig::from_toml_str(
        r#"
[device]
hardware_address = "A4:CF:12:0B:3E:7D"
mode = "fleet"

[mqtt]
broker_url = "ws://127.0.0.1:9001/mqtt"
"#,
    )
    .expect("fleet config should parse")
}

#[allow(dead_code)]
pub fn test_identity(bin_code: &str) -> DeviceIdentity {
    DeviceIdentity {
        hardware_address: HardwareAddress::parse("A4:CF:12:0B:3E:7D").unwrap(),
        bin_id: "1".to_string(),
        bin_code: bin_code.to_string(),
        sensor_code: "SENS001".to_string(),
        location: "Building A - Floor 1".to_string(),
        weight_offset: 0.0,
    }
}
