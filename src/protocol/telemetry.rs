//! Telemetry frame published once per tick

use super::identity::DeviceIdentity;
use super::topics::sensor_topic;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::Serialize;

/// One sensor sample, before it is bound to an identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub fill_level: f64,
    pub weight_kg: f64,
    pub temperature_c: f64,
    pub battery_level: f64,
    pub signal_strength_dbm: i32,
}

/// JSON payload of a sensor PUBLISH
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryFrame {
    pub bin_id: String,
    pub bin_code: String,
    pub sensor_code: String,
    #[serde(rename = "mac_address")]
    pub hardware_address: String,
    pub fill_level: f64,
    pub weight_kg: f64,
    pub temperature_c: f64,
    pub battery_level: f64,
    #[serde(rename = "signal_strength")]
    pub signal_strength_dbm: i32,
    pub timestamp: String,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Local time with explicit offset, second precision: `2025-01-15T14:30:00+07:00`
pub fn format_timestamp(at: &DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl TelemetryFrame {
    pub fn new(identity: &DeviceIdentity, reading: SensorReading, at: &DateTime<FixedOffset>) -> Self {
        Self {
            bin_id: identity.bin_id.clone(),
            bin_code: identity.bin_code.clone(),
            sensor_code: identity.sensor_code.clone(),
            hardware_address: identity.hardware_address.to_string(),
            fill_level: round2(reading.fill_level),
            weight_kg: round2(reading.weight_kg),
            temperature_c: round2(reading.temperature_c),
            battery_level: round2(reading.battery_level),
            signal_strength_dbm: reading.signal_strength_dbm,
            timestamp: format_timestamp(at),
        }
    }

    pub fn topic(&self) -> String {
        sensor_topic(&self.bin_code)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
