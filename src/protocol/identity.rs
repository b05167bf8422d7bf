//! Device identity as resolved from the provisioning registry

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Normalised hardware (MAC) address, upper-case colon form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct HardwareAddress(String);

/// Reasons a hardware address string is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hardware address '{input}': expected six hex octets")]
pub struct HardwareAddressError {
    pub input: String,
}

impl HardwareAddress {
    /// Parse `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` or `aabbccddeeff`
    ///
    /// A separated form uses one separator character throughout, placed
    /// between every pair of hex digits.
    pub fn parse(input: &str) -> Result<Self, HardwareAddressError> {
        let trimmed = input.trim();
        let octets = match trimmed.len() {
            12 => Some(trimmed.as_bytes().chunks(2).collect::<Vec<_>>()),
            17 => {
                let separator = trimmed.as_bytes()[2];
                let well_formed = matches!(separator, b':' | b'-')
                    && trimmed
                        .bytes()
                        .skip(2)
                        .step_by(3)
                        .all(|b| b == separator);
                well_formed.then(|| trimmed.as_bytes().chunks(3).map(|c| &c[..2]).collect())
            }
            _ => None,
        };

        match octets {
            Some(octets) if octets.iter().all(|o| o.iter().all(u8::is_ascii_hexdigit)) => {
                let normalised: Vec<String> = octets
                    .iter()
                    .map(|o| String::from_utf8_lossy(o).to_ascii_uppercase())
                    .collect();
                Ok(Self(normalised.join(":")))
            }
            _ => Err(HardwareAddressError {
                input: input.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Twelve upper-case hex digits with no separators
    pub fn compact(&self) -> String {
        self.0.replace(':', "")
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for HardwareAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HardwareAddress::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Operating identity of one bin sensor
///
/// Created once by the provisioning resolver (or from the static fleet table)
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceIdentity {
    pub hardware_address: HardwareAddress,
    pub bin_id: String,
    pub bin_code: String,
    pub sensor_code: String,
    pub location: String,
    /// Calibration offset; applied by the backend on ingest, carried here for logging
    pub weight_offset: f64,
}

/// Accepts `"1"` or `1` for identifiers the registry may emit either way
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(text)) => Some(text),
        Some(Raw::Integer(value)) => Some(value.to_string()),
        Some(Raw::Float(value)) => Some(value.to_string()),
    })
}
