//! Provisioning lookup against the backend device registry
//!
//! The registry maps a hardware address to the bin the sensor is mounted in:
//!
//! ```text
//! GET {api_base}/api/devices/lookup?mac=A4:CF:12:0B:3E:7D
//! ```
//!
//! ```json
//! {
//!   "registered": true,
//!   "bin_id": 3,
//!   "bin_code": "BIN003",
//!   "sensor_code": "SENS003",
//!   "location": "Building B - Floor 1",
//!   "weight_offset": 1.5
//! }
//! ```
//!
//! An unregistered device gets `{"registered": false}`. That is the normal
//! state before onboarding, so it is retried like a network failure. A body
//! that cannot be interpreted is not retried.

use crate::observability::metrics;
use crate::protocol::identity::string_or_number;
use crate::protocol::{validate_bin_code, DeviceIdentity, HardwareAddress};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LOOKUP_PATH: &str = "/api/devices/lookup";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisioningError {
    #[error("Device is not registered")]
    NotRegistered,
    #[error("Registry request failed: {0}")]
    NetworkFailure(String),
    #[error("Registry response is malformed: {0}")]
    MalformedResponse(String),
    #[error("Provisioning gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProvisioningError>,
    },
}

impl ProvisioningError {
    /// Whether another lookup attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisioningError::NotRegistered | ProvisioningError::NetworkFailure(_)
        )
    }
}

/// Registry endpoint and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub api_base: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".to_string(),
            timeout: Duration::from_secs(10),
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl ResolverConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn lookup_url(&self) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), LOOKUP_PATH)
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    registered: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    bin_id: Option<String>,
    #[serde(default)]
    bin_code: Option<String>,
    #[serde(default)]
    sensor_code: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    weight_offset: Option<f64>,
}

/// Parse a registry body into an identity for `hardware_address`
pub fn parse_lookup_response(
    hardware_address: &HardwareAddress,
    body: &str,
) -> Result<DeviceIdentity, ProvisioningError> {
    let response: LookupResponse = serde_json::from_str(body)
        .map_err(|e| ProvisioningError::MalformedResponse(e.to_string()))?;

    if !response.registered {
        return Err(ProvisioningError::NotRegistered);
    }

    let required = |value: Option<String>, field: &str| {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ProvisioningError::MalformedResponse(format!("missing {field}")))
    };

    let bin_id = required(response.bin_id, "bin_id")?;
    let bin_code = required(response.bin_code, "bin_code")?;
    let sensor_code = required(response.sensor_code, "sensor_code")?;
    validate_bin_code(&bin_code)
        .map_err(|e| ProvisioningError::MalformedResponse(e.to_string()))?;

    Ok(DeviceIdentity {
        hardware_address: hardware_address.clone(),
        bin_id,
        bin_code,
        sensor_code,
        location: response.location.unwrap_or_default(),
        weight_offset: response.weight_offset.unwrap_or(0.0),
    })
}

pub struct ProvisioningResolver {
    config: ResolverConfig,
    client: reqwest::Client,
}

impl ProvisioningResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, ProvisioningError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProvisioningError::NetworkFailure(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// One registry request, no retries
    pub async fn lookup(
        &self,
        hardware_address: &HardwareAddress,
    ) -> Result<DeviceIdentity, ProvisioningError> {
        let response = self
            .client
            .get(self.config.lookup_url())
            .query(&[("mac", hardware_address.as_str())])
            .send()
            .await
            .map_err(|e| ProvisioningError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProvisioningError::NetworkFailure(format!(
                "registry returned HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProvisioningError::NetworkFailure(e.to_string()))?;

        parse_lookup_response(hardware_address, &body)
    }

    /// Look up with the bounded retry policy
    ///
    /// `NotRegistered` and `NetworkFailure` are retried up to `max_attempts`
    /// with `retry_delay` between attempts; `MalformedResponse` returns at once.
    pub async fn resolve(
        &self,
        hardware_address: &HardwareAddress,
    ) -> Result<DeviceIdentity, ProvisioningError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = ProvisioningError::NotRegistered;

        for attempt in 1..=max_attempts {
            metrics().provisioning_attempt();
            debug!(
                attempt,
                max_attempts,
                url = %self.config.lookup_url(),
                mac = %hardware_address,
                "Looking up device registration"
            );

            match self.lookup(hardware_address).await {
                Ok(identity) => {
                    metrics().provisioning_succeeded();
                    info!(
                        bin_id = %identity.bin_id,
                        bin_code = %identity.bin_code,
                        sensor_code = %identity.sensor_code,
                        location = %identity.location,
                        weight_offset = identity.weight_offset,
                        "Device provisioned"
                    );
                    return Ok(identity);
                }
                Err(e) if e.is_retryable() => {
                    metrics().provisioning_failed();
                    warn!(attempt, max_attempts, error = %e, "Provisioning attempt failed");
                    last_error = e;
                    if attempt < max_attempts && !self.config.retry_delay.is_zero() {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
                Err(e) => {
                    metrics().provisioning_failed();
                    warn!(attempt, error = %e, "Provisioning response rejected");
                    return Err(e);
                }
            }
        }

        Err(ProvisioningError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last_error),
        })
    }
}
