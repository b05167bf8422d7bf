//! Device configuration
//!
//! Loaded from a TOML file. Every tunable has a default matching the shipped
//! firmware, so a minimal file only needs the hardware address and the broker
//! URL. Broker credentials never live in the file: it names the environment
//! variables holding them, and they are read when the session is built.
//!
//! ```toml
//! [device]
//! hardware_address = "A4:CF:12:0B:3E:7D"
//!
//! [provisioning]
//! api_base = "https://api.example.com"
//!
//! [mqtt]
//! broker_url = "wss://broker.example.com:8884/mqtt"
//! username_env = "MQTT_USERNAME"
//! password_env = "MQTT_PASSWORD"
//! ```

use crate::protocol::{validate_bin_code, DeviceIdentity, HardwareAddress};
use crate::provisioning::ResolverConfig;
use crate::scheduler::LocalClock;
use crate::transport::mqtt::{silence_timeout_for, BrokerAuth, ReconnectConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    #[serde(default)]
    pub provisioning: ProvisioningSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub fleet: FleetSection,
    #[serde(default)]
    pub supervisor: SupervisorSection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Resolve one identity from the registry and publish for it
    #[default]
    Single,
    /// Publish for the static bin table in `[fleet]`
    Fleet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// MAC address of this board; `:` or `-` separated, or bare hex
    pub hardware_address: String,
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Offset applied to telemetry timestamps (default +07:00)
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

fn default_client_id_prefix() -> String {
    "smartbin-".to_string()
}

fn default_utc_offset_minutes() -> i32 {
    420
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisioningSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_provisioning_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_api_base() -> String {
    "http://localhost:8000".to_string()
}

fn default_provisioning_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_provisioning_timeout(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// `ws://` or `wss://` endpoint of the broker's WebSocket listener
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_secs: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Fault the session when the broker is silent for 1.5x keep-alive
    #[serde(default = "default_true")]
    pub silence_detection: bool,
}

fn default_keep_alive() -> u16 {
    60
}

fn default_ping_interval() -> u64 {
    30
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_connack_timeout() -> u64 {
    10
}

fn default_buffer_capacity() -> usize {
    512
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    /// Bin volume used by the simulated sensor in single mode
    #[serde(default = "default_capacity_liters")]
    pub capacity_liters: f64,
}

fn default_publish_interval() -> u64 {
    30
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            publish_interval_secs: default_publish_interval(),
            capacity_liters: default_capacity_liters(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetSection {
    /// Client identifier literal; the board's MAC is appended
    #[serde(default = "default_fleet_client_id")]
    pub client_id: String,
    #[serde(default = "default_item_interval")]
    pub item_interval_secs: u64,
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_fleet_bins")]
    pub bins: Vec<FleetBin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetBin {
    pub bin_id: String,
    pub bin_code: String,
    /// Defaults to `SENS` followed by the zero-padded bin id
    pub sensor_code: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_capacity_liters")]
    pub capacity_liters: f64,
    /// Reported as `mac_address`; defaults to a locally administered address
    pub hardware_address: Option<String>,
}

fn default_fleet_client_id() -> String {
    "smartbin-fleet".to_string()
}

fn default_item_interval() -> u64 {
    2
}

fn default_cycle_interval() -> u64 {
    60
}

fn default_capacity_liters() -> f64 {
    120.0
}

/// Finite and above zero; NaN fails both comparisons
fn is_positive_capacity(liters: f64) -> bool {
    liters.is_finite() && liters > 0.0
}

fn default_fleet_bins() -> Vec<FleetBin> {
    [
        ("1", "BIN001", "Building A - Floor 1", 120.0),
        ("2", "BIN002", "Building A - Floor 2", 120.0),
        ("3", "BIN003", "Building B - Floor 1", 240.0),
        ("4", "BIN004", "Parking Lot", 240.0),
        ("5", "BIN005", "Cafeteria", 180.0),
    ]
    .into_iter()
    .map(|(bin_id, bin_code, location, capacity_liters)| FleetBin {
        bin_id: bin_id.to_string(),
        bin_code: bin_code.to_string(),
        sensor_code: None,
        location: location.to_string(),
        capacity_liters,
        hardware_address: None,
    })
    .collect()
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            client_id: default_fleet_client_id(),
            item_interval_secs: default_item_interval(),
            cycle_interval_secs: default_cycle_interval(),
            bins: default_fleet_bins(),
        }
    }
}

impl FleetBin {
    pub fn sensor_code(&self) -> String {
        self.sensor_code
            .clone()
            .unwrap_or_else(|| format!("SENS{:0>3}", self.bin_id))
    }

    /// `02:00:00:00:{hi}:{lo}` from the bin's position when none is configured
    pub fn hardware_address(&self, index: usize) -> Result<HardwareAddress, ConfigError> {
        match &self.hardware_address {
            Some(raw) => parse_hardware_address(raw),
            None => {
                let n = index + 1;
                parse_hardware_address(&format!(
                    "02:00:00:00:{:02X}:{:02X}",
                    (n >> 8) & 0xFF,
                    n & 0xFF
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorSection {
    /// Holding delay before the device task is restarted
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
    /// Exit with status 75 instead of restarting in-process
    #[serde(default)]
    pub exit_on_restart: bool,
}

fn default_restart_delay() -> u64 {
    30
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            restart_delay_secs: default_restart_delay(),
            exit_on_restart: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid hardware address: {0}")]
    InvalidHardwareAddress(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn parse_hardware_address(raw: &str) -> Result<HardwareAddress, ConfigError> {
    HardwareAddress::parse(raw).map_err(|_| ConfigError::InvalidHardwareAddress(raw.to_string()))
}

impl DeviceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        config.device.hardware_address = config.hardware_address()?.to_string();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hardware_address()?;

        self.local_clock()?;

        validate_broker_url(&self.mqtt.broker_url)?;

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than zero".to_string(),
            ));
        }
        if self.mqtt.ping_interval_secs == 0
            || self.mqtt.ping_interval_secs >= u64::from(self.mqtt.keep_alive_secs)
        {
            return Err(ConfigError::InvalidConfig(format!(
                "ping_interval_secs must be between 1 and keep_alive_secs ({})",
                self.mqtt.keep_alive_secs
            )));
        }
        if self.mqtt.buffer_capacity < 64 {
            return Err(ConfigError::InvalidConfig(
                "buffer_capacity must be at least 64 bytes".to_string(),
            ));
        }
        if self.provisioning.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.device.mode == OperatingMode::Single {
            Url::parse(&self.provisioning.api_base).map_err(|e| {
                ConfigError::InvalidConfig(format!("invalid api_base '{}': {e}", self.provisioning.api_base))
            })?;
        }
        if !is_positive_capacity(self.telemetry.capacity_liters) {
            return Err(ConfigError::InvalidConfig(
                "capacity_liters must be positive".to_string(),
            ));
        }
        if self.telemetry.publish_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.device.mode == OperatingMode::Fleet {
            self.validate_fleet()?;
        }

        Ok(())
    }

    fn validate_fleet(&self) -> Result<(), ConfigError> {
        if self.fleet.bins.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "fleet mode requires at least one [[fleet.bins]] entry".to_string(),
            ));
        }
        if self.fleet.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "fleet client_id cannot be empty".to_string(),
            ));
        }
        if self.fleet.item_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "item_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, bin) in self.fleet.bins.iter().enumerate() {
            validate_bin_code(&bin.bin_code).map_err(|e| {
                ConfigError::InvalidConfig(format!("fleet bin {}: {e}", bin.bin_code))
            })?;
            if !seen.insert(bin.bin_code.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate fleet bin code {}",
                    bin.bin_code
                )));
            }
            if !is_positive_capacity(bin.capacity_liters) {
                return Err(ConfigError::InvalidConfig(format!(
                    "fleet bin {} capacity_liters must be positive",
                    bin.bin_code
                )));
            }
            bin.hardware_address(index)?;
        }

        Ok(())
    }

    pub fn hardware_address(&self) -> Result<HardwareAddress, ConfigError> {
        parse_hardware_address(&self.device.hardware_address)
    }

    /// Clock used for telemetry timestamps
    pub fn local_clock(&self) -> Result<LocalClock, ConfigError> {
        LocalClock::from_offset_minutes(self.device.utc_offset_minutes).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "utc_offset_minutes {} is outside -1439..=1439",
                self.device.utc_offset_minutes
            ))
        })
    }

    /// Credentials for CONNECT
    ///
    /// A named variable that is unset is an error; an unnamed one is empty.
    pub fn broker_auth(&self) -> Result<BrokerAuth, ConfigError> {
        let resolve = |name: &Option<String>| match name {
            Some(var) => std::env::var(var).map_err(|_| ConfigError::EnvVarNotFound(var.clone())),
            None => Ok(String::new()),
        };
        Ok(BrokerAuth::new(
            resolve(&self.mqtt.username_env)?,
            resolve(&self.mqtt.password_env)?,
        ))
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig::new(self.provisioning.api_base.clone())
            .with_timeout(Duration::from_secs(self.provisioning.timeout_secs))
            .with_max_attempts(self.provisioning.max_attempts)
            .with_retry_delay(Duration::from_secs(self.provisioning.retry_delay_secs))
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            interval: Duration::from_secs(self.mqtt.reconnect_interval_secs),
            connack_timeout: Duration::from_secs(self.mqtt.connack_timeout_secs),
            silence_timeout: self
                .mqtt
                .silence_detection
                .then(|| silence_timeout_for(self.mqtt.keep_alive_secs)),
        }
    }

    /// Static identities for fleet mode, paired with each bin's capacity
    pub fn fleet_identities(&self) -> Result<Vec<(DeviceIdentity, f64)>, ConfigError> {
        self.fleet
            .bins
            .iter()
            .enumerate()
            .map(|(index, bin)| {
                Ok((
                    DeviceIdentity {
                        hardware_address: bin.hardware_address(index)?,
                        bin_id: bin.bin_id.clone(),
                        bin_code: bin.bin_code.clone(),
                        sensor_code: bin.sensor_code(),
                        location: bin.location.clone(),
                        weight_offset: 0.0,
                    },
                    bin.capacity_liters,
                ))
            })
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.mqtt.ping_interval_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.publish_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.supervisor.restart_delay_secs)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
hardware_address = "a4:cf:12:0b:3e:7d"

[mqtt]
broker_url = "wss://broker.example.com:8884/mqtt"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn validate_broker_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidConfig(format!("invalid broker_url '{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" if url.host_str().is_some() => Ok(()),
        "ws" | "wss" => Err(ConfigError::InvalidConfig(format!(
            "broker_url '{raw}' has no host"
        ))),
        scheme => Err(ConfigError::InvalidConfig(format!(
            "broker_url scheme must be ws or wss, got '{scheme}'"
        ))),
    }
}
