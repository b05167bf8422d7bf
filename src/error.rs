//! Error types for the smart bin device
//!
//! Each layer owns a narrow error enum; [`DeviceError`] gathers them for the
//! boot path and the supervisor, which decides whether a failure ends the
//! process or only the current device task.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::config::ConfigError;
use crate::protocol::CodecError;
use crate::provisioning::ProvisioningError;
use crate::scheduler::FrameSourceError;
use crate::transport::mqtt::SessionError;
use crate::transport::TransportError;

/// Main error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Packet encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("Telemetry source error: {0}")]
    FrameSource(#[from] FrameSourceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeviceError {
    /// Errors that no restart can fix
    ///
    /// Configuration problems end the process; everything else restarts the
    /// device task after the holding delay.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Config(_) | DeviceError::FrameSource(_))
    }

    /// Short stable label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::Config(_) => "config",
            DeviceError::Provisioning(_) => "provisioning",
            DeviceError::Transport(_) => "transport",
            DeviceError::Session(_) => "session",
            DeviceError::Codec(_) => "codec",
            DeviceError::FrameSource(_) => "frame_source",
            DeviceError::Serialization(_) => "serialization",
        }
    }

    /// Display text with secrets scrubbed, safe for logs
    pub fn to_log_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SECRET_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and secret paths, and cap the length at 500 bytes
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(re) = SECRET_PATTERN.as_ref() {
        sanitized = re.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(re) = SECRET_PATH_PATTERN.as_ref() {
        sanitized = re.replace_all(&sanitized, "/***REDACTED***/").to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
