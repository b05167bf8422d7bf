//! Process-wide device counters
//!
//! Atomic counters for provisioning, the MQTT session and telemetry output,
//! plus a mutex-protected session state label. Snapshots are serializable so
//! they can be logged as one structured record.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

pub struct MetricsCollector {
    // Provisioning
    provisioning_attempts: AtomicU64,
    provisioning_failures: AtomicU64,
    provisioned: AtomicBool,

    // MQTT session
    mqtt_ready: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_faults: AtomicU64,
    packets_received: AtomicU64,
    pings_sent: AtomicU64,
    last_ready_at: AtomicU64,

    // Telemetry output
    frames_published: AtomicU64,
    publish_failures: AtomicU64,
    bytes_sent: AtomicU64,
    last_publish_at: AtomicU64,

    // Lifecycle
    session_state: Mutex<String>,
    state_transitions: AtomicU64,
    restarts: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            provisioning_attempts: AtomicU64::new(0),
            provisioning_failures: AtomicU64::new(0),
            provisioned: AtomicBool::new(false),
            mqtt_ready: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_faults: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            last_ready_at: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            last_publish_at: AtomicU64::new(0),
            session_state: Mutex::new("idle".to_string()),
            state_transitions: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Provisioning
    pub fn provisioning_attempt(&self) {
        self.provisioning_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provisioning_failed(&self) {
        self.provisioning_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provisioning_succeeded(&self) {
        self.provisioned.store(true, Ordering::Relaxed);
    }

    // MQTT session
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_session_ready(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_ready.store(true, Ordering::Relaxed);
        self.last_ready_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_session_faulted(&self) {
        self.connection_faults.fetch_add(1, Ordering::Relaxed);
        self.mqtt_ready.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_ping_sent(&self, bytes: usize) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    // Telemetry
    pub fn frame_published(&self, bytes: usize) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_publish_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle
    pub fn set_session_state(&self, state: &str) {
        if let Ok(mut current) = self.session_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    pub fn device_restarted(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.provisioned.store(false, Ordering::Relaxed);
        self.mqtt_ready.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.provisioning_attempts,
            &self.provisioning_failures,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_faults,
            &self.packets_received,
            &self.pings_sent,
            &self.last_ready_at,
            &self.frames_published,
            &self.publish_failures,
            &self.bytes_sent,
            &self.last_publish_at,
            &self.state_transitions,
            &self.restarts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.provisioned.store(false, Ordering::Relaxed);
        self.mqtt_ready.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut state) = self.session_state.lock() {
            *state = "idle".to_string();
        }
    }

    fn current_session_state(&self) -> String {
        self.session_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        MetricsSnapshot {
            provisioning: ProvisioningMetrics {
                attempts: self.provisioning_attempts.load(Ordering::Relaxed),
                failures: self.provisioning_failures.load(Ordering::Relaxed),
                provisioned: self.provisioned.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                ready: self.mqtt_ready.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_faults: self.connection_faults.load(Ordering::Relaxed),
                packets_received: self.packets_received.load(Ordering::Relaxed),
                pings_sent: self.pings_sent.load(Ordering::Relaxed),
                last_ready_at: self.last_ready_at.load(Ordering::Relaxed),
            },
            telemetry: TelemetryMetrics {
                frames_published: self.frames_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
                last_publish_at: self.last_publish_at.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                session_state: self.current_session_state(),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                restarts: self.restarts.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub provisioning: ProvisioningMetrics,
    pub mqtt: MqttMetrics,
    pub telemetry: TelemetryMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningMetrics {
    pub attempts: u64,
    pub failures: u64,
    pub provisioned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub ready: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_faults: u64,
    pub packets_received: u64,
    pub pings_sent: u64,
    pub last_ready_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMetrics {
    pub frames_published: u64,
    pub publish_failures: u64,
    pub bytes_sent: u64,
    pub last_publish_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleMetrics {
    pub session_state: String,
    pub state_transitions: u64,
    pub restarts: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
