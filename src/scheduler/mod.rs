//! Telemetry scheduling
//!
//! Two timers drive outbound traffic once the session is Ready: the publish
//! timer (interval chosen by the [`FrameSource`]) and the keep-alive timer
//! for PINGREQ. Both are deadlines polled by the device loop; at most one
//! packet comes out of each poll, publish first.

pub mod frame_source;
pub mod sensor;
pub mod ticker;

pub use frame_source::{FleetMember, FleetSource, FrameSource, FrameSourceError, ProvisionedSource};
pub use sensor::{SensorReader, SimulatedSensor};
pub use ticker::Ticker;

use crate::protocol::TelemetryFrame;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Half the negotiated 60 s keep-alive
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Wall clock rendered at a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// `None` when the offset is outside ±24 h
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

/// Packet the loop should encode and send now
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledPacket {
    Publish(TelemetryFrame),
    PingReq,
}

pub struct TelemetryScheduler {
    source: Box<dyn FrameSource>,
    publish: Ticker,
    keepalive: Ticker,
    clock: LocalClock,
}

impl TelemetryScheduler {
    pub fn new(source: Box<dyn FrameSource>, ping_interval: Duration, clock: LocalClock) -> Self {
        Self {
            source,
            publish: Ticker::new(Duration::ZERO),
            keepalive: Ticker::new(ping_interval),
            clock,
        }
    }

    /// Publish at once and start the keep-alive period
    pub fn on_session_ready(&mut self, now: Instant) {
        self.publish.fire_at(now);
        self.keepalive.rearm(now);
    }

    /// Stop both timers until the session is Ready again
    pub fn on_session_lost(&mut self) {
        self.publish.disarm();
        self.keepalive.disarm();
    }

    pub fn is_active(&self) -> bool {
        self.publish.is_armed() || self.keepalive.is_armed()
    }

    /// Next due packet, if any; advances the timer that fired
    pub fn poll(&mut self, now: Instant) -> Option<ScheduledPacket> {
        if self.publish.is_due(now) {
            let frame = self.source.next_frame(&self.clock.now());
            self.publish
                .schedule_after(now, self.source.delay_after_publish());
            return Some(ScheduledPacket::Publish(frame));
        }

        if self.keepalive.is_due(now) {
            self.keepalive.rearm(now);
            return Some(ScheduledPacket::PingReq);
        }

        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.publish.next_due(), self.keepalive.next_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn identity_count(&self) -> usize {
        self.source.identity_count()
    }
}
