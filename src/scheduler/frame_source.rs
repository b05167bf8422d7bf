//! What to publish next
//!
//! Both operating modes sit behind [`FrameSource`]: a single provisioned
//! identity publishing on a fixed interval, or a fixed fleet published one
//! bin per tick in round-robin order.

use super::sensor::SensorReader;
use crate::protocol::{DeviceIdentity, TelemetryFrame};
use chrono::{DateTime, FixedOffset};
use std::time::Duration;
use thiserror::Error;

pub trait FrameSource: Send {
    /// Build the frame for the current tick and advance
    fn next_frame(&mut self, at: &DateTime<FixedOffset>) -> TelemetryFrame;

    /// Wait between the frame just produced and the next one
    fn delay_after_publish(&self) -> Duration;

    /// Number of identities this source publishes for
    fn identity_count(&self) -> usize;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameSourceError {
    #[error("Fleet must contain at least one bin")]
    EmptyFleet,
}

/// Single provisioned identity with its own sensor
pub struct ProvisionedSource {
    identity: DeviceIdentity,
    sensor: Box<dyn SensorReader>,
    interval: Duration,
}

impl ProvisionedSource {
    pub fn new(identity: DeviceIdentity, sensor: Box<dyn SensorReader>, interval: Duration) -> Self {
        Self {
            identity,
            sensor,
            interval,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

impl FrameSource for ProvisionedSource {
    fn next_frame(&mut self, at: &DateTime<FixedOffset>) -> TelemetryFrame {
        TelemetryFrame::new(&self.identity, self.sensor.read(), at)
    }

    fn delay_after_publish(&self) -> Duration {
        self.interval
    }

    fn identity_count(&self) -> usize {
        1
    }
}

pub struct FleetMember {
    pub identity: DeviceIdentity,
    pub sensor: Box<dyn SensorReader>,
}

/// Static fleet published in order, one bin per tick
///
/// Consecutive bins are `item_interval` apart; the pause after the last bin
/// makes each full pass start `cycle_interval` after the previous one.
pub struct FleetSource {
    members: Vec<FleetMember>,
    cursor: usize,
    item_interval: Duration,
    cycle_interval: Duration,
}

impl FleetSource {
    pub fn new(
        members: Vec<FleetMember>,
        item_interval: Duration,
        cycle_interval: Duration,
    ) -> Result<Self, FrameSourceError> {
        if members.is_empty() {
            return Err(FrameSourceError::EmptyFleet);
        }
        Ok(Self {
            members,
            cursor: 0,
            item_interval,
            cycle_interval,
        })
    }

    /// Index of the bin the next tick publishes
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn identities(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.members.iter().map(|m| &m.identity)
    }

    /// Pause after the last bin of a pass
    ///
    /// Falls back to `item_interval` when the cycle is shorter than a pass.
    pub fn wrap_delay(&self) -> Duration {
        let pass = self.item_interval * (self.members.len() as u32 - 1);
        match self.cycle_interval.checked_sub(pass) {
            Some(rest) if !rest.is_zero() => rest,
            _ => self.item_interval,
        }
    }
}

impl FrameSource for FleetSource {
    fn next_frame(&mut self, at: &DateTime<FixedOffset>) -> TelemetryFrame {
        let member = &mut self.members[self.cursor];
        let frame = TelemetryFrame::new(&member.identity, member.sensor.read(), at);
        self.cursor = (self.cursor + 1) % self.members.len();
        frame
    }

    fn delay_after_publish(&self) -> Duration {
        if self.cursor == 0 {
            self.wrap_delay()
        } else {
            self.item_interval
        }
    }

    fn identity_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HardwareAddress, SensorReading};
    use chrono::TimeZone;

    struct FixedSensor;

    impl SensorReader for FixedSensor {
        fn read(&mut self) -> SensorReading {
            SensorReading {
                fill_level: 50.0,
                weight_kg: 30.0,
                temperature_c: 25.0,
                battery_level: 90.0,
                signal_strength_dbm: -50,
            }
        }
    }

    fn identity(n: usize) -> DeviceIdentity {
        DeviceIdentity {
            hardware_address: HardwareAddress::parse(&format!("02:00:00:00:00:{n:02X}")).unwrap(),
            bin_id: n.to_string(),
            bin_code: format!("BIN{n:03}"),
            sensor_code: format!("SENS{n:03}"),
            location: String::new(),
            weight_offset: 0.0,
        }
    }

    fn fleet(n: usize) -> FleetSource {
        let members = (1..=n)
            .map(|i| FleetMember {
                identity: identity(i),
                sensor: Box::new(FixedSensor),
            })
            .collect();
        FleetSource::new(members, Duration::from_secs(2), Duration::from_secs(60)).unwrap()
    }

    fn at() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 15, 8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_empty_fleet_rejected() {
        assert_eq!(
            FleetSource::new(Vec::new(), Duration::from_secs(2), Duration::from_secs(60)).err(),
            Some(FrameSourceError::EmptyFleet)
        );
    }

    #[test]
    fn test_fleet_round_robin_wraps() {
        let mut source = fleet(3);
        let codes: Vec<String> = (0..7).map(|_| source.next_frame(&at()).bin_code).collect();
        assert_eq!(
            codes,
            ["BIN001", "BIN002", "BIN003", "BIN001", "BIN002", "BIN003", "BIN001"]
        );
    }

    #[test]
    fn test_fleet_delays_make_sixty_second_cycle() {
        let mut source = fleet(5);
        let mut total = Duration::ZERO;
        for _ in 0..5 {
            source.next_frame(&at());
            total += source.delay_after_publish();
        }
        assert_eq!(total, Duration::from_secs(60));
        assert_eq!(source.cursor(), 0);
    }

    #[test]
    fn test_wrap_delay_falls_back_when_cycle_too_short() {
        let members = (1..=40)
            .map(|i| FleetMember {
                identity: identity(i),
                sensor: Box::new(FixedSensor),
            })
            .collect();
        let source = FleetSource::new(members, Duration::from_secs(2), Duration::from_secs(60)).unwrap();
        assert_eq!(source.wrap_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_single_member_fleet_uses_cycle() {
        let mut source = fleet(1);
        source.next_frame(&at());
        assert_eq!(source.delay_after_publish(), Duration::from_secs(60));
    }

    #[test]
    fn test_provisioned_source() {
        let mut source = ProvisionedSource::new(identity(4), Box::new(FixedSensor), Duration::from_secs(30));
        let frame = source.next_frame(&at());

        assert_eq!(frame.bin_code, "BIN004");
        assert_eq!(frame.timestamp, "2025-01-15T08:00:00+07:00");
        assert_eq!(source.delay_after_publish(), Duration::from_secs(30));
        assert_eq!(source.identity_count(), 1);
    }
}
