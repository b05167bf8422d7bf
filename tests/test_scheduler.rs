//! Publish and keep-alive timing, driven tick by tick

use smartbin::config::DeviceConfig;
use smartbin::scheduler::{
    FleetMember, FleetSource, LocalClock, ProvisionedSource, ScheduledPacket, TelemetryScheduler,
    DEFAULT_PING_INTERVAL,
};
use smartbin::testing::StaticSensor;
use std::time::Duration;
use tokio::time::Instant;

mod test_helpers;

fn fleet_scheduler(config: &DeviceConfig) -> TelemetryScheduler {
    let members = config
        .fleet_identities()
        .unwrap()
        .into_iter()
        .map(|(identity, _)| FleetMember {
            identity,
            sensor: Box::new(StaticSensor::default()),
        })
        .collect();
    let source = FleetSource::new(
        members,
        Duration::from_secs(config.fleet.item_interval_secs),
        Duration::from_secs(config.fleet.cycle_interval_secs),
    )
    .unwrap();
    TelemetryScheduler::new(Box::new(source), DEFAULT_PING_INTERVAL, config.local_clock().unwrap())
}

/// Advance one second at a time and collect what each tick emits
fn run_for(scheduler: &mut TelemetryScheduler, start: Instant, secs: u64) -> Vec<(u64, ScheduledPacket)> {
    let mut emitted = Vec::new();
    for t in 0..=secs {
        let now = start + Duration::from_secs(t);
        while let Some(packet) = scheduler.poll(now) {
            emitted.push((t, packet));
        }
    }
    emitted
}

#[test]
fn test_fleet_round_robin_over_two_passes() {
    let config = test_helpers::fleet_config();
    let mut scheduler = fleet_scheduler(&config);
    let start = Instant::now();
    scheduler.on_session_ready(start);

    let publishes: Vec<(u64, String)> = run_for(&mut scheduler, start, 130)
        .into_iter()
        .filter_map(|(t, packet)| match packet {
            ScheduledPacket::Publish(frame) => Some((t, frame.bin_code)),
            ScheduledPacket::PingReq => None,
        })
        .collect();

    let expected: Vec<(u64, String)> = [0, 2, 4, 6, 8, 60, 62, 64, 66, 68, 120, 122, 124, 126, 128]
        .into_iter()
        .zip(["BIN001", "BIN002", "BIN003", "BIN004", "BIN005"].into_iter().cycle())
        .map(|(t, code)| (t, code.to_string()))
        .collect();
    assert_eq!(publishes, expected);
}

#[test]
fn test_fleet_frames_carry_each_bin_identity() {
    let config = test_helpers::fleet_config();
    let mut scheduler = fleet_scheduler(&config);
    let start = Instant::now();
    scheduler.on_session_ready(start);

    let frames: Vec<_> = run_for(&mut scheduler, start, 8)
        .into_iter()
        .filter_map(|(_, packet)| match packet {
            ScheduledPacket::Publish(frame) => Some(frame),
            ScheduledPacket::PingReq => None,
        })
        .collect();

    assert_eq!(frames.len(), 5);
    assert_eq!(frames[2].hardware_address, "02:00:00:00:00:03");
    assert_eq!(frames[2].sensor_code, "SENS003");
    assert_eq!(frames[4].topic(), "waste/bins/BIN005/sensors");
    assert!(frames.iter().all(|f| f.timestamp.ends_with("+07:00")));
}

#[test]
fn test_keepalive_independent_of_publishing() {
    let identity = test_helpers::test_identity("BIN001");
    let source = ProvisionedSource::new(
        identity,
        Box::new(StaticSensor::default()),
        Duration::from_secs(45),
    );
    let mut scheduler =
        TelemetryScheduler::new(Box::new(source), DEFAULT_PING_INTERVAL, LocalClock::default());
    let start = Instant::now();
    scheduler.on_session_ready(start);

    let emitted = run_for(&mut scheduler, start, 100);
    let pings: Vec<u64> = emitted
        .iter()
        .filter(|(_, p)| *p == ScheduledPacket::PingReq)
        .map(|(t, _)| *t)
        .collect();
    let publishes: Vec<u64> = emitted
        .iter()
        .filter(|(_, p)| matches!(p, ScheduledPacket::Publish(_)))
        .map(|(t, _)| *t)
        .collect();

    assert_eq!(pings, vec![30, 60, 90]);
    assert_eq!(publishes, vec![0, 45, 90]);
}

#[test]
fn test_reconnect_restarts_with_immediate_publish() {
    let config = test_helpers::fleet_config();
    let mut scheduler = fleet_scheduler(&config);
    let start = Instant::now();
    scheduler.on_session_ready(start);
    run_for(&mut scheduler, start, 3);

    scheduler.on_session_lost();
    assert_eq!(scheduler.next_deadline(), None);

    let resumed = start + Duration::from_secs(20);
    scheduler.on_session_ready(resumed);
    match scheduler.poll(resumed) {
        // The fleet cursor carries across reconnects
        Some(ScheduledPacket::Publish(frame)) => assert_eq!(frame.bin_code, "BIN003"),
        other => panic!("expected publish, got {other:?}"),
    }
}
