//! End-to-end runtime loop against a scripted transport on a paused clock

use smartbin::device::{boot_runtime, DeviceExit, DeviceRuntime};
use smartbin::protocol::PacketType;
use smartbin::scheduler::ProvisionedSource;
use smartbin::testing::{MockTransport, MockTransportHandle, StaticSensor};
use smartbin::transport::mqtt::{ConnectCredentials, SessionState};
use smartbin::transport::TransportEvent;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

mod test_helpers;

fn runtime(transport: MockTransport) -> DeviceRuntime<MockTransport> {
    let config = test_helpers::single_config("http://127.0.0.1:8000");
    let identity = test_helpers::test_identity("BIN001");
    let credentials = ConnectCredentials::for_identity(
        &identity,
        &config.device.client_id_prefix,
        config.broker_auth().unwrap(),
        config.mqtt.keep_alive_secs,
    );
    let source = ProvisionedSource::new(
        identity,
        Box::new(StaticSensor::default()),
        config.publish_interval(),
    );
    boot_runtime(&config, Box::new(source), credentials, transport).unwrap()
}

/// Run the loop for `secs` of virtual time while `script` drives the broker side
async fn run_for<F>(runtime: &mut DeviceRuntime<MockTransport>, secs: u64, script: F) -> DeviceExit
where
    F: std::future::Future<Output = ()>,
{
    let (tx, rx) = watch::channel(false);
    let (exit, _) = tokio::join!(runtime.run(rx), async {
        tokio::join!(script, async {
            sleep(Duration::from_secs(secs)).await;
        });
        tx.send(true).unwrap();
    });
    exit
}

fn count(handle: &MockTransportHandle, packet_type: PacketType) -> usize {
    handle.sent_of_type(packet_type).len()
}

#[tokio::test(start_paused = true)]
async fn test_connack_then_exactly_one_immediate_publish() {
    let transport = MockTransport::with_auto_ack();
    let handle = transport.handle();
    let mut runtime = runtime(transport);

    let exit = run_for(&mut runtime, 10, async {}).await;

    assert_eq!(exit, DeviceExit::Shutdown);
    let sent = handle.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0][0], 0x10);
    assert_eq!(sent[1][0], 0x30);
}

#[tokio::test(start_paused = true)]
async fn test_broker_close_reconnects_and_republishes() {
    let transport = MockTransport::with_auto_ack();
    let handle = transport.handle();
    let broker = handle.clone();
    let mut runtime = runtime(transport);

    run_for(&mut runtime, 50, async move {
        sleep(Duration::from_secs(40)).await;
        broker.close_from_broker(Some("server shutting down"));
    })
    .await;

    assert_eq!(count(&handle, PacketType::Connect), 2);
    // t = 0, 30, then immediately after reconnecting at 45
    assert_eq!(count(&handle, PacketType::Publish), 3);
    assert_eq!(count(&handle, PacketType::PingReq), 1);
    assert_eq!(handle.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_connack_times_out_and_retries() {
    let transport = MockTransport::new();
    let handle = transport.handle();
    let mut runtime = runtime(transport);

    run_for(&mut runtime, 31, async {}).await;

    // Attempts at 0, 15 and 30: 10 s CONNACK wait plus 5 s reconnect interval
    assert_eq!(count(&handle, PacketType::Connect), 3);
    assert_eq!(count(&handle, PacketType::Publish), 0);
    assert_eq!(runtime.session().state(), SessionState::AwaitingConnAck);
}

#[tokio::test(start_paused = true)]
async fn test_silent_broker_faults_session() {
    let transport = MockTransport::new().with_connack_code(0);
    let handle = transport.handle();
    let mut runtime = runtime(transport);

    run_for(&mut runtime, 96, async {}).await;

    // Keep-alive 60 s, silence after 90 s, reconnect 5 s later
    assert_eq!(count(&handle, PacketType::Connect), 2);
    assert_eq!(count(&handle, PacketType::PingReq), 2);
    assert_eq!(runtime.session().fault_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failures_retry_every_five_seconds() {
    let transport = MockTransport::with_auto_ack().failing_opens(3);
    let handle = transport.handle();
    let mut runtime = runtime(transport);

    run_for(&mut runtime, 16, async {}).await;

    assert_eq!(handle.open_count(), 4);
    assert_eq!(count(&handle, PacketType::Connect), 1);
    assert_eq!(count(&handle, PacketType::Publish), 1);
    assert!(runtime.session().is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_pingresp_before_connack_faults_and_reconnects() {
    let transport = MockTransport::new();
    let handle = transport.handle();
    let mut runtime = runtime(transport);
    let start = tokio::time::Instant::now();

    runtime.step(start).await;
    assert_eq!(runtime.session().state(), SessionState::AwaitingConnAck);

    runtime
        .handle_transport_event(TransportEvent::Data(vec![0xD0, 0x00]), start)
        .await;

    assert_eq!(runtime.session().state(), SessionState::Faulted);
    assert_eq!(handle.close_count(), 1);
    assert_eq!(count(&handle, PacketType::Publish), 0);

    runtime.step(start + Duration::from_secs(5)).await;
    assert_eq!(count(&handle, PacketType::Connect), 2);
}
