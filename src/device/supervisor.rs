//! Supervised device task
//!
//! One run of the device task is: resolve the identity (or load the fleet
//! table), build a fresh transport, session and scheduler, and run the loop.
//! A run that cannot obtain an identity ends with
//! [`DeviceExit::RestartRequested`]; the supervisor holds for the configured
//! delay and boots again from scratch, or exits with status 75 so a service
//! manager can restart the process.

use super::{DeviceExit, DeviceRuntime};
use crate::config::{DeviceConfig, OperatingMode};
use crate::error::{sanitize_error_message, DeviceResult};
use crate::observability::metrics;
use crate::protocol::PacketBuffer;
use crate::provisioning::ProvisioningResolver;
use crate::scheduler::{
    FleetMember, FleetSource, FrameSource, ProvisionedSource, SimulatedSensor, TelemetryScheduler,
};
use crate::transport::mqtt::{ConnectCredentials, Session};
use crate::transport::{FrameTransport, WebSocketTransport};
use crate::{lifecycle_span, provisioning_span};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

/// Process exit status asking the service manager for a restart (EX_TEMPFAIL)
pub const RESTART_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Shutdown,
    /// Holding delay elapsed and `exit_on_restart` is set
    ExitForRestart(String),
}

pub struct Supervisor<F> {
    config: DeviceConfig,
    transport_factory: F,
}

fn websocket_transport(config: &DeviceConfig) -> WebSocketTransport {
    WebSocketTransport::new(config.mqtt.broker_url.clone(), config.connect_timeout())
}

impl Supervisor<fn(&DeviceConfig) -> WebSocketTransport> {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            transport_factory: websocket_transport,
        }
    }
}

impl<F, T> Supervisor<F>
where
    F: FnMut(&DeviceConfig) -> T,
    T: FrameTransport,
{
    /// Build each run's transport with `factory` instead of a WebSocket
    pub fn with_transport_factory(config: DeviceConfig, factory: F) -> Self {
        Self {
            config,
            transport_factory: factory,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Run device tasks until shutdown
    ///
    /// Errors are configuration problems a restart cannot fix.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> DeviceResult<SupervisorOutcome> {
        let restart_delay = self.config.restart_delay();
        let mut run: u64 = 0;

        loop {
            run += 1;
            let span = lifecycle_span!(run, mode = ?self.config.device.mode);
            let exit = run_device_task(&self.config, &mut self.transport_factory, shutdown.clone())
                .instrument(span)
                .await?;

            let reason = match exit {
                DeviceExit::Shutdown => {
                    log_snapshot("Device shut down");
                    return Ok(SupervisorOutcome::Shutdown);
                }
                DeviceExit::RestartRequested(reason) => reason,
            };

            warn!(
                reason = %reason,
                delay_secs = restart_delay.as_secs(),
                "Device task requested restart"
            );

            let mut holding = shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(restart_delay) => {}
                _ = wait_for_shutdown(&mut holding) => {
                    log_snapshot("Device shut down during restart hold");
                    return Ok(SupervisorOutcome::Shutdown);
                }
            }

            metrics().device_restarted();
            log_snapshot("Restarting device task");

            if self.config.supervisor.exit_on_restart {
                return Ok(SupervisorOutcome::ExitForRestart(reason));
            }
        }
    }
}

fn log_snapshot(message: &str) {
    let snapshot = metrics().get_metrics();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "{message}"),
        Err(e) => warn!(error = %e, "{message}; metrics snapshot unavailable"),
    }
}

/// Resolves once shutdown is signalled or the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One full boot of the device followed by the runtime loop
pub async fn run_device_task<F, T>(
    config: &DeviceConfig,
    make_transport: &mut F,
    shutdown: watch::Receiver<bool>,
) -> DeviceResult<DeviceExit>
where
    F: FnMut(&DeviceConfig) -> T,
    T: FrameTransport,
{
    let auth = config.broker_auth()?;
    let hardware_address = config.hardware_address()?;
    let keep_alive = config.mqtt.keep_alive_secs;

    let (source, credentials): (Box<dyn FrameSource>, ConnectCredentials) = match config.device.mode {
        OperatingMode::Single => {
            let resolver = match ProvisioningResolver::new(config.resolver_config()) {
                Ok(resolver) => resolver,
                Err(e) => return Ok(DeviceExit::RestartRequested(e.to_string())),
            };

            let span = provisioning_span!(mac = %hardware_address);
            let mut interrupt = shutdown.clone();
            let resolved = tokio::select! {
                result = resolver.resolve(&hardware_address).instrument(span) => result,
                _ = wait_for_shutdown(&mut interrupt) => return Ok(DeviceExit::Shutdown),
            };

            let identity = match resolved {
                Ok(identity) => identity,
                Err(e) => {
                    error!(
                        mac = %hardware_address,
                        error = %sanitize_error_message(&e.to_string()),
                        "Provisioning failed"
                    );
                    return Ok(DeviceExit::RestartRequested(e.to_string()));
                }
            };

            let credentials = ConnectCredentials::for_identity(
                &identity,
                &config.device.client_id_prefix,
                auth,
                keep_alive,
            );
            let sensor = SimulatedSensor::new(config.telemetry.capacity_liters);
            let source = ProvisionedSource::new(identity, Box::new(sensor), config.publish_interval());
            (Box::new(source), credentials)
        }
        OperatingMode::Fleet => {
            let members = config
                .fleet_identities()?
                .into_iter()
                .map(|(identity, capacity)| FleetMember {
                    identity,
                    sensor: Box::new(SimulatedSensor::new(capacity)),
                })
                .collect();
            let source = FleetSource::new(
                members,
                Duration::from_secs(config.fleet.item_interval_secs),
                Duration::from_secs(config.fleet.cycle_interval_secs),
            )?;
            info!(
                bins = source.identity_count(),
                wrap_delay_secs = source.wrap_delay().as_secs(),
                "Fleet loaded"
            );
            let credentials = ConnectCredentials::for_fleet(
                &config.fleet.client_id,
                &hardware_address,
                auth,
                keep_alive,
            );
            (Box::new(source), credentials)
        }
    };

    let mut runtime = boot_runtime(config, source, credentials, make_transport(config))?;
    Ok(runtime.run(shutdown).await)
}

/// Assemble a runtime with a fresh session, scheduler and buffer
pub fn boot_runtime<T: FrameTransport>(
    config: &DeviceConfig,
    source: Box<dyn FrameSource>,
    credentials: ConnectCredentials,
    transport: T,
) -> DeviceResult<DeviceRuntime<T>> {
    let scheduler = TelemetryScheduler::new(source, config.ping_interval(), config.local_clock()?);
    Ok(DeviceRuntime::new(
        transport,
        Session::new(config.reconnect_config()),
        scheduler,
        PacketBuffer::with_capacity(config.mqtt.buffer_capacity),
        credentials,
    ))
}
