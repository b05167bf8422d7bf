//! Device lifecycle: boot, the cooperative runtime loop, and the supervisor
//! that restarts the whole device task when provisioning gives up.

pub mod runtime;
pub mod supervisor;

pub use runtime::DeviceRuntime;
pub use supervisor::{boot_runtime, run_device_task, Supervisor, SupervisorOutcome, RESTART_EXIT_CODE};

/// How one run of the device task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceExit {
    /// Shutdown was signalled; do not restart
    Shutdown,
    /// Hold, then re-run the full boot sequence
    RestartRequested(String),
}
