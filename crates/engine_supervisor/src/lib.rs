//! Lifecycle management for the local engine process.
//!
//! [`EngineSupervisor`] drives one engine through
//! `Idle -> Allocating -> Spawning -> Probing -> Ready`, trying each configured
//! runtime in order and tearing the previous engine down before a new one is
//! spawned. At most one engine is ever `Ready` per supervisor.

mod config;
mod error;
mod port;
mod probe;
mod process;
mod supervisor;

pub use config::{default_runtimes, Credentials, SupervisorConfig, DEFAULT_WORKSPACE_ENV};
pub use error::{AttemptFailure, LaunchAttempt, SupervisorError};
pub use port::{AllocationError, PortAllocator};
pub use probe::{Connector, ProbeConfig, ProbeOutcome, ReadinessProbe, TcpConnector};
pub use process::{
    EngineHandle, EngineProcess, ExitNotice, ExitReport, LaunchSpec, Launcher, ProcessLauncher,
    ProcessState,
};
pub use supervisor::{EngineSupervisor, SupervisorState};
