use std::path::{Path, PathBuf};
use std::sync::Arc;

use engine_contract::EngineEndpoint;
use tokio::sync::mpsc;

use crate::config::{Credentials, SupervisorConfig};
use crate::error::{AttemptFailure, LaunchAttempt, SupervisorError};
use crate::port::PortAllocator;
use crate::probe::{Connector, ProbeOutcome, ReadinessProbe, TcpConnector};
use crate::process::{
    EngineProcess, ExitNotice, ExitReport, LaunchSpec, Launcher, ProcessLauncher, ProcessState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Allocating,
    Spawning,
    Probing,
    Ready,
    /// Every runtime candidate failed; stays here until `restart` or a
    /// different workspace.
    Failed,
    /// The ready engine exited on its own.
    Exited,
}

/// Owns at most one engine process for one front-end.
///
/// Operations take `&mut self`, so callers serialize `ensure_running`,
/// `restart` and `shutdown`. Dropping the supervisor kills the engine.
pub struct EngineSupervisor<C = TcpConnector> {
    config: SupervisorConfig,
    launcher: Arc<dyn Launcher>,
    probe: ReadinessProbe<C>,
    ports: PortAllocator,
    state: SupervisorState,
    current: Option<EngineProcess>,
    endpoint: Option<EngineEndpoint>,
    exhausted: Option<(PathBuf, Vec<LaunchAttempt>)>,
    exit_tx: mpsc::UnboundedSender<ExitNotice>,
    exit_rx: Option<mpsc::UnboundedReceiver<ExitNotice>>,
}

impl EngineSupervisor<TcpConnector> {
    /// Supervisor that spawns real child processes and probes over TCP.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_parts(config, Arc::new(ProcessLauncher), TcpConnector)
    }
}

impl<C: Connector> EngineSupervisor<C> {
    pub fn with_parts(config: SupervisorConfig, launcher: Arc<dyn Launcher>, connector: C) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            probe: ReadinessProbe::new(connector, config.probe),
            ports: PortAllocator::new(config.host),
            config,
            launcher,
            state: SupervisorState::Idle,
            current: None,
            endpoint: None,
            exhausted: None,
            exit_tx,
            exit_rx: Some(exit_rx),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Replaces the credentials handed to engines launched from now on.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.config.credentials = credentials;
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn current(&self) -> Option<&EngineProcess> {
        self.current.as_ref()
    }

    /// The ready engine's endpoint, if it is still running.
    pub fn endpoint(&self) -> Option<EngineEndpoint> {
        if self.state != SupervisorState::Ready {
            return None;
        }
        let alive = self
            .current
            .as_ref()
            .is_some_and(|process| process.exit_watch().borrow().is_none());
        self.endpoint.filter(|_| alive)
    }

    /// Receiver for engine exit notices. Only the first call gets it.
    pub fn take_exit_notices(&mut self) -> Option<mpsc::UnboundedReceiver<ExitNotice>> {
        self.exit_rx.take()
    }

    /// Moves a ready supervisor to `Exited` when its engine has died.
    pub fn poll_exit(&mut self) -> Option<ExitReport> {
        let process = self.current.as_mut()?;
        let report = process.refresh()?;
        if self.state == SupervisorState::Ready {
            tracing::warn!(
                pid = ?process.pid(),
                runtime = %process.runtime(),
                %report,
                "engine exited while ready"
            );
            self.state = SupervisorState::Exited;
            self.endpoint = None;
        }
        Some(report)
    }

    /// Returns the endpoint of a ready engine for `workspace`, starting one
    /// with the configured runtime candidates if needed.
    pub async fn ensure_running(
        &mut self,
        workspace: &Path,
    ) -> Result<EngineEndpoint, SupervisorError> {
        let candidates = self.config.runtimes.clone();
        self.ensure_running_with(workspace, &candidates).await
    }

    pub async fn ensure_running_with(
        &mut self,
        workspace: &Path,
        candidates: &[String],
    ) -> Result<EngineEndpoint, SupervisorError> {
        self.poll_exit();
        if let Some(endpoint) = self.endpoint() {
            if self
                .current
                .as_ref()
                .is_some_and(|process| process.workspace() == workspace)
            {
                return Ok(endpoint);
            }
        }
        if let Some(attempts) = self.exhausted_for(workspace) {
            tracing::debug!(
                workspace = %workspace.display(),
                "engine candidates already exhausted; waiting for restart"
            );
            return Err(SupervisorError::EngineUnavailable {
                workspace: workspace.to_path_buf(),
                attempts,
            });
        }

        self.stop_current().await;
        self.exhausted = None;

        self.state = SupervisorState::Allocating;
        let port = match self.ports.allocate() {
            Ok(port) => port,
            Err(error) => {
                tracing::error!(%error, "engine port allocation failed");
                self.state = SupervisorState::Failed;
                return Err(error.into());
            }
        };
        let endpoint = EngineEndpoint::new(self.config.host, port);

        let mut attempts = Vec::with_capacity(candidates.len());
        for runtime in candidates {
            self.state = SupervisorState::Spawning;
            let spec = LaunchSpec::for_runtime(&self.config, runtime, workspace, port);
            let handle = match self.launcher.launch(&spec, self.exit_tx.clone()) {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::warn!(%runtime, %error, "engine runtime failed to spawn");
                    attempts.push(LaunchAttempt {
                        runtime: runtime.clone(),
                        failure: AttemptFailure::SpawnFailed(error.to_string()),
                    });
                    self.state = SupervisorState::Idle;
                    continue;
                }
            };

            let mut process = EngineProcess::new(handle, &spec);
            process.set_state(ProcessState::Probing);
            self.state = SupervisorState::Probing;

            match self.probe_spawned(&process, endpoint).await {
                Ok(()) => {
                    tracing::info!(
                        pid = ?process.pid(),
                        %runtime,
                        %endpoint,
                        workspace = %workspace.display(),
                        "engine ready"
                    );
                    process.set_state(ProcessState::Ready);
                    self.current = Some(process);
                    self.endpoint = Some(endpoint);
                    self.state = SupervisorState::Ready;
                    return Ok(endpoint);
                }
                Err(failure) => {
                    tracing::warn!(pid = ?process.pid(), %runtime, %failure, "engine did not become ready");
                    process.set_state(ProcessState::Failed);
                    process.stop(self.config.stop_grace).await;
                    attempts.push(LaunchAttempt {
                        runtime: runtime.clone(),
                        failure,
                    });
                    self.state = SupervisorState::Idle;
                }
            }
        }

        self.state = SupervisorState::Failed;
        self.exhausted = Some((workspace.to_path_buf(), attempts.clone()));
        let error = SupervisorError::EngineUnavailable {
            workspace: workspace.to_path_buf(),
            attempts,
        };
        tracing::error!(%error, "engine unavailable");
        Err(error)
    }

    /// Kills any running engine, then starts a fresh one for `workspace`.
    /// This is also the way out of `Failed`.
    pub async fn restart(&mut self, workspace: &Path) -> Result<EngineEndpoint, SupervisorError> {
        self.stop_current().await;
        self.exhausted = None;
        self.state = SupervisorState::Idle;
        self.ensure_running(workspace).await
    }

    /// Kills the current engine if any. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.stop_current().await;
        self.exhausted = None;
        self.state = SupervisorState::Idle;
    }

    fn exhausted_for(&self, workspace: &Path) -> Option<Vec<LaunchAttempt>> {
        if self.state != SupervisorState::Failed {
            return None;
        }
        self.exhausted
            .as_ref()
            .filter(|(failed, _)| failed == workspace)
            .map(|(_, attempts)| attempts.clone())
    }

    async fn stop_current(&mut self) {
        self.endpoint = None;
        if let Some(mut process) = self.current.take() {
            let report = process.stop(self.config.stop_grace).await;
            tracing::info!(
                pid = ?process.pid(),
                runtime = %process.runtime(),
                exit = ?report,
                "engine stopped"
            );
        }
        if matches!(
            self.state,
            SupervisorState::Ready | SupervisorState::Exited
        ) {
            self.state = SupervisorState::Idle;
        }
    }

    /// Probes the freshly spawned engine, giving up early if it exits.
    async fn probe_spawned(
        &self,
        process: &EngineProcess,
        endpoint: EngineEndpoint,
    ) -> Result<(), AttemptFailure> {
        let timeout = self.config.readiness_timeout;
        let mut exit_rx = process.exit_watch();
        let exited = async move {
            let report = exit_rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|report| *report);
            report
        };

        tokio::select! {
            outcome = self.probe.wait_ready(endpoint.host, endpoint.port, timeout) => match outcome {
                ProbeOutcome::Ready { .. } => Ok(()),
                ProbeOutcome::TimedOut { .. } => Err(AttemptFailure::ProbeTimedOut(timeout)),
            },
            report = exited => Err(AttemptFailure::ExitedDuringProbe(
                report.unwrap_or_else(|| ExitReport::unknown(false)),
            )),
        }
    }
}
