use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::SupervisorConfig;

/// Everything needed to start one engine instance.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub workspace: PathBuf,
    pub port: u16,
}

impl LaunchSpec {
    /// Builds the launch for `program`, injecting the workspace path and the
    /// configured credentials into the child environment.
    pub fn for_runtime(
        config: &SupervisorConfig,
        program: &str,
        workspace: &Path,
        port: u16,
    ) -> Self {
        let mut env = BTreeMap::new();
        env.insert(
            config.workspace_env.clone(),
            workspace.to_string_lossy().into_owned(),
        );
        if let Some(engine_dir) = &config.engine_dir {
            env.insert(
                "PYTHONPATH".to_owned(),
                engine_dir.to_string_lossy().into_owned(),
            );
        }
        for (variable, value) in config.credentials.iter() {
            env.insert(variable.to_owned(), value.to_owned());
        }

        Self {
            program: program.to_owned(),
            args: config.render_args(port),
            env,
            working_dir: config.engine_dir.clone(),
            workspace: workspace.to_path_buf(),
            port,
        }
    }
}

impl fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("working_dir", &self.working_dir)
            .field("workspace", &self.workspace)
            .field("port", &self.port)
            .finish()
    }
}

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// True when the exit followed a kill request from the supervisor.
    pub requested: bool,
}

impl ExitReport {
    #[must_use]
    pub fn from_status(status: ExitStatus, requested: bool) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal(&status),
            requested,
        }
    }

    #[must_use]
    pub fn unknown(requested: bool) -> Self {
        Self {
            code: None,
            signal: None,
            requested,
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Published exactly once per spawned engine, whoever ended it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub pid: Option<u32>,
    pub runtime: String,
    pub workspace: PathBuf,
    pub uptime: Duration,
    pub report: ExitReport,
}

/// Live handle to a launched engine.
pub trait EngineHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to terminate. Later calls are no-ops.
    fn kill(&mut self);

    /// Resolves to `Some` once the process has exited.
    fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>>;
}

/// Starts engine processes.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        spec: &LaunchSpec,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> io::Result<Box<dyn EngineHandle>>;
}

/// Launches engines as real child processes via `tokio::process`.
///
/// Must be called from within a tokio runtime. Output lines are forwarded to
/// `tracing` under the `engine` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

struct ChildHandle {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl EngineHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }

    fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>> {
        self.exit_rx.clone()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> io::Result<Box<dyn EngineHandle>> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::info!(
            runtime = %spec.program,
            pid = ?pid,
            port = spec.port,
            workspace = %spec.workspace.display(),
            "engine process spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, pid, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, pid, "stderr"));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let runtime = spec.program.clone();
        let workspace = spec.workspace.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            let (status, requested) = tokio::select! {
                status = child.wait() => (status, false),
                _ = kill_rx => {
                    if let Err(error) = child.start_kill() {
                        tracing::warn!(pid = ?pid, %error, "failed to signal engine process");
                    }
                    (child.wait().await, true)
                }
            };

            let report = match status {
                Ok(status) => ExitReport::from_status(status, requested),
                Err(error) => {
                    tracing::warn!(pid = ?pid, %error, "failed to collect engine exit status");
                    ExitReport::unknown(requested)
                }
            };
            tracing::info!(pid = ?pid, %report, requested, "engine process exited");

            exit_tx.send_replace(Some(report));
            let _ = exits.send(ExitNotice {
                pid,
                runtime,
                workspace,
                uptime: started.elapsed(),
                report,
            });
        });

        Ok(Box::new(ChildHandle {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
        }))
    }
}

async fn forward_output<R>(stream: R, pid: Option<u32>, channel: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "engine", pid = ?pid, channel, "{line}"),
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(target: "engine", pid = ?pid, channel, %error, "output closed");
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Starting,
    Probing,
    Ready,
    Failed,
    Exited,
}

/// One supervised engine instance.
pub struct EngineProcess {
    handle: Box<dyn EngineHandle>,
    runtime: String,
    workspace: PathBuf,
    port: u16,
    state: ProcessState,
    kill_sent: bool,
    last_exit: Option<ExitReport>,
}

impl fmt::Debug for EngineProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineProcess")
            .field("pid", &self.handle.pid())
            .field("runtime", &self.runtime)
            .field("workspace", &self.workspace)
            .field("port", &self.port)
            .field("state", &self.state)
            .field("last_exit", &self.last_exit)
            .finish()
    }
}

impl EngineProcess {
    pub fn new(handle: Box<dyn EngineHandle>, spec: &LaunchSpec) -> Self {
        Self {
            handle,
            runtime: spec.program.clone(),
            workspace: spec.workspace.clone(),
            port: spec.port,
            state: ProcessState::Starting,
            kill_sent: false,
            last_exit: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn last_exit(&self) -> Option<ExitReport> {
        self.last_exit
    }

    pub(crate) fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>> {
        self.handle.exit_watch()
    }

    /// Polls the exit watch without waiting; records the report when present.
    pub fn refresh(&mut self) -> Option<ExitReport> {
        if self.last_exit.is_none() {
            let report = *self.handle.exit_watch().borrow();
            if let Some(report) = report {
                self.record_exit(report);
            }
        }
        self.last_exit
    }

    pub fn has_exited(&mut self) -> bool {
        self.refresh().is_some()
    }

    /// Sends the kill request at most once; returns whether it was sent now.
    pub fn kill(&mut self) -> bool {
        if self.kill_sent || self.has_exited() {
            return false;
        }
        self.kill_sent = true;
        tracing::info!(pid = ?self.pid(), runtime = %self.runtime, "killing engine process");
        self.handle.kill();
        true
    }

    /// Kills the process and waits up to `grace` for it to exit.
    pub async fn stop(&mut self, grace: Duration) -> Option<ExitReport> {
        self.kill();
        if self.last_exit.is_none() {
            let mut exit_rx = self.handle.exit_watch();
            let waited = tokio::time::timeout(grace, exit_rx.wait_for(Option::is_some))
                .await
                .map(|result| result.map(|report| *report));
            match waited {
                Ok(Ok(report)) => {
                    if let Some(report) = report {
                        self.record_exit(report);
                    }
                }
                Ok(Err(_)) => {
                    self.record_exit(ExitReport::unknown(true));
                }
                Err(_) => {
                    tracing::warn!(
                        pid = ?self.pid(),
                        grace_ms = grace.as_millis() as u64,
                        "engine did not exit within the stop grace period"
                    );
                }
            }
        }
        if self.state != ProcessState::Failed {
            self.state = ProcessState::Stopped;
        }
        self.last_exit
    }

    fn record_exit(&mut self, report: ExitReport) {
        self.last_exit = Some(report);
        if !self.kill_sent {
            self.state = ProcessState::Exited;
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if !self.kill_sent && self.last_exit.is_none() {
            self.handle.kill();
        }
    }
}
