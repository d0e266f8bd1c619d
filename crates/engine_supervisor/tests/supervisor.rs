use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_supervisor::{
    AttemptFailure, Connector, Credentials, EngineHandle, EngineSupervisor, ExitNotice, ExitReport,
    LaunchSpec, Launcher, SupervisorConfig, SupervisorError, SupervisorState,
};
use futures_util::future::BoxFuture;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Launch {
        pid: u32,
        runtime: String,
        workspace: PathBuf,
    },
    Kill {
        pid: u32,
    },
}

struct FakeEngine {
    pid: u32,
    spec: LaunchSpec,
    exit_tx: watch::Sender<Option<ExitReport>>,
    exits: mpsc::UnboundedSender<ExitNotice>,
}

impl FakeEngine {
    fn finish(&self, report: ExitReport) {
        let mut first = false;
        self.exit_tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(report);
            first = true;
            true
        });
        if first {
            let _ = self.exits.send(ExitNotice {
                pid: Some(self.pid),
                runtime: self.spec.program.clone(),
                workspace: self.spec.workspace.clone(),
                uptime: Duration::ZERO,
                report,
            });
        }
    }

    fn is_alive(&self) -> bool {
        self.exit_tx.borrow().is_none()
    }
}

/// Records launches and kills; kills take effect immediately.
#[derive(Default)]
struct FakeLauncher {
    events: Mutex<Vec<Event>>,
    engines: Mutex<Vec<Arc<FakeEngine>>>,
    missing: HashSet<String>,
    crash_on_launch: HashSet<String>,
    next_pid: AtomicU32,
}

impl FakeLauncher {
    fn with_missing(runtimes: &[&str]) -> Self {
        Self {
            missing: runtimes.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    fn kills_of(&self, pid: u32) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Kill { pid: killed } if *killed == pid))
            .count()
    }

    fn live_engines(&self) -> usize {
        self.engines
            .lock()
            .expect("engines lock")
            .iter()
            .filter(|engine| engine.is_alive())
            .count()
    }

    fn engine(&self, index: usize) -> Arc<FakeEngine> {
        Arc::clone(&self.engines.lock().expect("engines lock")[index])
    }

    fn launched(&self) -> usize {
        self.engines.lock().expect("engines lock").len()
    }
}

struct FakeHandle {
    engine: Arc<FakeEngine>,
    launcher: Arc<FakeLauncher>,
}

impl EngineHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.engine.pid)
    }

    fn kill(&mut self) {
        self.launcher
            .events
            .lock()
            .expect("events lock")
            .push(Event::Kill {
                pid: self.engine.pid,
            });
        self.engine.finish(ExitReport {
            code: None,
            signal: Some(9),
            requested: true,
        });
    }

    fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>> {
        self.engine.exit_tx.subscribe()
    }
}

/// Launcher seam handed to the supervisor; shares state with the test.
struct SharedLauncher(Arc<FakeLauncher>);

impl Launcher for SharedLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> io::Result<Box<dyn EngineHandle>> {
        let launcher = &self.0;
        if launcher.missing.contains(&spec.program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", spec.program),
            ));
        }

        let pid = launcher.next_pid.fetch_add(1, Ordering::SeqCst) + 100;
        let (exit_tx, _) = watch::channel(None);
        let engine = Arc::new(FakeEngine {
            pid,
            spec: spec.clone(),
            exit_tx,
            exits,
        });
        launcher.events.lock().expect("events lock").push(Event::Launch {
            pid,
            runtime: spec.program.clone(),
            workspace: spec.workspace.clone(),
        });
        launcher
            .engines
            .lock()
            .expect("engines lock")
            .push(Arc::clone(&engine));

        if launcher.crash_on_launch.contains(&spec.program) {
            engine.finish(ExitReport {
                code: Some(1),
                signal: None,
                requested: false,
            });
        }

        Ok(Box::new(FakeHandle {
            engine,
            launcher: Arc::clone(launcher),
        }))
    }
}

#[derive(Clone)]
struct SwitchConnector(Arc<AtomicBool>);

impl SwitchConnector {
    fn ready() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn never() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
}

impl Connector for SwitchConnector {
    fn connect(&self, _addr: SocketAddr) -> BoxFuture<'_, io::Result<()>> {
        let ready = self.0.load(Ordering::SeqCst);
        Box::pin(async move {
            if ready {
                Ok(())
            } else {
                Err(io::ErrorKind::ConnectionRefused.into())
            }
        })
    }
}

fn config(runtimes: &[&str]) -> SupervisorConfig {
    SupervisorConfig::default().with_runtimes(runtimes.iter().copied())
}

fn supervisor(
    launcher: &Arc<FakeLauncher>,
    connector: SwitchConnector,
    runtimes: &[&str],
) -> EngineSupervisor<SwitchConnector> {
    EngineSupervisor::with_parts(
        config(runtimes),
        Arc::new(SharedLauncher(Arc::clone(launcher))),
        connector,
    )
}

#[tokio::test]
async fn workspace_switch_kills_previous_engine_once_before_spawning() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);

    supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect("first engine should start");
    supervisor
        .ensure_running(Path::new("/work/b"))
        .await
        .expect("second engine should start");

    assert_eq!(
        launcher.events(),
        vec![
            Event::Launch {
                pid: 100,
                runtime: "python3".to_owned(),
                workspace: PathBuf::from("/work/a"),
            },
            Event::Kill { pid: 100 },
            Event::Launch {
                pid: 101,
                runtime: "python3".to_owned(),
                workspace: PathBuf::from("/work/b"),
            },
        ]
    );
    assert_eq!(launcher.live_engines(), 1);
    assert_eq!(supervisor.state(), SupervisorState::Ready);
}

#[tokio::test]
async fn same_workspace_reuses_ready_engine() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);
    let workspace = Path::new("/work/a");

    let first = supervisor
        .ensure_running(workspace)
        .await
        .expect("engine should start");
    let second = supervisor
        .ensure_running(workspace)
        .await
        .expect("engine should stay ready");

    assert_eq!(first, second);
    assert_eq!(launcher.launched(), 1);
    assert_eq!(supervisor.endpoint(), Some(first));
    assert_eq!(
        launcher.engine(0).spec.env.get("TETSUO_WORKSPACE").map(String::as_str),
        Some("/work/a")
    );
    assert_eq!(
        launcher.engine(0).spec.args.last().map(String::as_str),
        Some(first.port.to_string().as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn never_ready_engines_exhaust_candidates_without_orphans() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::never(), &["python3", "python"]);

    let error = supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect_err("no engine should become ready");

    let SupervisorError::EngineUnavailable { attempts, .. } = error else {
        panic!("expected EngineUnavailable");
    };
    assert_eq!(
        attempts
            .iter()
            .map(|attempt| (attempt.runtime.as_str(), attempt.failure.clone()))
            .collect::<Vec<_>>(),
        vec![
            (
                "python3",
                AttemptFailure::ProbeTimedOut(Duration::from_millis(15_000))
            ),
            (
                "python",
                AttemptFailure::ProbeTimedOut(Duration::from_millis(15_000))
            ),
        ]
    );
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_eq!(supervisor.endpoint(), None);
    assert_eq!(launcher.live_engines(), 0);
    assert_eq!(launcher.kills_of(100), 1);
    assert_eq!(launcher.kills_of(101), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_supervisor_waits_for_restart() {
    let launcher = Arc::new(FakeLauncher::default());
    let connector = SwitchConnector::never();
    let mut supervisor = supervisor(&launcher, connector.clone(), &["python3", "python"]);
    let workspace = Path::new("/work/a");

    supervisor
        .ensure_running(workspace)
        .await
        .expect_err("no engine should become ready");
    assert_eq!(launcher.launched(), 2);

    connector.0.store(true, Ordering::SeqCst);
    let error = supervisor
        .ensure_running(workspace)
        .await
        .expect_err("exhaustion sticks until restart");
    let SupervisorError::EngineUnavailable { attempts, .. } = error else {
        panic!("expected EngineUnavailable");
    };
    assert_eq!(attempts.len(), 2);
    assert_eq!(launcher.launched(), 2, "no new spawns while failed");
    assert_eq!(supervisor.state(), SupervisorState::Failed);

    supervisor
        .restart(workspace)
        .await
        .expect("restart should start a fresh engine");
    assert_eq!(launcher.launched(), 3);
    assert_eq!(supervisor.state(), SupervisorState::Ready);
}

#[tokio::test(start_paused = true)]
async fn exhausted_supervisor_still_starts_for_another_workspace() {
    let launcher = Arc::new(FakeLauncher::default());
    let connector = SwitchConnector::never();
    let mut supervisor = supervisor(&launcher, connector.clone(), &["python3"]);

    supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect_err("no engine should become ready");

    connector.0.store(true, Ordering::SeqCst);
    supervisor
        .ensure_running(Path::new("/work/b"))
        .await
        .expect("a different workspace gets a fresh attempt");
    assert_eq!(launcher.launched(), 2);
    assert_eq!(supervisor.state(), SupervisorState::Ready);
}

#[tokio::test]
async fn replaced_credentials_reach_the_next_engine_only() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);

    supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect("first engine should start");
    supervisor.set_credentials(Credentials::default().with("XAI_API_KEY", "key-b"));
    supervisor
        .ensure_running(Path::new("/work/b"))
        .await
        .expect("second engine should start");

    assert_eq!(launcher.engine(0).spec.env.get("XAI_API_KEY"), None);
    assert_eq!(
        launcher.engine(1).spec.env.get("XAI_API_KEY").map(String::as_str),
        Some("key-b")
    );
}

#[tokio::test]
async fn spawn_error_falls_through_to_next_candidate() {
    let launcher = Arc::new(FakeLauncher::with_missing(&["python3"]));
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3", "python"]);

    supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect("fallback runtime should start");

    assert_eq!(launcher.launched(), 1);
    assert_eq!(
        supervisor.current().map(|process| process.runtime()),
        Some("python")
    );
}

#[tokio::test]
async fn missing_runtimes_report_install_guidance() {
    let launcher = Arc::new(FakeLauncher::with_missing(&["python3", "python"]));
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3", "python"]);

    let error = supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect_err("nothing can spawn");

    assert!(error.user_message().contains("runtime not found"));
    assert_eq!(supervisor.state(), SupervisorState::Failed);
}

#[tokio::test(start_paused = true)]
async fn engine_exiting_during_probe_moves_to_next_candidate() {
    let launcher = Arc::new(FakeLauncher {
        crash_on_launch: ["python3".to_owned()].into_iter().collect(),
        ..FakeLauncher::default()
    });
    let mut supervisor = supervisor(&launcher, SwitchConnector::never(), &["python3", "python"]);

    let error = supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect_err("second candidate never becomes ready");

    let SupervisorError::EngineUnavailable { attempts, .. } = error else {
        panic!("expected EngineUnavailable");
    };
    assert!(matches!(
        attempts[0].failure,
        AttemptFailure::ExitedDuringProbe(ExitReport { code: Some(1), .. })
    ));
    assert_eq!(launcher.kills_of(100), 0, "a crashed engine needs no kill");
    assert_eq!(launcher.kills_of(101), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);

    supervisor
        .ensure_running(Path::new("/work/a"))
        .await
        .expect("engine should start");
    supervisor.shutdown().await;
    supervisor.shutdown().await;

    assert_eq!(launcher.kills_of(100), 1);
    assert_eq!(launcher.live_engines(), 0);
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert_eq!(supervisor.endpoint(), None);
}

#[tokio::test]
async fn restart_replaces_engine_for_same_workspace() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);
    let workspace = Path::new("/work/a");

    supervisor
        .ensure_running(workspace)
        .await
        .expect("engine should start");
    supervisor
        .restart(workspace)
        .await
        .expect("restart should succeed");

    assert_eq!(launcher.launched(), 2);
    assert_eq!(launcher.kills_of(100), 1);
    assert_eq!(launcher.live_engines(), 1);
}

#[tokio::test]
async fn exited_engine_is_replaced_and_reported() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);
    let mut notices = supervisor
        .take_exit_notices()
        .expect("exit notices should be available once");
    assert!(supervisor.take_exit_notices().is_none());
    let workspace = Path::new("/work/a");

    supervisor
        .ensure_running(workspace)
        .await
        .expect("engine should start");
    launcher.engine(0).finish(ExitReport {
        code: Some(0),
        signal: None,
        requested: false,
    });

    assert_eq!(supervisor.endpoint(), None);
    assert!(supervisor.poll_exit().is_some());
    assert_eq!(supervisor.state(), SupervisorState::Exited);

    supervisor
        .ensure_running(workspace)
        .await
        .expect("a fresh engine should start");
    assert_eq!(launcher.launched(), 2);
    assert_eq!(launcher.kills_of(100), 0);

    let notice = notices.recv().await.expect("exit notice");
    assert_eq!(notice.pid, Some(100));
    assert!(!notice.report.requested);
}

#[tokio::test]
async fn at_most_one_engine_is_live_across_operations() {
    let launcher = Arc::new(FakeLauncher::default());
    let mut supervisor = supervisor(&launcher, SwitchConnector::ready(), &["python3"]);

    for workspace in ["/a", "/b", "/b", "/a"] {
        supervisor
            .ensure_running(Path::new(workspace))
            .await
            .expect("engine should start");
        assert_eq!(launcher.live_engines(), 1);
    }
    supervisor
        .restart(Path::new("/c"))
        .await
        .expect("restart should succeed");
    assert_eq!(launcher.live_engines(), 1);
    supervisor.shutdown().await;
    assert_eq!(launcher.live_engines(), 0);

    for pid in 100..104 {
        assert_eq!(launcher.kills_of(pid), 1, "pid {pid}");
    }
}
