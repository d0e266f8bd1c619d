//! Line-mode chat loop: supervisor -> client -> controller -> store.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use chat_controller::{
    parse_slash_command, ChatController, ChatTransport, ControllerError, Persistence,
    SlashCommand, TurnCanceller, TurnOutcome, TurnStatus, HELP_TEXT,
};
use engine_client::EngineClient;
use engine_contract::{EngineEndpoint, StreamEvent};
use engine_supervisor::{EngineSupervisor, ExitNotice, SupervisorState};
use session_store::{session_root, Session, SessionStore};
use tokio::sync::mpsc;

use crate::config::{validate_workspace, CredentialSources, HostConfig};
use crate::recent::{self, RecentWorkspaces};
use crate::sessions;

const STORE_UNAVAILABLE: &str = "session storage is unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// What a line typed while a reply streams amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interjection {
    Cancel,
    Ignore,
    Busy,
}

enum Turn<'a> {
    Send(&'a str),
    Retry,
    Regenerate,
}

struct InteractiveHost {
    workspace: PathBuf,
    credentials: CredentialSources,
    recent: RecentWorkspaces,
    supervisor: EngineSupervisor,
    controller: ChatController,
    endpoint: Option<EngineEndpoint>,
    degraded_reported: bool,
    input: mpsc::UnboundedReceiver<String>,
}

pub async fn run(config: HostConfig) -> anyhow::Result<()> {
    let mut supervisor = EngineSupervisor::new(config.supervisor.clone());
    if let Some(notices) = supervisor.take_exit_notices() {
        tokio::spawn(log_exit_notices(notices));
    }

    let endpoint = match supervisor.ensure_running(&config.workspace).await {
        Ok(endpoint) => endpoint,
        Err(error) => {
            eprintln!("{}", error.user_message());
            return Err(error.into());
        }
    };
    let controller = open_controller(&config, connect(&endpoint)?);
    let (input_tx, input) = mpsc::unbounded_channel();
    spawn_input_reader(input_tx)?;

    let mut host = InteractiveHost {
        recent: recent::remember_workspace(&config.data_dir, &config.workspace),
        workspace: config.workspace.clone(),
        credentials: config.credentials.clone(),
        supervisor,
        controller,
        endpoint: Some(endpoint),
        degraded_reported: false,
        input,
    };
    host.print_banner();

    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel();
    tokio::spawn(watch_interrupts(host.controller.canceller(), quit_tx));

    loop {
        prompt();
        let line = tokio::select! {
            line = host.input.recv() => line,
            _ = quit_rx.recv() => None,
        };
        let Some(line) = line else {
            break;
        };
        if host.handle_line(&line).await == Flow::Quit {
            break;
        }
    }

    host.supervisor.shutdown().await;
    Ok(())
}

impl InteractiveHost {
    async fn handle_line(&mut self, line: &str) -> Flow {
        match parse_slash_command(line) {
            Some(command) => self.handle_command(command).await,
            None => {
                if !line.trim().is_empty() {
                    self.run_turn(Turn::Send(line)).await;
                }
                Flow::Continue
            }
        }
    }

    async fn handle_command(&mut self, command: SlashCommand) -> Flow {
        match command {
            SlashCommand::Help => println!("{HELP_TEXT}"),
            SlashCommand::New => {
                self.controller.new_session();
                println!("started a new session");
            }
            SlashCommand::Sessions => {
                let current = self.controller.session().id.clone();
                let written = self.controller.with_store(|store| {
                    sessions::write_session_list(store, Some(&current), &mut io::stdout().lock())
                });
                report_store_result(written.map(|result| result.map_err(anyhow::Error::from)));
            }
            SlashCommand::Open(raw) => match sessions::parse_id(&raw) {
                Ok(id) => match self.controller.open_session(&id) {
                    Ok(session) => print_transcript(session),
                    Err(error) => eprintln!("{error}"),
                },
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Delete(raw) => match sessions::parse_id(&raw) {
                Ok(id) => match self.controller.delete_session(&id) {
                    Ok(true) => println!(
                        "deleted {id}; now in {:?}",
                        self.controller.session().title
                    ),
                    Ok(false) => println!("no session {id}"),
                    Err(error) => eprintln!("{error}"),
                },
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Search(query) => {
                let written = self.controller.with_store(|store| {
                    sessions::write_search_results(store, &query, &mut io::stdout().lock())
                });
                report_store_result(written.map(|result| result.map_err(anyhow::Error::from)));
            }
            SlashCommand::Export(path) => {
                let exported = self
                    .controller
                    .with_store(|store| sessions::export_to(store, &path));
                if let Some(Ok(count)) = &exported {
                    println!("exported {count} session(s) to {}", path.display());
                }
                report_store_result(exported.map(|result| result.map(|_| ())));
            }
            SlashCommand::Import(path) => {
                let imported = self
                    .controller
                    .with_store(|store| sessions::import_from(store, &path));
                if let Some(Ok(report)) = &imported {
                    println!("{}", sessions::describe_import(report));
                }
                report_store_result(imported.map(|result| result.map(|_| ())));
            }
            SlashCommand::Workspace(path) => match validate_workspace(&path) {
                Ok(workspace) => self.switch_workspace(workspace).await,
                Err(error) => eprintln!("{error}"),
            },
            SlashCommand::Workspaces => {
                let current = Some(self.workspace.as_path());
                let written = recent::write_recent(&self.recent, current, &mut io::stdout().lock());
                if let Err(error) = written {
                    eprintln!("{error}");
                }
            }
            SlashCommand::Restart => {
                self.endpoint = None;
                self.supervisor
                    .set_credentials(self.credentials.for_workspace(&self.workspace));
                match self.supervisor.restart(&self.workspace).await {
                    Ok(endpoint) => {
                        if self.adopt_endpoint(endpoint) {
                            println!("engine restarted on {endpoint}");
                        }
                    }
                    Err(error) => eprintln!("{}", error.user_message()),
                }
            }
            SlashCommand::Retry => self.run_turn(Turn::Retry).await,
            SlashCommand::Regenerate => self.run_turn(Turn::Regenerate).await,
            SlashCommand::Cancel => {
                if !self.controller.canceller().cancel() {
                    println!("no reply in progress");
                }
            }
            SlashCommand::Quit => return Flow::Quit,
            SlashCommand::MissingArgument { command, argument } => {
                eprintln!("usage: {command} <{argument}>");
            }
            SlashCommand::Unknown(name) => eprintln!("unknown command {name}; try /help"),
        }
        Flow::Continue
    }

    /// Streams one turn while still reading input, so `/cancel` typed
    /// mid-reply stops it.
    async fn run_turn(&mut self, turn: Turn<'_>) {
        if !self.ensure_engine().await {
            return;
        }
        let canceller = self.controller.canceller();
        let result = {
            let controller = &mut self.controller;
            let input = &mut self.input;
            let pending = async move {
                match turn {
                    Turn::Send(text) => controller.send(text, &mut print_event).await,
                    Turn::Retry => controller.retry_last(&mut print_event).await,
                    Turn::Regenerate => controller.regenerate(&mut print_event).await,
                }
            };
            tokio::pin!(pending);

            let mut input_open = true;
            loop {
                tokio::select! {
                    result = &mut pending => break result,
                    line = input.recv(), if input_open => match line.as_deref().map(interjection) {
                        Some(Interjection::Cancel) => {
                            if canceller.cancel() {
                                tracing::info!("cancelling in-flight reply");
                            }
                        }
                        Some(Interjection::Busy) => {
                            eprintln!("\na reply is streaming; /cancel or Ctrl-C stops it");
                        }
                        Some(Interjection::Ignore) => {}
                        None => input_open = false,
                    },
                }
            }
        };
        self.report_turn(result);
    }

    /// Points the host at `workspace`: fresh rc credentials, recent list,
    /// then an engine for it.
    async fn switch_workspace(&mut self, workspace: PathBuf) {
        self.supervisor
            .set_credentials(self.credentials.for_workspace(&workspace));
        self.workspace = workspace;
        if let Err(error) = self.recent.record(&self.workspace) {
            tracing::warn!(%error, "could not update recent workspaces");
        }
        if self.ensure_engine().await {
            println!("engine ready for {}", self.workspace.display());
        }
    }

    /// Makes sure a ready engine serves the current workspace, replacing a
    /// crashed one. Returns `false` after printing why it could not.
    async fn ensure_engine(&mut self) -> bool {
        match self.supervisor.ensure_running(&self.workspace).await {
            Ok(endpoint) => self.adopt_endpoint(endpoint),
            Err(error) => {
                eprintln!("{}", error.user_message());
                if self.supervisor.state() == SupervisorState::Failed {
                    eprintln!("use /restart or /workspace <path> to try again");
                }
                false
            }
        }
    }

    fn adopt_endpoint(&mut self, endpoint: EngineEndpoint) -> bool {
        if self.endpoint == Some(endpoint) {
            return true;
        }
        match connect(&endpoint) {
            Ok(transport) => {
                self.controller.set_transport(transport);
                self.endpoint = Some(endpoint);
                true
            }
            Err(error) => {
                eprintln!("{error:#}");
                false
            }
        }
    }

    fn report_turn(&mut self, result: Result<TurnOutcome, ControllerError>) {
        match result {
            Ok(outcome) => {
                println!();
                if let Some(note) = describe_outcome(&outcome) {
                    eprintln!("{note}");
                }
            }
            Err(error) => eprintln!("{error}"),
        }

        match self.controller.persistence() {
            Persistence::Degraded { reason } if !self.degraded_reported => {
                eprintln!("warning: this session is no longer being saved ({reason})");
                self.degraded_reported = true;
            }
            Persistence::Durable => self.degraded_reported = false,
            Persistence::Degraded { .. } => {}
        }
    }

    fn print_banner(&self) {
        let session = self.controller.session();
        println!("workspace: {}", self.workspace.display());
        if let Some(endpoint) = self.endpoint {
            println!("engine:    {endpoint}");
        }
        println!(
            "session:   {} ({} messages)",
            session.title,
            session.messages.len()
        );
        if let Persistence::Degraded { reason } = self.controller.persistence() {
            println!("sessions will not be saved: {reason}");
        }
        println!("type /help for commands, Ctrl-C cancels a reply");
    }
}

/// Short status line printed after a turn, if it needs one.
fn describe_outcome(outcome: &TurnOutcome) -> Option<String> {
    match outcome.status {
        TurnStatus::Completed if outcome.usage.is_zero() => None,
        TurnStatus::Completed => Some(format!(
            "[{} tokens: {} prompt, {} completion]",
            outcome.usage.total, outcome.usage.prompt, outcome.usage.completion
        )),
        TurnStatus::Failed => Some(format!(
            "error: {} (/retry to resend)",
            outcome.error.as_deref().unwrap_or("the reply failed")
        )),
        TurnStatus::Cancelled => Some("[cancelled]".to_owned()),
    }
}

fn interjection(line: &str) -> Interjection {
    if line.trim().is_empty() {
        return Interjection::Ignore;
    }
    match parse_slash_command(line) {
        Some(SlashCommand::Cancel) => Interjection::Cancel,
        _ => Interjection::Busy,
    }
}

/// Reads stdin on its own thread so a blocked read never holds up shutdown.
fn spawn_input_reader(lines: mpsc::UnboundedSender<String>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if lines.send(line).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "reading input failed");
                        break;
                    }
                }
            }
        })
        .context("starting input reader")?;
    Ok(())
}

fn open_controller(config: &HostConfig, transport: Arc<dyn ChatTransport>) -> ChatController {
    let root = session_root(&config.data_dir);
    match SessionStore::open(&root) {
        Ok(store) => ChatController::new(
            transport,
            Arc::new(Mutex::new(store)),
            config.settings.clone(),
        ),
        Err(error) => {
            tracing::warn!(%error, "session store unavailable; running in memory");
            ChatController::in_memory(transport, config.settings.clone(), error.to_string())
        }
    }
}

fn connect(endpoint: &EngineEndpoint) -> anyhow::Result<Arc<dyn ChatTransport>> {
    let client = EngineClient::for_endpoint(endpoint)
        .with_context(|| format!("creating client for {endpoint}"))?;
    Ok(Arc::new(client))
}

fn print_event(event: &StreamEvent) {
    let mut stdout = io::stdout().lock();
    let written = match event {
        StreamEvent::Content { text } => write!(stdout, "{text}"),
        StreamEvent::ToolCall { name, .. } => write!(stdout, "\n[{name}] "),
        StreamEvent::ToolResult { name, .. } => writeln!(stdout, "[{name} done]"),
        _ => Ok(()),
    };
    if let Err(error) = written.and_then(|()| stdout.flush()) {
        tracing::debug!(%error, "stdout write failed");
    }
}

fn print_transcript(session: &Session) {
    println!("== {} ==", session.title);
    for message in &session.messages {
        let suffix = if message.cancelled { " [cancelled]" } else { "" };
        println!("{}: {}{suffix}", message.role, message.content);
    }
}

fn report_store_result(result: Option<anyhow::Result<()>>) {
    match result {
        Some(Ok(())) => {}
        Some(Err(error)) => eprintln!("{error:#}"),
        None => eprintln!("{STORE_UNAVAILABLE}"),
    }
}

fn prompt() {
    let mut stdout = io::stdout().lock();
    if let Err(error) = write!(stdout, "> ").and_then(|()| stdout.flush()) {
        tracing::debug!(%error, "prompt write failed");
    }
}

async fn watch_interrupts(canceller: TurnCanceller, quit: mpsc::UnboundedSender<()>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if canceller.cancel() {
            tracing::info!("cancelling in-flight reply");
        } else if quit.send(()).is_err() {
            break;
        }
    }
}

async fn log_exit_notices(mut notices: mpsc::UnboundedReceiver<ExitNotice>) {
    while let Some(notice) = notices.recv().await {
        if notice.report.requested {
            tracing::debug!(pid = ?notice.pid, runtime = %notice.runtime, "engine stopped on request");
        } else {
            tracing::warn!(
                pid = ?notice.pid,
                runtime = %notice.runtime,
                workspace = %notice.workspace.display(),
                uptime_ms = u64::try_from(notice.uptime.as_millis()).unwrap_or(u64::MAX),
                exit = %notice.report,
                "engine exited"
            );
        }
    }
}
