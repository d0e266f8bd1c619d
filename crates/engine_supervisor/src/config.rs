use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::probe::ProbeConfig;

/// Environment variable that carries the workspace path into the engine.
pub const DEFAULT_WORKSPACE_ENV: &str = "TETSUO_WORKSPACE";
/// Placeholder in [`SupervisorConfig::engine_args`] replaced by the allocated port.
pub const PORT_PLACEHOLDER: &str = "{port}";

const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_millis(15_000);
const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(2_000);

/// Interpreter candidates in preference order for the current platform.
#[must_use]
pub fn default_runtimes() -> Vec<String> {
    let candidates: &[&str] = if cfg!(windows) {
        &["python", "python3", "py"]
    } else {
        &["python3", "python"]
    };
    candidates.iter().map(ToString::to_string).collect()
}

/// Secret environment entries injected into the engine process only.
///
/// `Debug` prints variable names, never values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    entries: BTreeMap<String, String>,
}

impl Credentials {
    pub fn insert(&mut self, variable: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        self.entries.insert(variable.into(), value);
    }

    #[must_use]
    pub fn with(mut self, variable: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(variable, value);
        self
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.entries.get(variable).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub host: IpAddr,
    /// Runtime executables tried in order until one becomes ready.
    pub runtimes: Vec<String>,
    /// Arguments passed to the runtime; `{port}` is substituted.
    pub engine_args: Vec<String>,
    /// Directory holding the engine sources. Used as working directory and
    /// exported as `PYTHONPATH` when set.
    pub engine_dir: Option<PathBuf>,
    pub workspace_env: String,
    pub credentials: Credentials,
    pub readiness_timeout: Duration,
    pub probe: ProbeConfig,
    /// How long teardown waits for a killed engine to exit.
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            runtimes: default_runtimes(),
            engine_args: ["-m", "web.app", "--port", PORT_PLACEHOLDER]
                .iter()
                .map(ToString::to_string)
                .collect(),
            engine_dir: None,
            workspace_env: DEFAULT_WORKSPACE_ENV.to_owned(),
            credentials: Credentials::default(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            probe: ProbeConfig::default(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub fn with_runtimes<I, S>(mut self, runtimes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtimes = runtimes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_engine_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engine_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_engine_dir(mut self, engine_dir: impl Into<PathBuf>) -> Self {
        self.engine_dir = Some(engine_dir.into());
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ProbeConfig) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Engine arguments with the port placeholder filled in.
    pub fn render_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.engine_args
            .iter()
            .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
            .collect()
    }
}
