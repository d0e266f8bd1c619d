//! Host configuration.
//!
//! Values are layered, later layers winning: built-in defaults, the JSON
//! config file in the data directory, environment variables, the workspace
//! `.tetsuorc`, then command-line flags. Provider keys end up in
//! [`Credentials`] and are only ever passed to the engine process.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chat_controller::ChatSettings;
use engine_supervisor::{Credentials, SupervisorConfig};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const RC_FILE: &str = ".tetsuorc";

pub const XAI_KEY_VAR: &str = "XAI_API_KEY";
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const PROVIDER_KEY_VARS: [&str; 3] = [XAI_KEY_VAR, OPENAI_KEY_VAR, ANTHROPIC_KEY_VAR];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode settings: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("workspace {} is not a directory", .0.display())]
    WorkspaceNotDirectory(PathBuf),
    #[error("could not determine the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
}

/// `<data_dir>/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub engine_dir: Option<PathBuf>,
    pub runtimes: Option<Vec<String>>,
    pub engine_args: Option<Vec<String>>,
    pub readiness_timeout_ms: Option<u64>,
    pub stop_grace_ms: Option<u64>,
    pub xai_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl FileConfig {
    /// A missing file is an empty layer; an unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match read_optional(path)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            None => Ok(Self::default()),
        }
    }
}

/// `ENGINE_HOST_*` and provider key variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub data_dir: Option<PathBuf>,
    pub engine_dir: Option<PathBuf>,
    pub runtimes: Option<Vec<String>>,
    pub readiness_timeout_ms: Option<u64>,
    pub model: Option<String>,
    pub provider_keys: Vec<(String, String)>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str| non_blank(lookup(key));
        Self {
            data_dir: string("ENGINE_HOST_DATA_DIR").map(PathBuf::from),
            engine_dir: string("ENGINE_HOST_ENGINE_DIR").map(PathBuf::from),
            runtimes: string("ENGINE_HOST_RUNTIMES").map(|value| split_list(&value)),
            readiness_timeout_ms: string("ENGINE_HOST_READINESS_MS")
                .and_then(|value| value.trim().parse().ok()),
            model: string("ENGINE_HOST_MODEL"),
            provider_keys: PROVIDER_KEY_VARS
                .iter()
                .filter_map(|var| string(*var).map(|value| ((*var).to_owned(), value)))
                .collect(),
        }
    }
}

/// `<workspace>/.tetsuorc`. Only `api_key` is used; other keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RcFile {
    pub api_key: Option<String>,
}

impl RcFile {
    /// Read failures are logged and treated as an absent file.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join(RC_FILE);
        let parsed: Result<Option<Self>, ConfigError> = read_optional(&path).and_then(|raw| {
            raw.map(|raw| {
                serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })
            })
            .transpose()
        });
        match parsed {
            Ok(Some(rc)) => {
                tracing::info!(path = %path.display(), "loaded workspace rc file");
                rc
            }
            Ok(None) => Self::default(),
            Err(error) => {
                tracing::warn!(%error, "ignoring workspace rc file");
                Self::default()
            }
        }
    }
}

/// Command-line layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub workspace: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub engine_dir: Option<PathBuf>,
    pub runtimes: Vec<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub data_dir: PathBuf,
    pub workspace: PathBuf,
    pub supervisor: SupervisorConfig,
    pub settings: ChatSettings,
    pub credentials: CredentialSources,
}

impl HostConfig {
    pub fn resolve(cli: &CliOverrides, env: &EnvConfig) -> Result<Self, ConfigError> {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| env.data_dir.clone())
            .unwrap_or_else(default_data_dir);
        let workspace = resolve_workspace(cli.workspace.as_deref())?;

        let file = FileConfig::load(&data_dir.join(CONFIG_FILE))?;
        let rc = RcFile::load(&workspace);
        let mut settings = load_settings(&data_dir);
        if let Some(model) = cli.model.clone().or_else(|| env.model.clone()) {
            settings.model = model;
        }

        let mut supervisor = SupervisorConfig::default();
        if let Some(args) = file.engine_args.clone() {
            supervisor = supervisor.with_engine_args(args);
        }
        if let Some(ms) = file.stop_grace_ms {
            supervisor = supervisor.with_stop_grace(Duration::from_millis(ms));
        }
        let runtimes = (!cli.runtimes.is_empty())
            .then(|| cli.runtimes.clone())
            .or_else(|| env.runtimes.clone())
            .or_else(|| file.runtimes.clone());
        if let Some(runtimes) = runtimes {
            supervisor = supervisor.with_runtimes(runtimes);
        }
        let engine_dir = cli
            .engine_dir
            .clone()
            .or_else(|| env.engine_dir.clone())
            .or_else(|| file.engine_dir.clone());
        if let Some(engine_dir) = engine_dir {
            supervisor = supervisor.with_engine_dir(engine_dir);
        }
        if let Some(ms) = env.readiness_timeout_ms.or(file.readiness_timeout_ms) {
            supervisor = supervisor.with_readiness_timeout(Duration::from_millis(ms));
        }
        let credentials = CredentialSources::new(&file, env, cli);
        supervisor = supervisor.with_credentials(credentials.with_rc(&rc));

        Ok(Self {
            data_dir,
            workspace,
            supervisor,
            settings,
            credentials,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

/// Provider keys from every layer but the workspace rc file, which is read
/// again whenever the workspace changes.
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    base: Credentials,
    overrides: Credentials,
}

impl CredentialSources {
    fn new(file: &FileConfig, env: &EnvConfig, cli: &CliOverrides) -> Self {
        let mut base = Credentials::default();
        for (var, value) in [
            (XAI_KEY_VAR, &file.xai_api_key),
            (OPENAI_KEY_VAR, &file.openai_api_key),
            (ANTHROPIC_KEY_VAR, &file.anthropic_api_key),
        ] {
            if let Some(value) = value {
                base.insert(var, value.as_str());
            }
        }
        for (var, value) in &env.provider_keys {
            base.insert(var.as_str(), value.as_str());
        }
        let mut overrides = Credentials::default();
        if let Some(key) = &cli.api_key {
            overrides.insert(XAI_KEY_VAR, key.as_str());
        }
        Self { base, overrides }
    }

    /// Credentials for an engine serving `workspace`.
    pub fn for_workspace(&self, workspace: &Path) -> Credentials {
        self.with_rc(&RcFile::load(workspace))
    }

    fn with_rc(&self, rc: &RcFile) -> Credentials {
        let mut credentials = self.base.clone();
        if credentials.get(XAI_KEY_VAR).is_none() {
            if let Some(key) = &rc.api_key {
                credentials.insert(XAI_KEY_VAR, key.as_str());
            }
        }
        for (var, value) in self.overrides.iter() {
            credentials.insert(var, value);
        }
        credentials
    }
}

fn resolve_workspace(requested: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match requested {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().map_err(ConfigError::CurrentDir)?,
    };
    match fs::canonicalize(&path) {
        Ok(path) if path.is_dir() => Ok(path),
        _ => Err(ConfigError::WorkspaceNotDirectory(path)),
    }
}

/// Checks a workspace path given at runtime, e.g. by `/workspace`.
pub fn validate_workspace(path: &Path) -> Result<PathBuf, ConfigError> {
    resolve_workspace(Some(path))
}

/// Platform data directory for the host, e.g. `~/.local/share/engine-host`.
pub fn default_data_dir() -> PathBuf {
    let base = if cfg!(windows) {
        env::var_os("APPDATA").map(PathBuf::from)
    } else {
        env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
    };
    base.unwrap_or_else(env::temp_dir).join("engine-host")
}

/// Loads `<data_dir>/settings.json`, falling back to defaults.
pub fn load_settings(data_dir: &Path) -> ChatSettings {
    let path = data_dir.join(SETTINGS_FILE);
    let parsed: Result<Option<ChatSettings>, ConfigError> = read_optional(&path).and_then(|raw| {
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })
        })
        .transpose()
    });
    match parsed {
        Ok(settings) => settings.unwrap_or_default(),
        Err(error) => {
            tracing::warn!(%error, "using default chat settings");
            ChatSettings::default()
        }
    }
}

pub fn save_settings(data_dir: &Path, settings: &ChatSettings) -> Result<(), ConfigError> {
    let path = data_dir.join(SETTINGS_FILE);
    let write_error = |source| ConfigError::Write {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(data_dir).map_err(write_error)?;
    let bytes = serde_json::to_vec_pretty(settings).map_err(ConfigError::Encode)?;
    fs::write(&path, bytes).map_err(write_error)
}

pub(crate) fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
