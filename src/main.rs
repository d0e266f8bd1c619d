use std::io;

use anyhow::Result;
use chat_controller::ChatSettings;
use clap::Parser;
use engine_host::cli::{Cli, Command};
use engine_host::config::{save_settings, EnvConfig, HostConfig};
use engine_host::{interactive, logging, recent, sessions};
use session_store::{session_root, SessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log.as_deref())?;

    let config = HostConfig::resolve(&cli.overrides(), &EnvConfig::from_env())?;
    tracing::debug!(data_dir = %config.data_dir.display(), workspace = %config.workspace.display(), "configuration resolved");

    match &cli.command {
        Some(Command::Recent { clear }) => {
            recent::run_recent(&config.data_dir, *clear, &mut io::stdout().lock())
        }
        Some(command) => {
            let mut store = SessionStore::open(&session_root(&config.data_dir))?;
            sessions::run_command(command, &mut store, &mut io::stdout().lock())
        }
        None => {
            if !config.settings_path().exists() {
                if let Err(error) = save_settings(&config.data_dir, &ChatSettings::default()) {
                    tracing::warn!(%error, "could not write default settings");
                }
            }
            interactive::run(config).await
        }
    }
}
