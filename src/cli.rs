use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CliOverrides;

/// Chat with a local coding engine from the terminal.
#[derive(Parser, Debug)]
#[command(name = "engine-host", version)]
pub struct Cli {
    /// Workspace directory the engine operates on (default: current directory)
    #[arg(long, short = 'w', global = true)]
    pub workspace: Option<PathBuf>,

    /// Data directory for sessions and settings
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `engine_supervisor=trace` (or set ENGINE_HOST_LOG)
    #[arg(long, global = true)]
    pub log: Option<String>,

    /// Directory the engine is launched from
    #[arg(long)]
    pub engine_dir: Option<PathBuf>,

    /// Interpreter to try, in order; repeat for more candidates
    #[arg(long = "runtime")]
    pub runtimes: Vec<String>,

    /// Model name sent with each request
    #[arg(long)]
    pub model: Option<String>,

    /// xAI API key passed to the engine (or set XAI_API_KEY)
    #[arg(long)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List saved sessions, newest first
    List,
    /// Search message content across sessions
    Search { query: String },
    /// Write every session to an export file
    Export { path: PathBuf },
    /// Merge sessions from an export file
    Import { path: PathBuf },
    /// Delete a saved session
    Delete { id: String },
    /// List recently used workspaces, newest first
    Recent {
        /// Forget the list instead of printing it
        #[arg(long)]
        clear: bool,
    },
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            workspace: self.workspace.clone(),
            data_dir: self.data_dir.clone(),
            engine_dir: self.engine_dir.clone(),
            runtimes: self.runtimes.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn subcommands_parse_with_global_flags() {
        let cli = Cli::try_parse_from(["engine-host", "search", "borrow", "--log", "debug"])
            .expect("arguments parse");
        assert_eq!(
            cli.command,
            Some(Command::Search {
                query: "borrow".into()
            })
        );
        assert_eq!(cli.log.as_deref(), Some("debug"));
    }

    #[test]
    fn repeated_runtimes_keep_order() {
        let cli = Cli::try_parse_from([
            "engine-host",
            "--runtime",
            "python3.12",
            "--runtime",
            "python3",
            "-w",
            "/tmp",
        ])
        .expect("arguments parse");
        let overrides = cli.overrides();
        assert_eq!(overrides.runtimes, vec!["python3.12", "python3"]);
        assert_eq!(overrides.workspace, Some(PathBuf::from("/tmp")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn recent_accepts_clear_flag() {
        let cli = Cli::try_parse_from(["engine-host", "recent", "--clear"]).expect("arguments parse");
        assert_eq!(cli.command, Some(Command::Recent { clear: true }));
        let cli = Cli::try_parse_from(["engine-host", "recent"]).expect("arguments parse");
        assert_eq!(cli.command, Some(Command::Recent { clear: false }));
    }
}
