use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Sessions,
    Open(String),
    Delete(String),
    Search(String),
    Export(PathBuf),
    Import(PathBuf),
    Workspace(PathBuf),
    Workspaces,
    Restart,
    Retry,
    Regenerate,
    Cancel,
    Quit,
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/new                start a new session
/sessions           list saved sessions
/open <id>          switch to a saved session
/delete <id>        delete a saved session
/search <text>      search message content
/export <path>      write all sessions to a file
/import <path>      merge sessions from an export file
/workspace <path>   restart the engine in another workspace
/workspaces         list recently used workspaces
/restart            restart the engine
/retry              resend the last message after a failure
/regenerate         replace the last reply
/cancel             stop the reply in progress (also Ctrl-C)
/quit               exit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/sessions" => SlashCommand::Sessions,
        "/open" => with_argument("/open", "id", rest, |id| SlashCommand::Open(id.to_owned())),
        "/delete" => with_argument("/delete", "id", rest, |id| {
            SlashCommand::Delete(id.to_owned())
        }),
        "/search" => with_argument("/search", "text", rest, |query| {
            SlashCommand::Search(query.to_owned())
        }),
        "/export" => with_argument("/export", "path", rest, |path| {
            SlashCommand::Export(PathBuf::from(path))
        }),
        "/import" => with_argument("/import", "path", rest, |path| {
            SlashCommand::Import(PathBuf::from(path))
        }),
        "/workspace" => with_argument("/workspace", "path", rest, |path| {
            SlashCommand::Workspace(PathBuf::from(path))
        }),
        "/workspaces" => SlashCommand::Workspaces,
        "/restart" => SlashCommand::Restart,
        "/retry" => SlashCommand::Retry,
        "/regenerate" => SlashCommand::Regenerate,
        "/cancel" => SlashCommand::Cancel,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_owned()),
    };

    Some(parsed)
}

fn with_argument(
    command: &'static str,
    argument: &'static str,
    rest: &str,
    build: impl FnOnce(&str) -> SlashCommand,
) -> SlashCommand {
    if rest.is_empty() {
        SlashCommand::MissingArgument { command, argument }
    } else {
        build(rest)
    }
}
