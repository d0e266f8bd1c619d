//! Store operations shared by the subcommands and the interactive loop.

use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::Path;

use anyhow::Context;
use session_store::{ImportReport, SearchHit, SessionId, SessionStore};

use crate::cli::Command;

const SNIPPET_BEFORE: usize = 40;
const SNIPPET_AFTER: usize = 80;

pub fn write_session_list(
    store: &SessionStore,
    current: Option<&SessionId>,
    out: &mut impl Write,
) -> io::Result<()> {
    let sessions = store.list();
    if sessions.is_empty() {
        return writeln!(out, "no saved sessions");
    }
    for summary in sessions {
        let marker = if current == Some(&summary.id) { '*' } else { ' ' };
        let created = summary
            .id
            .created_at_rfc3339()
            .unwrap_or_else(|| "-".to_owned());
        writeln!(
            out,
            "{marker} {id:<15} {created:<20} {count:>4} msgs  {title}",
            id = summary.id,
            count = summary.message_count,
            title = summary.title,
        )?;
    }
    Ok(())
}

pub fn write_search_results(
    store: &SessionStore,
    query: &str,
    out: &mut impl Write,
) -> io::Result<()> {
    let hits = store.search(query);
    if hits.is_empty() {
        return writeln!(out, "no matches for {query:?}");
    }
    for hit in &hits {
        let Ok(session) = store.load(&hit.session_id) else {
            continue;
        };
        let Some(message) = session.messages.get(hit.message_index) else {
            continue;
        };
        writeln!(
            out,
            "{id} #{index} {role} ({title}): {snippet}",
            id = hit.session_id,
            index = hit.message_index,
            role = hit.role,
            title = hit.title,
            snippet = snippet(&message.content, hit),
        )?;
    }
    Ok(())
}

/// Text around the first match with every match in the window bracketed.
pub fn snippet(content: &str, hit: &SearchHit) -> String {
    let Some(first) = hit.spans.first() else {
        return String::new();
    };
    let start = floor_boundary(content, first.start.saturating_sub(SNIPPET_BEFORE));
    let end = ceil_boundary(content, first.end.saturating_add(SNIPPET_AFTER));

    let window: Vec<Range<usize>> = hit
        .spans
        .iter()
        .filter(|span| span.start >= start && span.end <= end)
        .map(|span| span.start - start..span.end - start)
        .collect();
    let mut text = highlight(&content[start..end], &window).replace('\n', " ");
    if start > 0 {
        text.insert_str(0, "...");
    }
    if end < content.len() {
        text.push_str("...");
    }
    text
}

/// Wraps each byte range in `[` `]`.
pub fn highlight(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = String::with_capacity(text.len() + spans.len() * 2);
    let mut cursor = 0;
    for span in spans {
        out.push_str(&text[cursor..span.start]);
        out.push('[');
        out.push_str(&text[span.clone()]);
        out.push(']');
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

pub fn export_to(store: &SessionStore, path: &Path) -> anyhow::Result<usize> {
    let blob = store.export_all()?;
    fs::write(path, blob).with_context(|| format!("writing {}", path.display()))?;
    Ok(store.len())
}

pub fn import_from(store: &mut SessionStore, path: &Path) -> anyhow::Result<ImportReport> {
    let blob =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(store.import_blob(&blob)?)
}

pub fn describe_import(report: &ImportReport) -> String {
    let mut text = format!(
        "imported {} session(s), {} replaced",
        report.imported, report.replaced
    );
    if !report.skipped.is_empty() {
        text.push_str(&format!(", skipped {}", report.skipped.join(", ")));
    }
    text
}

pub fn parse_id(raw: &str) -> anyhow::Result<SessionId> {
    SessionId::parse(raw).with_context(|| format!("invalid session id {raw:?}"))
}

/// Runs one non-interactive subcommand against the store.
pub fn run_command(
    command: &Command,
    store: &mut SessionStore,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::List => write_session_list(store, store.active(), out)?,
        Command::Search { query } => write_search_results(store, query, out)?,
        Command::Export { path } => {
            let count = export_to(store, path)?;
            writeln!(out, "exported {count} session(s) to {}", path.display())?;
        }
        Command::Import { path } => {
            let report = import_from(store, path)?;
            writeln!(out, "{}", describe_import(&report))?;
        }
        Command::Delete { id } => {
            let id = parse_id(id)?;
            if store.delete(&id)? {
                writeln!(out, "deleted {id}")?;
            } else {
                writeln!(out, "no session {id}")?;
            }
        }
        Command::Recent { .. } => anyhow::bail!("`recent` does not operate on the session store"),
    }
    Ok(())
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
