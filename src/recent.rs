//! Most-recently-used workspaces, newest first.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::{read_optional, ConfigError};

pub const RECENT_FILE: &str = "recent_workspaces.json";
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentWorkspaces {
    path: PathBuf,
    entries: Vec<PathBuf>,
}

impl RecentWorkspaces {
    /// Reads `<data_dir>/recent_workspaces.json`; a missing or unreadable
    /// file is an empty list.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(RECENT_FILE);
        let parsed: Result<Option<Vec<PathBuf>>, ConfigError> =
            read_optional(&path).and_then(|raw| {
                raw.map(|raw| {
                    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })
                })
                .transpose()
            });
        let mut entries = match parsed {
            Ok(entries) => entries.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, "ignoring recent workspaces");
                Vec::new()
            }
        };
        entries.truncate(RECENT_LIMIT);
        Self { path, entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves `workspace` to the front and saves the list.
    pub fn record(&mut self, workspace: &Path) -> Result<(), ConfigError> {
        self.entries.retain(|entry| entry != workspace);
        self.entries.insert(0, workspace.to_path_buf());
        self.entries.truncate(RECENT_LIMIT);
        self.save()
    }

    pub fn clear(&mut self) -> Result<(), ConfigError> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.entries).map_err(ConfigError::Encode)?;
        fs::write(&self.path, bytes).map_err(write_error)
    }
}

/// Records `workspace`, logging instead of failing when the list can't be saved.
pub fn remember_workspace(data_dir: &Path, workspace: &Path) -> RecentWorkspaces {
    let mut recent = RecentWorkspaces::load(data_dir);
    if let Err(error) = recent.record(workspace) {
        tracing::warn!(%error, "could not update recent workspaces");
    }
    recent
}

pub fn write_recent(
    recent: &RecentWorkspaces,
    current: Option<&Path>,
    out: &mut impl Write,
) -> io::Result<()> {
    if recent.is_empty() {
        return writeln!(out, "no recent workspaces");
    }
    for (index, workspace) in recent.entries().iter().enumerate() {
        let marker = if current == Some(workspace.as_path()) { '*' } else { ' ' };
        writeln!(out, "{marker} {:>2}  {}", index + 1, workspace.display())?;
    }
    Ok(())
}

/// The `recent` subcommand.
pub fn run_recent(data_dir: &Path, clear: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let mut recent = RecentWorkspaces::load(data_dir);
    if clear {
        recent.clear()?;
        writeln!(out, "cleared recent workspaces")?;
    } else {
        write_recent(&recent, None, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::{run_recent, write_recent, RecentWorkspaces, RECENT_FILE, RECENT_LIMIT};

    #[test]
    fn record_moves_to_front_and_caps_the_list() {
        let data = tempfile::tempdir().expect("data dir");
        let mut recent = RecentWorkspaces::load(data.path());
        for index in 0..12 {
            recent
                .record(Path::new(&format!("/work/{index}")))
                .expect("recorded");
        }
        recent.record(Path::new("/work/5")).expect("recorded");

        let reloaded = RecentWorkspaces::load(data.path());
        assert_eq!(reloaded.entries().len(), RECENT_LIMIT);
        assert_eq!(reloaded.entries()[0], PathBuf::from("/work/5"));
        assert_eq!(reloaded.entries()[1], PathBuf::from("/work/11"));
        assert_eq!(
            reloaded
                .entries()
                .iter()
                .filter(|entry| entry.as_path() == Path::new("/work/5"))
                .count(),
            1
        );
        assert!(!reloaded.entries().contains(&PathBuf::from("/work/1")));
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_clear_persists() {
        let data = tempfile::tempdir().expect("data dir");
        fs::write(data.path().join(RECENT_FILE), "{not json").expect("written");
        let mut recent = RecentWorkspaces::load(data.path());
        assert!(recent.is_empty());

        recent.record(Path::new("/work/a")).expect("recorded");
        recent.clear().expect("cleared");
        assert!(RecentWorkspaces::load(data.path()).is_empty());
    }

    #[test]
    fn listing_marks_the_current_workspace() {
        let data = tempfile::tempdir().expect("data dir");
        let mut recent = RecentWorkspaces::load(data.path());
        recent.record(Path::new("/work/a")).expect("recorded");
        recent.record(Path::new("/work/b")).expect("recorded");

        let mut out = Vec::new();
        write_recent(&recent, Some(Path::new("/work/a")), &mut out).expect("written");
        assert_eq!(
            String::from_utf8(out).expect("utf-8"),
            "   1  /work/b\n*  2  /work/a\n"
        );
    }

    #[test]
    fn recent_subcommand_prints_and_clears() {
        let data = tempfile::tempdir().expect("data dir");
        let mut out = Vec::new();
        run_recent(data.path(), false, &mut out).expect("listed");
        assert_eq!(String::from_utf8(out).expect("utf-8"), "no recent workspaces\n");

        RecentWorkspaces::load(data.path())
            .record(Path::new("/work/a"))
            .expect("recorded");
        let mut out = Vec::new();
        run_recent(data.path(), false, &mut out).expect("listed");
        assert_eq!(String::from_utf8(out).expect("utf-8"), "   1  /work/a\n");

        let mut out = Vec::new();
        run_recent(data.path(), true, &mut out).expect("cleared");
        assert!(RecentWorkspaces::load(data.path()).is_empty());
    }
}
