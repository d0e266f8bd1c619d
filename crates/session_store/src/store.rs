use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;
use crate::export::{decode_export, encode_export, ImportReport};
use crate::paths::{active_pointer_path, session_file_name, temp_path_for};
use crate::schema::{
    Session, SessionFile, SessionFileRef, SessionId, SessionSummary, SESSION_FORMAT_VERSION,
};
use crate::search::{query_matcher, search_session, SearchHit};

/// File-backed session collection.
///
/// Each session lives in `<root>/<id>.json`; `<root>/active` names the
/// session to reopen on the next launch. Writes go through a temporary file
/// and a rename, so a crash never leaves a half-written session behind.
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    sessions: BTreeMap<SessionId, Session>,
    active: Option<SessionId>,
}

impl SessionStore {
    /// Opens (creating if needed) the store rooted at `root`.
    ///
    /// Unreadable session files are skipped with a warning.
    pub fn open(root: &Path) -> Result<Self, SessionStoreError> {
        let root = root.to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|source| SessionStoreError::io("creating session directory", &root, source))?;

        let entries = fs::read_dir(&root)
            .map_err(|source| SessionStoreError::io("listing session directory", &root, source))?;

        let mut sessions = BTreeMap::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| SessionStoreError::io("listing session directory", &root, source))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match read_session_file(&path) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable session file");
                }
            }
        }

        let active = read_active_pointer(&root)?.filter(|id| sessions.contains_key(id));
        tracing::debug!(root = %root.display(), sessions = sessions.len(), "opened session store");

        Ok(Self {
            root,
            sessions,
            active,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn save(&mut self, session: &Session) -> Result<(), SessionStoreError> {
        let path = self.session_path(&session.id);
        let bytes = serde_json::to_vec_pretty(&SessionFileRef {
            version: SESSION_FORMAT_VERSION,
            session,
        })
        .map_err(|source| SessionStoreError::json_serialize(&path, source))?;

        write_atomic(&path, &bytes)?;
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    pub fn load(&self, id: &SessionId) -> Result<Session, SessionStoreError> {
        self.sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionStoreError::not_found(id))
    }

    /// Summaries, most recent first.
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions.values().rev().map(Session::summary).collect()
    }

    pub fn most_recent(&self) -> Option<&SessionId> {
        self.sessions.keys().next_back()
    }

    /// Removes a session; returns whether it existed.
    pub fn delete(&mut self, id: &SessionId) -> Result<bool, SessionStoreError> {
        if self.sessions.remove(id).is_none() {
            return Ok(false);
        }

        let path = self.session_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(SessionStoreError::io("deleting session file", path, source));
            }
        }

        if self.active.as_ref() == Some(id) {
            self.set_active(None)?;
        }
        Ok(true)
    }

    /// Case-insensitive substring search over message content, newest
    /// sessions first. An empty query returns nothing.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let Some(matcher) = query_matcher(query) else {
            return Vec::new();
        };
        self.sessions
            .values()
            .rev()
            .flat_map(|session| search_session(&matcher, session))
            .collect()
    }

    /// Stores every session, overwriting entries with the same id.
    pub fn import_bulk(
        &mut self,
        sessions: Vec<Session>,
    ) -> Result<ImportReport, SessionStoreError> {
        let mut report = ImportReport::default();
        for session in sessions {
            if self.contains(&session.id) {
                report.replaced += 1;
            }
            self.save(&session)?;
            report.imported += 1;
        }
        tracing::info!(imported = report.imported, replaced = report.replaced, "imported sessions");
        Ok(report)
    }

    /// Decodes an export blob (current or legacy shape) and imports it.
    pub fn import_blob(&mut self, blob: &str) -> Result<ImportReport, SessionStoreError> {
        let (sessions, skipped) = decode_export(blob)?;
        let mut report = self.import_bulk(sessions)?;
        report.skipped = skipped;
        Ok(report)
    }

    pub fn export_all(&self) -> Result<String, SessionStoreError> {
        encode_export(self.sessions.values())
    }

    pub fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// Records (or clears) the session to restore on next launch.
    pub fn set_active(&mut self, id: Option<&SessionId>) -> Result<(), SessionStoreError> {
        let path = active_pointer_path(&self.root);
        match id {
            Some(id) => write_atomic(&path, id.as_str().as_bytes())?,
            None => match fs::remove_file(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(SessionStoreError::io("clearing active pointer", path, source));
                }
            },
        }
        self.active = id.cloned();
        Ok(())
    }

    fn session_path(&self, id: &SessionId) -> PathBuf {
        self.root.join(session_file_name(id))
    }
}

fn read_session_file(path: &Path) -> Result<Session, SessionStoreError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| SessionStoreError::io("reading session file", path, source))?;
    let file: SessionFile =
        serde_json::from_str(&raw).map_err(|source| SessionStoreError::json_parse(path, source))?;
    if file.version != SESSION_FORMAT_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: file.version,
            expected: SESSION_FORMAT_VERSION,
        });
    }
    Ok(file.session)
}

fn read_active_pointer(root: &Path) -> Result<Option<SessionId>, SessionStoreError> {
    let path = active_pointer_path(root);
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(SessionId::parse(&raw)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SessionStoreError::io("reading active pointer", path, source)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionStoreError> {
    let temp = temp_path_for(path);
    let mut file = fs::File::create(&temp)
        .map_err(|source| SessionStoreError::io("creating temporary file", &temp, source))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|source| SessionStoreError::io("writing temporary file", &temp, source))?;
    drop(file);

    fs::rename(&temp, path)
        .map_err(|source| SessionStoreError::io("replacing file", path, source))
}
