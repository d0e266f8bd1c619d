use std::path::{Path, PathBuf};

use crate::schema::SessionId;

pub const SESSION_DIR: &str = "sessions";
pub const ACTIVE_POINTER_FILE: &str = "active";

#[must_use]
pub fn session_root(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_DIR)
}

#[must_use]
pub fn session_file_name(id: &SessionId) -> String {
    format!("{id}.json")
}

#[must_use]
pub fn active_pointer_path(root: &Path) -> PathBuf {
    root.join(ACTIVE_POINTER_FILE)
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
