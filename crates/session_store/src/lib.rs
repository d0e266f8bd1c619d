mod error;
mod export;
mod paths;
mod schema;
mod search;
mod store;

pub use error::SessionStoreError;
pub use export::{decode_export, encode_export, ImportReport, EXPORT_VERSION};
pub use paths::{active_pointer_path, session_file_name, session_root};
pub use schema::{Session, SessionId, SessionSummary, DEFAULT_TITLE, SESSION_FORMAT_VERSION};
pub use search::{find_spans, SearchHit};
pub use store::SessionStore;
