use std::collections::BTreeMap;

use engine_contract::{Message, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionStoreError;
use crate::schema::{Session, SessionId};

pub const EXPORT_VERSION: u32 = 1;

/// Keyed session body inside an export blob.
#[derive(Debug, Serialize, Deserialize)]
struct SessionBody {
    title: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default, alias = "tokens")]
    usage: TokenUsage,
}

#[derive(Debug, Serialize)]
struct ExportEnvelope {
    version: u32,
    sessions: BTreeMap<String, SessionBody>,
}

/// Outcome of one bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Existing sessions overwritten by an entry with the same id.
    pub replaced: usize,
    /// Entries dropped because their id or body could not be read.
    pub skipped: Vec<String>,
}

/// Serialize sessions as `{"version":1,"sessions":{id:{title,messages,usage}}}`.
pub fn encode_export<'a, I>(sessions: I) -> Result<String, SessionStoreError>
where
    I: IntoIterator<Item = &'a Session>,
{
    let sessions = sessions
        .into_iter()
        .map(|session| {
            (
                session.id.to_string(),
                SessionBody {
                    title: session.title.clone(),
                    messages: session.messages.clone(),
                    usage: session.usage,
                },
            )
        })
        .collect();

    serde_json::to_string_pretty(&ExportEnvelope {
        version: EXPORT_VERSION,
        sessions,
    })
    .map_err(SessionStoreError::ExportSerialize)
}

/// Parse an export blob.
///
/// Accepts the versioned envelope and the bare `{id: {title, messages, tokens}}`
/// map written by older front-ends. Entries that fail to parse are reported
/// in the second element instead of failing the whole import.
pub fn decode_export(blob: &str) -> Result<(Vec<Session>, Vec<String>), SessionStoreError> {
    let value: Value = serde_json::from_str(blob).map_err(SessionStoreError::ExportParse)?;
    let Value::Object(mut root) = value else {
        return Err(SessionStoreError::InvalidExportShape);
    };

    let is_envelope =
        root.contains_key("version") && matches!(root.get("sessions"), Some(Value::Object(_)));
    let entries = if is_envelope {
        let found = root
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
            .unwrap_or(0);
        if found != EXPORT_VERSION {
            return Err(SessionStoreError::UnsupportedExportVersion { found });
        }
        match root.remove("sessions") {
            Some(Value::Object(sessions)) => sessions,
            _ => return Err(SessionStoreError::InvalidExportShape),
        }
    } else {
        root
    };

    Ok(decode_entries(entries))
}

fn decode_entries(entries: Map<String, Value>) -> (Vec<Session>, Vec<String>) {
    let mut sessions = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();

    for (raw_id, body) in entries {
        let Some(id) = SessionId::parse(&raw_id) else {
            tracing::warn!(id = %raw_id, "skipping imported session with invalid id");
            skipped.push(raw_id);
            continue;
        };
        match serde_json::from_value::<SessionBody>(body) {
            Ok(body) => sessions.push(Session {
                id,
                title: body.title,
                messages: body.messages,
                usage: body.usage,
            }),
            Err(error) => {
                tracing::warn!(id = %raw_id, %error, "skipping unreadable imported session");
                skipped.push(raw_id);
            }
        }
    }

    (sessions, skipped)
}
