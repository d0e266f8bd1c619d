use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use engine_contract::{now_millis, Message, Role, TokenUsage};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const SESSION_FORMAT_VERSION: u32 = 1;
pub const DEFAULT_TITLE: &str = "new chat";

const MAX_ID_LEN: usize = 64;

static LAST_ISSUED_ID: AtomicI64 = AtomicI64::new(0);

/// Opaque session identifier.
///
/// Generated ids are epoch milliseconds, strictly increasing within one
/// process. Ids are also file names, so only ASCII alphanumerics, `-` and `_`
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        let now = now_millis();
        let mut last = LAST_ISSUED_ID.load(AtomicOrdering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match LAST_ISSUED_ID.compare_exchange_weak(
                last,
                next,
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return Self(next.to_string()),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Millisecond timestamp encoded in the id; non-numeric ids sort oldest.
    pub fn recency_key(&self) -> i64 {
        self.0.parse().unwrap_or(0)
    }

    pub fn created_at(&self) -> Option<OffsetDateTime> {
        let millis = self.0.parse::<i128>().ok()?;
        OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).ok()
    }

    pub fn created_at_rfc3339(&self) -> Option<String> {
        self.created_at()?.format(&Rfc3339).ok()
    }
}

impl Ord for SessionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.recency_key()
            .cmp(&other.recency_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid session id '{value}'"))
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, alias = "tokens")]
    pub usage: TokenUsage,
}

impl Session {
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_owned(),
            messages: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    #[must_use]
    pub fn fresh() -> Self {
        Self::new(SessionId::generate())
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            usage: self.usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub usage: TokenUsage,
}

/// On-disk record: one file per session.
#[derive(Debug, Serialize)]
pub(crate) struct SessionFileRef<'a> {
    pub version: u32,
    #[serde(flatten)]
    pub session: &'a Session,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionFile {
    pub version: u32,
    #[serde(flatten)]
    pub session: Session,
}
