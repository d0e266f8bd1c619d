use std::ops::Range;

use engine_contract::Role;
use regex::{Regex, RegexBuilder};

use crate::schema::{Session, SessionId};

/// One message containing the query, with every occurrence located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub session_id: SessionId,
    pub title: String,
    pub message_index: usize,
    pub role: Role,
    /// Byte ranges into the message content, ascending and non-overlapping.
    pub spans: Vec<Range<usize>>,
}

pub(crate) fn query_matcher(query: &str) -> Option<Regex> {
    if query.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(query))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Case-insensitive occurrences of `query` in `text`. Empty queries match nothing.
#[must_use]
pub fn find_spans(text: &str, query: &str) -> Vec<Range<usize>> {
    query_matcher(query)
        .map(|matcher| spans_with(&matcher, text))
        .unwrap_or_default()
}

fn spans_with(matcher: &Regex, text: &str) -> Vec<Range<usize>> {
    matcher.find_iter(text).map(|found| found.range()).collect()
}

pub(crate) fn search_session(matcher: &Regex, session: &Session) -> Vec<SearchHit> {
    session
        .messages
        .iter()
        .enumerate()
        .filter_map(|(message_index, message)| {
            let spans = spans_with(matcher, &message.content);
            (!spans.is_empty()).then(|| SearchHit {
                session_id: session.id.clone(),
                title: session.title.clone(),
                message_index,
                role: message.role,
                spans,
            })
        })
        .collect()
}
