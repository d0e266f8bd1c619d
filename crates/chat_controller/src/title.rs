use engine_client::{ChatRequest, WireMessage};
use engine_contract::Role;

use crate::preview::truncate_chars;
use crate::settings::ChatSettings;

const PROVISIONAL_TITLE_CHARS: usize = 40;
const MAX_TITLE_CHARS: usize = 60;
const TITLE_CONTEXT_CHARS: usize = 500;

const TITLE_INSTRUCTION: &str = "Generate a short title (3-6 words, lowercase, no quotes or \
punctuation) for this conversation. Reply with only the title.";

/// Title shown until a generated one replaces it: the first message, cut to 40 chars.
pub fn provisional_title(first_message: &str) -> String {
    truncate_chars(first_message.trim(), PROVISIONAL_TITLE_CHARS)
}

/// Normalizes a generated title; `None` when nothing usable remains.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let title: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '.'))
        .collect();
    let title = title.trim();
    let length = title.chars().count();
    (length > 0 && length < MAX_TITLE_CHARS).then(|| title.to_owned())
}

/// Request asking the engine to name a conversation from its first exchange.
pub fn title_request(settings: &ChatSettings, user: &str, assistant: &str) -> ChatRequest {
    let context = format!(
        "User: {}\nAssistant: {}\n\n{TITLE_INSTRUCTION}",
        truncate_chars(user, TITLE_CONTEXT_CHARS),
        truncate_chars(assistant, TITLE_CONTEXT_CHARS),
    );
    let mut request = ChatRequest::new(
        settings.model.clone(),
        vec![WireMessage {
            role: Role::User,
            content: context,
        }],
    );
    request.provider = settings.provider.clone();
    request.api_key = settings.api_key.clone();
    request
}
