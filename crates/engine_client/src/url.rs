use engine_contract::EngineEndpoint;

/// Path of the streaming chat route on the engine.
pub const CHAT_PATH: &str = "/api/chat";

/// Normalize a base URL to the engine chat route.
///
/// Normalization rules:
/// 1) keep `/api/chat` unchanged
/// 2) append `/chat` when path ends in `/api`
/// 3) append `/api/chat` otherwise
pub fn chat_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with(CHAT_PATH) {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/api") {
        return format!("{trimmed}/chat");
    }
    format!("{trimmed}{CHAT_PATH}")
}

pub fn chat_url_for(endpoint: &EngineEndpoint) -> String {
    chat_url(&endpoint.base_url())
}
