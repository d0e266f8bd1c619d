use engine_client::ChatRequest;
use engine_contract::Message;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "grok-4-1-fast-reasoning";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// User-adjustable request settings.
///
/// Values equal to the defaults are left out of the request so the engine
/// applies its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub provider: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub auto_title: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_owned(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: String::new(),
            provider: None,
            api_key: None,
            auto_title: true,
        }
    }
}

impl ChatSettings {
    pub fn to_request(&self, history: &[Message]) -> ChatRequest {
        let mut request = ChatRequest::from_history(self.model.clone(), history);
        if self.temperature != DEFAULT_TEMPERATURE {
            request = request.with_temperature(self.temperature);
        }
        if self.max_tokens != DEFAULT_MAX_TOKENS {
            request = request.with_max_tokens(self.max_tokens);
        }
        let system_prompt = self.system_prompt.trim();
        if !system_prompt.is_empty() {
            request = request.with_system_prompt(system_prompt);
        }
        if let Some(provider) = non_blank(self.provider.as_deref()) {
            request = request.with_provider(provider);
        }
        if let Some(api_key) = non_blank(self.api_key.as_deref()) {
            request = request.with_api_key(api_key);
        }
        request
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
