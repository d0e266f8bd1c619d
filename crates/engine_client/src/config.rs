use std::collections::BTreeMap;
use std::time::Duration;

use engine_contract::EngineEndpoint;

/// Default connect timeout toward the local engine.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport configuration for engine requests.
#[derive(Debug, Clone)]
pub struct EngineClientConfig {
    /// Engine base URL, normalized to the chat route at request time.
    pub base_url: String,
    pub connect_timeout: Option<Duration>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
}

impl EngineClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            user_agent: None,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn for_endpoint(endpoint: &EngineEndpoint) -> Self {
        Self::new(endpoint.base_url())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }
}
