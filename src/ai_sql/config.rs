//! Configuration for SQL generation and schema handling

use serde::{Deserialize, Serialize};

/// Completion provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderType {
    /// OpenAI-compatible chat completions endpoint
    #[default]
    OpenAI,
    /// Anthropic messages endpoint
    Anthropic,
}

impl AiProviderType {
    pub fn default_model(&self) -> &'static str {
        match self {
            AiProviderType::OpenAI => "gpt-4o",
            AiProviderType::Anthropic => "claude-sonnet-4-5-20250929",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            AiProviderType::OpenAI => "https://api.openai.com/v1",
            AiProviderType::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Environment variable holding the API key for this provider
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            AiProviderType::OpenAI => "OPENAI_API_KEY",
            AiProviderType::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::fmt::Display for AiProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProviderType::OpenAI => write!(f, "openai"),
            AiProviderType::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Configuration for the completion call
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Provider to call
    pub provider: AiProviderType,

    /// Model name; the provider default when unset
    pub model: Option<String>,

    /// Base URL override (for proxies and compatible endpoints)
    pub base_url: Option<String>,

    /// API key (can also use OPENAI_API_KEY / ANTHROPIC_API_KEY)
    pub api_key: Option<String>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// Row limit the model is told to apply unless the question asks otherwise
    pub default_limit: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderType::OpenAI,
            model: None,
            base_url: None,
            api_key: None,
            temperature: 0.1,
            max_tokens: 1024,
            timeout_seconds: 30,
            default_limit: 100,
        }
    }
}

impl std::fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("default_limit", &self.default_limit)
            .finish()
    }
}

impl CompletionConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }

    /// Take the API key from the provider's environment variable when it is set and
    /// non-empty, replacing any key from the file
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(self.provider.api_key_env_var()).filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.is_none() {
            return Err(format!(
                "{} API key not found. Set {} environment variable or configure [completion].api_key",
                self.provider,
                self.provider.api_key_env_var()
            ));
        }

        if !(0.0..=1.0).contains(&self.temperature) {
            return Err("Temperature must be between 0.0 and 1.0".to_string());
        }

        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than 0".to_string());
        }

        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than 0".to_string());
        }

        if self.default_limit == 0 {
            return Err("default_limit must be greater than 0".to_string());
        }

        Ok(())
    }

}

/// Schema introspection and listing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Tables omitted from the table listing (never from the generator's schema text)
    pub hidden_tables: Vec<String>,

    /// Table names shown when introspection fails
    pub fallback_tables: Vec<String>,

    /// Expire the session's schema snapshot after this many seconds; unset keeps it for
    /// the whole session
    pub cache_ttl_seconds: Option<u64>,

    /// Upper bound for catalog reads and the table listing
    pub metadata_timeout_seconds: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            hidden_tables: vec!["users".to_string()],
            fallback_tables: vec!["technologies".to_string(), "projects".to_string()],
            cache_ttl_seconds: None,
            metadata_timeout_seconds: 10,
        }
    }
}

impl SchemaConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.metadata_timeout_seconds == 0 {
            return Err("metadata_timeout_seconds must be greater than 0".to_string());
        }
        if self.cache_ttl_seconds == Some(0) {
            return Err("cache_ttl_seconds must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}
