use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::validation::Language;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KithConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub language: Language,
}

impl KithConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KithConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KITH_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("KITH_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("KITH_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("KITH_LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("KITH_LLM_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("KITH_DB_PATH") {
            self.store.db_path = v;
        }
        if let Ok(v) = std::env::var("KITH_LANGUAGE") {
            if let Ok(lang) = v.parse() {
                self.language = lang;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Per-request timeout for the HTTP client.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.2,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "kith.db".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = KithConfig::default();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.max_tokens, 4096);
        assert_eq!(cfg.store.db_path, "kith.db");
        assert_eq!(cfg.language, Language::En);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
provider = "deepseek"
model = "deepseek-chat"
"#;
        let cfg: KithConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.model, "deepseek-chat");
        // Defaults for unspecified fields
        assert_eq!(cfg.llm.max_tokens, 4096);
        assert_eq!(cfg.store.db_path, "kith.db");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
language = "zh-hans"

[llm]
provider = "openai"
model = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"
max_tokens = 8192
temperature = 0.7
request_timeout_secs = 120

[store]
db_path = "data/kith.db"
"#;
        let cfg: KithConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.max_tokens, 8192);
        assert_eq!(cfg.llm.request_timeout_secs, 120);
        assert_eq!(cfg.store.db_path, "data/kith.db");
        assert_eq!(cfg.language, Language::ZhHans);
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        std::env::set_var("KITH_LLM_PROVIDER", "mock");
        std::env::set_var("KITH_DB_PATH", "/tmp/override.db");

        let mut cfg = KithConfig::default();
        cfg.apply_env_overrides();

        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.store.db_path, "/tmp/override.db");

        std::env::remove_var("KITH_LLM_PROVIDER");
        std::env::remove_var("KITH_DB_PATH");

        let cfg = KithConfig::load_or_default("/nonexistent/path.toml");
        assert_eq!(cfg.llm.provider, "openai");
    }
}
