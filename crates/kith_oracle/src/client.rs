use anyhow::Result;
use async_trait::async_trait;

/// Parameters for a single completion request.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Maximum tokens to generate (will be clamped to provider limits)
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Ask the provider for a JSON-object response where it supports that.
    pub json_output: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
            json_output: false,
        }
    }
}

impl CompletionParams {
    pub fn json() -> Self {
        Self {
            json_output: true,
            ..Default::default()
        }
    }
}

/// Text-in, text-out completion. Every oracle contract in this crate goes
/// through this trait, so pipeline tests can swap in a scripted provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str, params: CompletionParams)
        -> Result<String>;
}
