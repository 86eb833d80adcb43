use crate::client::{CompletionParams, LlmClient};
use crate::retry;
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

/// OpenAI-compatible chat-completions provider.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: &str, base_url: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let base_url = base_url
            .map(|u| u.to_string())
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()?,
            api_key,
            base_url,
            model: model.to_string(),
        })
    }

    /// POST the payload, retrying transient failures with backoff. A
    /// non-retryable status surfaces immediately with the response body.
    async fn post_completion(&self, payload: &Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = None;

        for attempt in 0..retry::MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(retry::backoff_delay(attempt - 1)).await;
            }
            match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json()
                        .await
                        .context("Failed to decode completion response body");
                }
                Ok(response) => {
                    let status = response.status();
                    let body: String = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(200)
                        .collect();
                    if !retry::retryable_status(status) {
                        anyhow::bail!("completion endpoint returned {status}: {body}");
                    }
                    tracing::warn!(
                        "completion endpoint returned {status} (attempt {} of {}): {body}",
                        attempt + 1,
                        retry::MAX_ATTEMPTS
                    );
                    last_error = Some(anyhow::anyhow!(
                        "completion endpoint returned {status}: {body}"
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        "completion request failed (attempt {} of {}): {e}",
                        attempt + 1,
                        retry::MAX_ATTEMPTS
                    );
                    last_error = Some(
                        anyhow::Error::new(e).context("Failed to reach the completion endpoint"),
                    );
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("completion request made no attempts"))
            .context(format!("gave up after {} attempts", retry::MAX_ATTEMPTS)))
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        params: CompletionParams,
    ) -> Result<String> {
        let mut payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        if params.json_output {
            payload["response_format"] = json!({ "type": "json_object" });
        }

        let resp_json = self.post_completion(&payload).await?;
        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }
}
