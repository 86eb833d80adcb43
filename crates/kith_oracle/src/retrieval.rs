use anyhow::Result;
use async_trait::async_trait;

/// Pluggable context retrieval for the summary stages. Summaries work with
/// whatever this returns; an empty result just means less grounding text in
/// the prompt.
#[async_trait]
pub trait SemanticRetrieval: Send + Sync {
    /// Return prompt-ready context snippets relevant to `query` for this user.
    async fn retrieve(&self, user_id: &str, query: &str) -> Result<Vec<String>>;
}

/// Null retrieval: no stored context, every query comes back empty.
#[derive(Debug, Default, Clone)]
pub struct NoRetrieval;

#[async_trait]
impl SemanticRetrieval for NoRetrieval {
    async fn retrieve(&self, _user_id: &str, _query: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
