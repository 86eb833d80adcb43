//! Mock LLM Provider — deterministic responses for testing without API keys.
//!
//! Responses are scripted: push them in the order the code under test will
//! consume them. An exhausted script is an error, so tests notice an
//! unexpected extra call.

use crate::client::{CompletionParams, LlmClient};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<ScriptEntry>>,
    keyed: Mutex<Vec<(String, VecDeque<ScriptEntry>)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Debug)]
enum ScriptEntry {
    Reply(String),
    Fail(String),
}

/// Prompts seen by the mock, for assertions on what was sent.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub user: String,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned completion.
    pub fn push(&self, response: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(ScriptEntry::Reply(response.into()));
        self
    }

    /// Queue a simulated provider failure.
    pub fn push_error(&self, message: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(ScriptEntry::Fail(message.into()));
        self
    }

    /// Queue a response consumed only by calls whose system prompt contains
    /// `marker`. Lets tests stay deterministic when stages run concurrently.
    pub fn push_for(&self, marker: impl Into<String>, response: impl Into<String>) -> &Self {
        let marker = marker.into();
        let mut keyed = self.keyed.lock().unwrap();
        let entry = ScriptEntry::Reply(response.into());
        if let Some((_, queue)) = keyed.iter_mut().find(|(m, _)| *m == marker) {
            queue.push_back(entry);
        } else {
            keyed.push((marker, VecDeque::from([entry])));
        }
        self
    }

    /// Keyed counterpart of [`push_error`](Self::push_error).
    pub fn push_error_for(&self, marker: impl Into<String>, message: impl Into<String>) -> &Self {
        let marker = marker.into();
        let mut keyed = self.keyed.lock().unwrap();
        let entry = ScriptEntry::Fail(message.into());
        if let Some((_, queue)) = keyed.iter_mut().find(|(m, _)| *m == marker) {
            queue.push_back(entry);
        } else {
            keyed.push((marker, VecDeque::from([entry])));
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _params: CompletionParams,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system.to_string(),
            user: user.to_string(),
        });
        {
            let mut keyed = self.keyed.lock().unwrap();
            if let Some((_, queue)) = keyed
                .iter_mut()
                .find(|(marker, queue)| system.contains(marker.as_str()) && !queue.is_empty())
            {
                match queue.pop_front() {
                    Some(ScriptEntry::Reply(text)) => return Ok(text),
                    Some(ScriptEntry::Fail(message)) => anyhow::bail!("{}", message),
                    None => unreachable!(),
                }
            }
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(ScriptEntry::Reply(text)) => Ok(text),
            Some(ScriptEntry::Fail(message)) => anyhow::bail!("{}", message),
            None => anyhow::bail!("mock script exhausted (unexpected completion call)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let provider = MockProvider::new();
        provider.push("first").push("second");

        let a = provider
            .complete("sys", "one", CompletionParams::default())
            .await
            .unwrap();
        let b = provider
            .complete("sys", "two", CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(a, "first");
        assert_eq!(b, "second");

        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].user, "two");
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let provider = MockProvider::new();
        let err = provider
            .complete("sys", "user", CompletionParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_keyed_responses_match_system_prompt() {
        let provider = MockProvider::new();
        provider.push_for("merge", "merged");
        provider.push("fallback");

        let a = provider
            .complete("you merge profiles", "x", CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(a, "merged");

        // Keyed queue exhausted: falls through to the plain queue.
        let b = provider
            .complete("you merge profiles", "x", CompletionParams::default())
            .await
            .unwrap();
        assert_eq!(b, "fallback");
    }

    #[tokio::test]
    async fn test_pushed_error_surfaces() {
        let provider = MockProvider::new();
        provider.push_error("upstream 503");
        let err = provider
            .complete("sys", "user", CompletionParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
