//! All LLM ("oracle") contracts: the client trait and providers, retry
//! policy, lenient response parsing, and the prompt/response shapes for
//! extraction, profile merging, summaries, and simulation.

pub mod client;
pub mod extraction;
pub mod merge;
pub mod parse;
pub mod providers;
pub mod retrieval;
mod retry;
pub mod simulate;
pub mod summaries;

pub use client::{CompletionParams, LlmClient};
pub use providers::mock::MockProvider;
pub use providers::openai::OpenAiClient;
pub use retrieval::{NoRetrieval, SemanticRetrieval};
