//! OpenAI Chat Completions backend: SSE deltas terminated by `[DONE]`.

mod provider;
mod request;
mod stream;
mod types;

pub use provider::OpenAiProvider;

pub(crate) const PROVIDER_NAME: &str = "openai";
