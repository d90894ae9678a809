//! Ollama backend: newline-delimited JSON from `/api/generate`.

mod provider;
mod request;
mod stream;
mod types;

pub use provider::OllamaProvider;

pub(crate) const PROVIDER_NAME: &str = "ollama";
