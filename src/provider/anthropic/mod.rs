//! Anthropic Messages backend: typed SSE events, done on `message_stop`.

mod provider;
mod request;
mod stream;
mod types;

pub use provider::AnthropicProvider;

pub(crate) const PROVIDER_NAME: &str = "anthropic";
