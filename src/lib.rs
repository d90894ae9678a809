//! Unified completion client for OpenAI, Anthropic, Google Gemini and Ollama.
//!
//! Requests name their backend in the model identifier (`"ollama/llama3"`); the
//! [`LLMClient`] builds that provider on first use and normalizes its streamed output
//! into a sequence of [`Chunk`]s.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod types;

pub use client::{LLMClient, LLMClientBuilder, parse_identifier};
pub use config::{Environment, ProviderKind};
pub use error::LLMError;
pub use logging::LogLevel;
pub use provider::{DynProvider, LLMProvider};
pub use registry::ProviderRegistry;
pub use stream::ChunkStream;
pub use types::*;
