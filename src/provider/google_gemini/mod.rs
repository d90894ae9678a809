//! Google Gemini backend.
//!
//! [`client`] wraps the Generative Language REST API and exposes streamed output as a
//! pull iterator; the adapter drives that iterator through the shared decode loop.

mod client;
mod provider;
mod request;
mod stream;
mod types;

pub use provider::GoogleGeminiProvider;

pub(crate) const PROVIDER_NAME: &str = "googlegemini";
