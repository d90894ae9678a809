use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::{HttpBodyStream, HttpResponse, HttpStreamResponse, collect_stream_text};
use crate::stream::ChunkStream;
use crate::types::{ChatSession, CompletionRequest, CompletionResult};

pub mod anthropic;
pub mod google_gemini;
pub mod ollama;
pub mod openai;

/// Uniform capability set every backend adapter exposes.
///
/// `model` is the bare model name with the provider prefix already stripped; the
/// model field inside `request` is left untouched and ignored by adapters.
/// Capabilities a backend lacks fail with [`LLMError::NotSupported`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Issues one request and waits for the complete response.
    async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError>;

    /// Opens a streamed completion.
    ///
    /// Resolves once the backend accepted the request; a non-success status is
    /// returned here rather than as a stream item.
    async fn stream(&self, model: &str, request: &CompletionRequest)
    -> Result<ChunkStream, LLMError>;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LLMError> {
        Err(LLMError::not_supported("embed", self.name()))
    }

    fn start_chat(&self, _model: &str) -> Result<ChatSession, LLMError> {
        Err(LLMError::not_supported("chat", self.name()))
    }

    async fn send_chat_message(
        &self,
        _session: &mut ChatSession,
        _message: &str,
    ) -> Result<CompletionResult, LLMError> {
        Err(LLMError::not_supported("chat", self.name()))
    }

    /// Releases backend resources. Calling it more than once is harmless.
    async fn close(&self) -> Result<(), LLMError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn kind(&self) -> ProviderKind;
}

/// Thread-safe provider handle.
pub type DynProvider = Arc<dyn LLMProvider>;

/// Rejects requests no backend could answer.
pub(crate) fn ensure_messages(request: &CompletionRequest) -> Result<(), LLMError> {
    if request.messages.is_empty() {
        return Err(LLMError::Validation {
            message: "at least one message is required".to_string(),
        });
    }
    Ok(())
}

/// Returns the body of a buffered response, or [`LLMError::Backend`] for non-2xx statuses.
pub(crate) fn success_body(
    provider: &'static str,
    response: HttpResponse,
) -> Result<String, LLMError> {
    let status = response.status;
    let success = response.is_success();
    let body = String::from_utf8_lossy(&response.body).into_owned();
    if success {
        Ok(body)
    } else {
        tracing::debug!(provider, status, "backend rejected request");
        Err(LLMError::Backend {
            provider,
            status,
            body,
        })
    }
}

/// Hands back the body of an accepted stream; a rejected one is drained into
/// [`LLMError::Backend`].
pub(crate) async fn success_stream(
    provider: &'static str,
    response: HttpStreamResponse,
) -> Result<HttpBodyStream, LLMError> {
    if response.is_success() {
        return Ok(response.body);
    }
    let status = response.status;
    let body = collect_stream_text(response.body).await?;
    tracing::debug!(provider, status, "backend rejected stream request");
    Err(LLMError::Backend {
        provider,
        status,
        body,
    })
}

pub(crate) fn parse_json<T: DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, LLMError> {
    serde_json::from_str(text)
        .map_err(|err| LLMError::decode(provider, format!("unexpected response body: {err}")))
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
pub(crate) mod testing;
