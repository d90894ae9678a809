use async_trait::async_trait;

use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::{LLMProvider, ensure_messages};
use crate::stream::{ChunkStream, Interrupt, spawn_decode_loop};
use crate::types::{ChatSession, CompletionRequest, CompletionResult, Message, Usage};

use super::PROVIDER_NAME;
use super::client::GeminiClient;
use super::request::{build_chat_body, build_gemini_body};
use super::stream::GeminiFrameHandler;
use super::types::GenerateContentResponse;

/// Google Gemini adapter, the only backend with multi-turn chat sessions.
pub struct GoogleGeminiProvider {
    client: GeminiClient,
}

impl GoogleGeminiProvider {
    /// Creates a provider that targets the public Generative Language endpoint.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            client: GeminiClient::new(transport, api_key.into()),
        }
    }

    /// Overrides the base URL, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.client.set_base_url(base_url.into());
        self
    }
}

fn into_result(response: GenerateContentResponse) -> Result<CompletionResult, LLMError> {
    let text = response
        .first_text()
        .ok_or_else(|| LLMError::decode(PROVIDER_NAME, "response contains no candidates"))?;
    let usage = response.usage_metadata.map(|usage| {
        Usage::new(
            usage.prompt_token_count.unwrap_or(0),
            usage.candidates_token_count.unwrap_or(0),
        )
    });
    Ok(CompletionResult {
        text,
        usage,
        provider: PROVIDER_NAME.to_string(),
    })
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn generate(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_gemini_body(request)?;
        let response = interrupt
            .guard(
                self.client
                    .generate_content(model, &body, interrupt.remaining()),
            )
            .await?;
        into_result(response)
    }

    async fn stream(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, LLMError> {
        ensure_messages(request)?;
        let interrupt = Interrupt::for_request(request);
        let body = build_gemini_body(request)?;
        tracing::debug!(provider = PROVIDER_NAME, model, "opening completion stream");

        let iter = interrupt
            .guard(
                self.client
                    .generate_content_stream(model, &body, interrupt.remaining()),
            )
            .await?;

        Ok(spawn_decode_loop(
            PROVIDER_NAME,
            iter.into_frames(),
            GeminiFrameHandler::default(),
            interrupt,
        ))
    }

    fn start_chat(&self, model: &str) -> Result<ChatSession, LLMError> {
        self.client.ensure_open()?;
        Ok(ChatSession::new(ProviderKind::GoogleGemini, model))
    }

    /// Sends one turn; the session history only grows when the backend answered.
    async fn send_chat_message(
        &self,
        session: &mut ChatSession,
        message: &str,
    ) -> Result<CompletionResult, LLMError> {
        if session.provider() != ProviderKind::GoogleGemini {
            return Err(LLMError::SessionMismatch {
                expected: PROVIDER_NAME.to_string(),
                found: session.provider().name().to_string(),
            });
        }
        let body = build_chat_body(session.history(), message);
        let response = self
            .client
            .generate_content(session.model(), &body, None)
            .await?;
        let result = into_result(response)?;

        session.push(Message::user(message));
        session.push(Message::assistant(result.text.clone()));
        Ok(result)
    }

    async fn close(&self) -> Result<(), LLMError> {
        if self.client.close() {
            tracing::debug!(provider = PROVIDER_NAME, "client closed");
        }
        Ok(())
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleGemini
    }
}
